use crate::database::connection::{DatabaseError, DatabasePool, PgPooledConnection};
use crate::database::models::{GoldPriceChangeset, GoldPriceRow, NewGoldPriceRow};
use crate::database::schema::gold_prices;
use crate::models::PriceQuote;
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use std::sync::Arc;

/// Counts reported by a batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Price repository trait - the durable store contract
///
/// Calls are blocking; async callers go through [`run_blocking`].
pub trait PriceRepository: Send + Sync {
    /// All stored quotes, most recently updated first
    fn find_all(&self) -> Result<Vec<PriceQuote>, DatabaseError>;

    /// Quote whose `id` or `type` equals `key`
    fn find_by_key(&self, key: &str) -> Result<Option<PriceQuote>, DatabaseError>;

    /// Upsert a batch in one transaction, matching existing rows by `type`.
    /// Matched rows keep their `id`; unmatched quotes are inserted.
    fn upsert_batch(&self, quotes: &[PriceQuote]) -> Result<UpsertSummary, DatabaseError>;
}

/// Run a repository call on the blocking thread pool
pub async fn run_blocking<T, F>(
    repository: Arc<dyn PriceRepository>,
    operation: F,
) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PriceRepository) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || operation(repository.as_ref()))
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
}

/// Concrete implementation of PriceRepository on PostgreSQL
pub struct PriceRepositoryImpl {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
}

impl PriceRepositoryImpl {
    /// Create new price repository with connection provider
    pub fn new<F>(get_conn: F) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
        }
    }

    /// Create a repository drawing connections from `pool`
    pub fn from_pool(pool: DatabasePool) -> Self {
        Self::new(move || pool.get_conn())
    }
}

impl PriceRepository for PriceRepositoryImpl {
    fn find_all(&self) -> Result<Vec<PriceQuote>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        let rows = gold_prices::table
            .order(gold_prices::updated_at.desc())
            .select(GoldPriceRow::as_select())
            .load::<GoldPriceRow>(&mut conn)?;

        Ok(rows.into_iter().map(PriceQuote::from).collect())
    }

    fn find_by_key(&self, key: &str) -> Result<Option<PriceQuote>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        let row = gold_prices::table
            .filter(gold_prices::id.eq(key).or(gold_prices::quote_type.eq(key)))
            .select(GoldPriceRow::as_select())
            .first::<GoldPriceRow>(&mut conn)
            .optional()?;

        Ok(row.map(PriceQuote::from))
    }

    fn upsert_batch(&self, quotes: &[PriceQuote]) -> Result<UpsertSummary, DatabaseError> {
        let mut conn = (self.get_conn)()?;
        let now = Utc::now();

        conn.transaction::<_, DatabaseError, _>(|conn| {
            let mut summary = UpsertSummary::default();

            for quote in quotes {
                let existing_id = gold_prices::table
                    .filter(gold_prices::quote_type.eq(&quote.quote_type))
                    .select(gold_prices::id)
                    .first::<String>(conn)
                    .optional()?;

                match existing_id {
                    Some(id) => {
                        diesel::update(gold_prices::table.find(id))
                            .set(&GoldPriceChangeset::from_quote(quote, now))
                            .execute(conn)?;
                        summary.updated += 1;
                    }
                    None => {
                        let mut row = NewGoldPriceRow::from_quote(quote, now);

                        // Ids are unique across types; a taken id is replaced
                        let id_taken = diesel::select(diesel::dsl::exists(
                            gold_prices::table.find(&row.id),
                        ))
                        .get_result::<bool>(conn)?;
                        if id_taken {
                            tracing::debug!(
                                "Id '{}' already used, assigning a new id to '{}'",
                                row.id,
                                row.quote_type
                            );
                            row.id = uuid::Uuid::new_v4().to_string();
                        }

                        diesel::insert_into(gold_prices::table)
                            .values(&row)
                            .execute(conn)?;
                        summary.inserted += 1;
                    }
                }
            }

            Ok(summary)
        })
    }
}
