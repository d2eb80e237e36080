// Kept in sync with migrations/ by hand; regenerate with `diesel print-schema`
diesel::table! {
    gold_prices (id) {
        id -> Varchar,
        #[sql_name = "type"]
        quote_type -> Varchar,
        name -> Varchar,
        karat -> Varchar,
        purity -> Varchar,
        buy_price -> Numeric,
        sell_price -> Numeric,
        company -> Varchar,
        updated_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}
