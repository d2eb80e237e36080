use gold_price_server::config::{AppConfig, ServerMode};
use gold_price_server::database::{
    establish_connection_pool, InMemoryPriceRepository, PriceRepository, PriceRepositoryImpl,
};
use gold_price_server::fetcher::{BtmcFetcher, PriceFetcher, SampleFetcher};
use gold_price_server::market_data::PriceDistributor;
use gold_price_server::store::{
    MemoryBackend, PubSubBackend, PubSubStore, RedisBackend, TieredCache,
};
use gold_price_server::websocket::ConnectionHub;
use gold_price_server::{create_router, AppState};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gold_price_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    tracing::info!("⚙️  Starting in {} mode", config.mode);

    let shutdown = CancellationToken::new();

    let backend = initialize_backend(&config).await;
    let repository = initialize_repository(&config);

    let store = Arc::new(PubSubStore::new(backend, repository));

    // Durable writes follow the persistence channel
    if let Err(e) = store.spawn_persistence_subscriber(shutdown.clone()).await {
        tracing::error!("❌ Failed to start persistence subscriber: {}", e);
        process::exit(1);
    }

    let cache = Arc::new(TieredCache::new(Arc::clone(&store)));
    let fetcher = initialize_fetcher(&config);
    let distributor = Arc::new(PriceDistributor::new(cache, Arc::clone(&store), fetcher));

    // Start the live-update fan-out before any price is published
    let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), shutdown.clone()));
    if let Err(e) = hub.start().await {
        tracing::error!("❌ Failed to start ConnectionHub: {}", e);
        process::exit(1);
    }

    match config.mode {
        ServerMode::Auto => {
            let _auto_update =
                Arc::clone(&distributor).start_auto_update(config.update_interval, shutdown.clone());
        }
        ServerMode::Manual => match distributor.fetch_initial_data().await {
            Ok(load) => tracing::info!("📦 Initial load: {:?}", load),
            Err(e) => tracing::warn!("⚠️  Initial load failed, waiting for manual updates: {}", e),
        },
    }

    let app = create_router(AppState {
        distributor,
        hub,
        mode: config.mode,
    });

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", addr, e);
            process::exit(1);
        }
    };

    tracing::info!("🚀 Gold price server running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    if config.mode == ServerMode::Manual {
        tracing::info!("✍️  Manual updates: POST http://{}/api/add", addr);
    }

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("🛑 Shutdown signal received");
            signal.cancel();
        })
        .await;

    shutdown.cancel();

    if let Err(e) = served {
        tracing::error!("❌ Server error: {}", e);
        process::exit(1);
    }

    tracing::info!("👋 Server stopped");
}

/// Connect to Redis when configured, otherwise use the in-process backend
async fn initialize_backend(config: &AppConfig) -> Arc<dyn PubSubBackend> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        tracing::info!("📮 Pub/sub: in-process backend (REDIS_URL not set)");
        return Arc::new(MemoryBackend::new());
    };

    match RedisBackend::connect(redis_url).await {
        Ok(backend) => {
            tracing::info!("✅ Connected to Redis");
            Arc::new(backend)
        }
        Err(e) => {
            tracing::error!("❌ Failed to connect to Redis: {}", e);
            process::exit(1);
        }
    }
}

/// Open the PostgreSQL pool when configured, otherwise keep prices in memory
fn initialize_repository(config: &AppConfig) -> Arc<dyn PriceRepository> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::info!("🗄️  Durable store: in-memory (DATABASE_URL not set)");
        return Arc::new(InMemoryPriceRepository::new());
    };

    tracing::info!("🗄️  Initializing PostgreSQL connection...");

    match establish_connection_pool(database_url, config.db_pool_size) {
        Ok(pool) => {
            tracing::info!("✅ Database connection established successfully");
            Arc::new(PriceRepositoryImpl::from_pool(pool))
        }
        Err(e) => {
            tracing::error!("❌ Failed to establish database connection: {}", e);
            process::exit(1);
        }
    }
}

fn initialize_fetcher(config: &AppConfig) -> Arc<dyn PriceFetcher> {
    let Some(url) = config.price_api_url.as_deref() else {
        tracing::info!("🪙 Price source: built-in sample quotes (PRICE_API_URL not set)");
        return Arc::new(SampleFetcher::new());
    };

    match BtmcFetcher::new(url) {
        Ok(fetcher) => {
            tracing::info!("🪙 Price source: {}", url);
            Arc::new(fetcher)
        }
        Err(e) => {
            tracing::warn!("⚠️  Falling back to sample quotes: {}", e);
            Arc::new(SampleFetcher::new())
        }
    }
}
