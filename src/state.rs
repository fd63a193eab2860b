use crate::config::AppConfig;
use crate::mailer::{LogMailer, Mailer};
use crate::store::{AuthStore, MemoryStore, PgStore};
use crate::throttle::ThrottleLedger;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AuthStore>,
    pub throttle: Arc<ThrottleLedger>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            warn!(error = %e, "migration failed; continuing with existing schema");
        }

        Ok(Self::from_pg(db, config))
    }

    pub fn from_pg(db: PgPool, config: AppConfig) -> Self {
        let throttle = Arc::new(ThrottleLedger::new(config.throttle.policy()));
        Self {
            store: Arc::new(PgStore::new(db)),
            throttle,
            mailer: Arc::new(LogMailer),
            config: Arc::new(config),
        }
    }

    /// Everything in memory; what the tests and local experiments run on.
    pub fn in_memory(config: AppConfig) -> Self {
        let throttle = Arc::new(ThrottleLedger::new(config.throttle.policy()));
        Self {
            store: Arc::new(MemoryStore::new()),
            throttle,
            mailer: Arc::new(LogMailer),
            config: Arc::new(config),
        }
    }
}
