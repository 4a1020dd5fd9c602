use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Due-note polling interval in milliseconds (default: 5000)
    pub poll_interval_ms: u64,

    /// How long a poller claim keeps a note invisible to subsequent polls,
    /// in seconds (default: 60). Covers queue wait + webhook timeout; if the
    /// job is lost entirely, the note becomes eligible again after this.
    pub claim_lease_secs: u64,

    /// Maximum delivery attempts before a note is moved to `dead` (default: 3)
    pub max_attempts: u32,

    /// Outbound webhook request timeout in milliseconds (default: 5000)
    pub webhook_timeout_ms: u64,

    /// Number of concurrent delivery worker tasks (default: 4)
    pub worker_concurrency: u32,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            poll_interval_ms: std::env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("POLL_INTERVAL_MS must be a valid u64"))?,
            claim_lease_secs: std::env::var("CLAIM_LEASE_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CLAIM_LEASE_SECS must be a valid u64"))?,
            max_attempts: std::env::var("MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_ATTEMPTS must be a valid u32"))?,
            webhook_timeout_ms: std::env::var("WEBHOOK_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WEBHOOK_TIMEOUT_MS must be a valid u64"))?,
            worker_concurrency: std::env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_CONCURRENCY must be a valid u32"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
        })
    }
}
