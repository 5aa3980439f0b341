use std::time::Duration;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// How often the database is swept for queued builds the task channel
    /// never delivered (default: 5 s).
    pub poll_interval: Duration,
    /// Queued builds picked up per sweep (default: `10`).
    pub batch_size: i64,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Default      |
    /// |-----------------------------|--------------|
    /// | `DATABASE_URL`              | *(required)* |
    /// | `WORKER_POLL_INTERVAL_SECS` | `5`          |
    /// | `WORKER_BATCH_SIZE`         | `10`         |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let poll_interval_secs: u64 = std::env::var("WORKER_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("WORKER_POLL_INTERVAL_SECS must be a valid u64");

        let batch_size: i64 = std::env::var("WORKER_BATCH_SIZE")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("WORKER_BATCH_SIZE must be a valid i64");

        Self {
            database_url,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            batch_size: batch_size.max(1),
        }
    }
}
