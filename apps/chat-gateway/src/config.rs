use std::path::PathBuf;

/// Chat gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset the in-memory store is used.
    pub database_url: Option<String>,
    /// HMAC secret used to verify handshake bearer tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Path to a Firebase service-account JSON file. Push is disabled without it.
    pub fcm_service_account_path: Option<PathBuf>,
    /// Capacity of each connection's outbound event queue.
    pub outbound_buffer: usize,
    /// Capacity of the push notification queue.
    pub push_queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: optional_var("DATABASE_URL"),
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT").unwrap_or(3000),
            fcm_service_account_path: optional_var("FCM_SERVICE_ACCOUNT_PATH").map(PathBuf::from),
            outbound_buffer: parsed_var("OUTBOUND_BUFFER").unwrap_or(256),
            push_queue_capacity: parsed_var("PUSH_QUEUE_CAPACITY").unwrap_or(1024),
        }
    }

    /// A configuration suitable for tests and local runs: memory store, push disabled.
    pub fn for_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            database_url: None,
            jwt_secret: jwt_secret.into(),
            port: 0,
            fcm_service_account_path: None,
            outbound_buffer: 256,
            push_queue_capacity: 1024,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    optional_var(name).and_then(|v| v.parse().ok())
}
