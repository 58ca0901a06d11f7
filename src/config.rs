use std::env;
use std::time::Duration;

/// Process-wide configuration, loaded once at startup from the environment.
///
/// Every knob has a documented default; a present-but-unparseable value falls
/// back to the default with a warning rather than failing startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub queue_capacity: usize,
    pub queue_warning_ratio: f64,
    pub stale_threshold: Duration,
    pub disconnect_threshold: Duration,
    pub consensus_threshold: f64,
    pub max_discussion_rounds: u32,
    pub reply_timeout: Duration,
    pub permission_cache_ttl: Duration,
    pub cross_project_rate_window: Duration,
    pub admin_username: String,
    pub admin_password: String,
    pub jwt_secret: String,
    pub jwt_access_ttl: Duration,
    pub jwt_refresh_ttl: Duration,
    pub seed_project_id: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "failed to parse env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_path: env_string("DATABASE_PATH", "data/broker.db"),
            queue_capacity: env_parsed("BROKER_QUEUE_CAPACITY", 100),
            queue_warning_ratio: env_parsed("BROKER_QUEUE_WARNING_RATIO", 0.9),
            stale_threshold: Duration::from_secs(env_parsed("BROKER_STALE_THRESHOLD_SECS", 30)),
            disconnect_threshold: Duration::from_secs(env_parsed(
                "BROKER_DISCONNECT_THRESHOLD_SECS",
                60,
            )),
            consensus_threshold: env_parsed("BROKER_CONSENSUS_THRESHOLD", 0.75),
            max_discussion_rounds: env_parsed("BROKER_MAX_ROUNDS", 3),
            reply_timeout: Duration::from_secs(env_parsed("BROKER_REPLY_TIMEOUT_SECS", 300)),
            permission_cache_ttl: Duration::from_secs(env_parsed("BROKER_CACHE_TTL_SECS", 300)),
            cross_project_rate_window: Duration::from_secs(60),
            admin_username: env_string("ADMIN_USERNAME", "admin"),
            admin_password: env_string("ADMIN_PASSWORD", "change-me-immediately"),
            jwt_secret: env_string("JWT_SECRET", "dev-secret-change-me"),
            jwt_access_ttl: Duration::from_secs(env_parsed("JWT_ACCESS_TTL_SECS", 30 * 60)),
            jwt_refresh_ttl: Duration::from_secs(env_parsed("JWT_REFRESH_TTL_SECS", 7 * 24 * 3600)),
            seed_project_id: env_string("BROKER_SEED_PROJECT_ID", "main"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::from_env()
    }
}
