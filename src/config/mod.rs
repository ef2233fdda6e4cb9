use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ingest: IngestConfig,
    pub blacklist: BlacklistConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Aggregate bucket category; a single static value unless overridden.
    pub category: String,
    /// Path to the runtime bot range document. Absent means IP-based bot
    /// flags are disabled.
    pub ranges_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Always use the socket remote address.
    None,
    /// Trust Forwarded / X-Forwarded-For headers.
    Standard,
}

/// Rule lists consumed by the blacklist filter, loaded once per process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistConfig {
    pub ips: Vec<String>,
    pub cidrs: Vec<String>,
    pub user_agents: Vec<String>,
    pub ua_substrings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Interval between batch recomputation passes.
    pub interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./glimpse.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);

        let host = std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("BEACON_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let category = std::env::var("AGGREGATE_CATEGORY").unwrap_or_else(|_| "default".to_string());
        let ranges_path = std::env::var("BOT_RANGES_PATH").ok();

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "standard" => TrustedProxyMode::Standard,
            "none" => TrustedProxyMode::None,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard"
                );
                TrustedProxyMode::None
            }
        };

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let interval_secs = std::env::var("STATS_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            ingest: IngestConfig {
                category,
                ranges_path,
                trusted_proxy_mode,
                num_trusted_proxies,
            },
            blacklist: BlacklistConfig {
                ips: env_list("BLACKLIST_IPS"),
                cidrs: env_list("BLACKLIST_CIDRS"),
                user_agents: env_list("BLACKLIST_USER_AGENTS"),
                ua_substrings: env_list("BLACKLIST_UA_SUBSTRINGS"),
            },
            stats: StatsConfig { interval_secs },
        })
    }
}

/// Comma-separated environment list; empty or unset means no entries.
fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
