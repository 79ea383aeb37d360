use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use crate::db::{
    BackoffPolicy, DatabaseSettings, FatalPolicy, HostCandidate, PoolConfig, RetryPolicy, Secret,
    TargetConfig,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseSettings,
    pub debug_endpoints: bool,
    pub cors_origins: Vec<String>,
    pub cors_origin_patterns: Vec<Regex>,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T> {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> anyhow::Result<bool> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} must be true or false", key),
        },
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn list(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Vec<String> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> anyhow::Result<Duration> {
    parse_or(lookup, key, default).map(Duration::from_millis)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let lookup = &lookup;

        let external = ["MYSQL_PUBLIC_URL", "MYSQL_URL", "DATABASE_URL"]
            .iter()
            .find_map(|key| non_empty(lookup, key).map(|url| (key, url)))
            .map(|(key, url)| {
                HostCandidate::from_url(&url).map_err(|e| anyhow::anyhow!("{}: {}", key, e))
            })
            .transpose()?;

        let user = match non_empty(lookup, "MYSQLUSER") {
            Some(user) => user,
            None => external
                .as_ref()
                .map(|c| c.user.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("MYSQLUSER or a MYSQL_URL/DATABASE_URL override is required")
                })?,
        };
        let password = match lookup("MYSQLPASSWORD") {
            Some(p) if !p.is_empty() => Some(Secret::new(p)),
            _ => external.as_ref().and_then(|c| c.password.clone()),
        };
        let database = non_empty(lookup, "MYSQLDATABASE")
            .or_else(|| external.as_ref().map(|c| c.database.clone()))
            .unwrap_or_else(|| "railway".to_string());

        let targets = TargetConfig {
            external,
            primary_host: non_empty(lookup, "MYSQLHOST"),
            internal_host: Some(
                non_empty(lookup, "MYSQL_INTERNAL_HOST")
                    .unwrap_or_else(|| "mysql.railway.internal".to_string()),
            ),
            local_fallback: flag(lookup, "DB_LOCAL_FALLBACK", true)?,
            port: parse_or(lookup, "MYSQLPORT", 3306)
                .map_err(|_| anyhow::anyhow!("MYSQLPORT must be a valid number between 1-65535"))?,
            user,
            password,
            database,
        };

        let max_connections: usize = parse_or(lookup, "DB_POOL_MAX", 10)?;
        if max_connections == 0 {
            anyhow::bail!("DB_POOL_MAX must be at least 1");
        }
        let idle_secs: u64 = parse_or(lookup, "DB_IDLE_TIMEOUT_SECS", 300)?;
        let lifetime_secs: u64 = parse_or(lookup, "DB_MAX_LIFETIME_SECS", 1800)?;
        let pool = PoolConfig {
            max_connections,
            max_waiters: parse_or(lookup, "DB_POOL_QUEUE", 64)?,
            connect_timeout: millis(lookup, "DB_CONNECT_TIMEOUT_MS", 5_000)?,
            acquire_timeout: millis(lookup, "DB_ACQUIRE_TIMEOUT_MS", 10_000)?,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            max_lifetime: (lifetime_secs > 0).then(|| Duration::from_secs(lifetime_secs)),
            test_on_acquire: flag(lookup, "DB_TEST_ON_ACQUIRE", true)?,
        };

        let delay = millis(lookup, "DB_RETRY_DELAY_MS", 5_000)?;
        let backoff = match non_empty(lookup, "DB_RETRY_BACKOFF")
            .unwrap_or_else(|| "fixed".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "fixed" => BackoffPolicy::Fixed(delay),
            "exponential" => {
                if delay < Duration::from_secs(1) {
                    anyhow::bail!("DB_RETRY_DELAY_MS must be at least 1000 for exponential backoff");
                }
                BackoffPolicy::Exponential {
                    initial: delay,
                    max: millis(lookup, "DB_RETRY_MAX_DELAY_MS", 60_000)?,
                }
            }
            other => anyhow::bail!("DB_RETRY_BACKOFF must be fixed or exponential, got {}", other),
        };
        let max_passes: u32 = parse_or(lookup, "DB_RETRY_MAX_PASSES", 5)?;
        let on_fatal = match non_empty(lookup, "DB_FATAL_POLICY")
            .unwrap_or_else(|| "stay".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "stay" => FatalPolicy::Stay,
            "exit" => FatalPolicy::Exit,
            other => anyhow::bail!("DB_FATAL_POLICY must be stay or exit, got {}", other),
        };

        let cors_origin_patterns = list(
            lookup,
            "CORS_ALLOWED_ORIGIN_PATTERNS",
            r"\.railway\.app$,\.vercel\.app$,\.netlify\.app$",
        )
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| anyhow::anyhow!("CORS_ALLOWED_ORIGIN_PATTERNS: invalid regex {}: {}", p, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

        let config = Self {
            port: parse_or(lookup, "PORT", 5000)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            database: DatabaseSettings {
                targets,
                pool,
                retry: RetryPolicy {
                    max_passes: (max_passes > 0).then_some(max_passes),
                    backoff,
                    on_fatal,
                },
                dns_probe: flag(lookup, "DB_DNS_PROBE", true)?,
                health_timeout: millis(lookup, "HEALTH_TIMEOUT_MS", 2_000)?,
            },
            debug_endpoints: flag(lookup, "DEBUG_ENDPOINTS", false)?,
            cors_origins: list(lookup, "CORS_ALLOWED_ORIGINS", "http://localhost:3000"),
            cors_origin_patterns,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database targets: external={:?} primary={:?} internal={:?} local_fallback={}",
            config.database.targets.external.as_ref().map(|c| c.address()),
            config.database.targets.primary_host,
            config.database.targets.internal_host,
            config.database.targets.local_fallback
        );
        tracing::debug!("Database name: {}", config.database.targets.database);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Whether a browser origin may call the API.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.cors_origins.iter().any(|o| o == origin)
            || self.cors_origin_patterns.iter().any(|re| re.is_match(origin))
    }
}
