use std::time::Duration;

use tracing::warn;

pub const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8081",
    "http://localhost:19006",
];

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub model_version: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: "https://api.replicate.com/v1".to_string(),
            model_version: "a07f252abbbd832009640b27f063ea52d87d7a23a185ca165bec23b5adc8deaf".to_string(),
            poll_interval: Duration::from_millis(1000),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    pub measurement_id: Option<String>,
    pub api_secret: Option<String>,
}

/// Process configuration, read from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub request_logging: bool,
    /// Set when `NODE_ENV=development`; error responses then include internal detail.
    pub development: bool,
    pub replicate: ReplicateConfig,
    pub supabase: SupabaseConfig,
    pub analytics: AnalyticsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            allowed_origins: DEFAULT_ORIGINS.iter().map(|s| s.to_string()).collect(),
            rate_limit_per_minute: 10,
            request_logging: false,
            development: false,
            replicate: ReplicateConfig::default(),
            supabase: SupabaseConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unparseable
    /// values fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect::<Vec<_>>())
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.allowed_origins);

        let mut replicate = defaults.replicate;
        replicate.api_token = get("REPLICATE_API_TOKEN");
        if let Some(base) = get("REPLICATE_API_BASE") {
            replicate.base_url = base.trim_end_matches('/').to_string();
        }
        if let Some(version) = get("REPLICATE_MODEL_VERSION") {
            replicate.model_version = version;
        }
        replicate.poll_interval = Duration::from_millis(parse_or(&get, "REPLICATE_POLL_INTERVAL_MS", 1000u64));
        replicate.timeout = Duration::from_secs(parse_or(&get, "REPLICATE_TIMEOUT_SECS", 120u64));

        let rate_limit_per_minute = match parse_or(&get, "RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute) {
            0 => {
                warn!("RATE_LIMIT_PER_MINUTE must be positive, using {}", defaults.rate_limit_per_minute);
                defaults.rate_limit_per_minute
            }
            n => n,
        };

        Self {
            port: parse_or(&get, "PORT", defaults.port),
            allowed_origins,
            rate_limit_per_minute,
            request_logging: get("ENABLE_REQUEST_LOGGING").map(|v| is_truthy(&v)).unwrap_or(false),
            development: get("NODE_ENV").map(|v| v.eq_ignore_ascii_case("development")).unwrap_or(false),
            replicate,
            supabase: SupabaseConfig {
                url: get("EXPO_PUBLIC_SUPABASE_URL"),
                anon_key: get("EXPO_PUBLIC_SUPABASE_ANON_KEY"),
            },
            analytics: AnalyticsConfig {
                measurement_id: get("EXPO_PUBLIC_GOOGLE_ANALYTICS_ID"),
                api_secret: get("GOOGLE_ANALYTICS_API_SECRET"),
            },
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        None => default,
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
