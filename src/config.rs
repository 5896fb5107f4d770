use std::env;
use std::time::Duration;

/// Runtime settings, read once at startup. Every value has a fallback so the
/// dashboard still boots (in offline mode) with an empty environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the hosted backend. Empty means offline mode.
    pub backend_url: String,
    /// Public (anon) key sent as `apikey` on every backend call.
    pub backend_anon_key: String,
    pub map_api_key: String,
    pub host: String,
    pub port: u16,
    /// Unit of the linear fetch backoff (1x, then 2x).
    pub retry_unit: Duration,
    /// Wait before the second re-fetch after creating a profile.
    pub create_refetch_delay: Duration,
    /// How long inline notices stay on screen.
    pub notice_dismiss: Duration,
    /// Seed user for the in-memory backend.
    pub demo_email: Option<String>,
    pub demo_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            backend_anon_key: String::new(),
            map_api_key: String::new(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            retry_unit: Duration::from_millis(1000),
            create_refetch_delay: Duration::from_millis(1000),
            notice_dismiss: Duration::from_secs(5),
            demo_email: None,
            demo_password: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
        };
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            backend_url: first(&["BACKEND_URL", "SUPABASE_URL"])
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            backend_anon_key: first(&["BACKEND_ANON_KEY", "SUPABASE_ANON_KEY"]).unwrap_or_default(),
            map_api_key: first(&["MAP_API_KEY"]).unwrap_or_default(),
            host: first(&["HOST"])
                .filter(|h| !h.is_empty())
                .unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            retry_unit: millis("PROFILE_RETRY_UNIT_MS", defaults.retry_unit),
            create_refetch_delay: millis(
                "PROFILE_CREATE_REFETCH_DELAY_MS",
                defaults.create_refetch_delay,
            ),
            notice_dismiss: lookup("NOTICE_DISMISS_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.notice_dismiss),
            demo_email: first(&["DEMO_EMAIL"]).filter(|v| !v.is_empty()),
            demo_password: lookup("DEMO_PASSWORD").filter(|v| !v.is_empty()),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.backend_url.is_empty()
    }
}
