use std::env;

/// Per-IP rate limits for the public license API, in requests per minute.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub strict_rpm: u32,
    pub standard_rpm: u32,
    pub relaxed_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub store_name: String,
    pub dev_mode: bool,
    pub rate_limit: RateLimitConfig,

    /// HMAC secret for PayPal webhook signatures. Webhooks are rejected
    /// when unset.
    pub paypal_webhook_secret: Option<String>,

    /// Resend API key for outbound email. Falls back to the webhook URL,
    /// then to disabled (log-only) mode.
    pub resend_api_key: Option<String>,
    pub email_webhook_url: Option<String>,
    pub from_email: String,

    pub reminders_enabled: bool,
    /// Days before expiration to send upcoming-renewal notices.
    pub renewal_notice_days: Vec<i64>,
    /// Days before expiration to send expiring-soon notices.
    pub expiration_notice_days: Vec<i64>,
    /// Seconds between reminder sweeps.
    pub reminder_interval_secs: u64,
    /// Seconds between maintenance sweeps (expiring overdue rows).
    pub maintenance_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BILLHOOK_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let rate_limit = RateLimitConfig {
            strict_rpm: env_u32("RATE_LIMIT_STRICT_RPM", 10),
            standard_rpm: env_u32("RATE_LIMIT_STANDARD_RPM", 30),
            relaxed_rpm: env_u32("RATE_LIMIT_RELAXED_RPM", 60),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "billhook.db".to_string()),
            base_url,
            store_name: env::var("BILLHOOK_STORE_NAME")
                .unwrap_or_else(|_| "Billhook Store".to_string()),
            dev_mode,
            rate_limit,
            paypal_webhook_secret: env::var("BILLHOOK_PAYPAL_WEBHOOK_SECRET").ok(),
            resend_api_key: env::var("BILLHOOK_RESEND_API_KEY").ok(),
            email_webhook_url: env::var("BILLHOOK_EMAIL_WEBHOOK_URL").ok(),
            from_email: env::var("BILLHOOK_FROM_EMAIL")
                .unwrap_or_else(|_| "billing@billhook.local".to_string()),
            reminders_enabled: env::var("BILLHOOK_REMINDERS_ENABLED")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
            renewal_notice_days: env_days("BILLHOOK_RENEWAL_NOTICE_DAYS", &[7, 1]),
            expiration_notice_days: env_days("BILLHOOK_EXPIRATION_NOTICE_DAYS", &[7, 1]),
            reminder_interval_secs: env_u64("BILLHOOK_REMINDER_INTERVAL_SECS", 60 * 60),
            maintenance_interval_secs: env_u64("BILLHOOK_MAINTENANCE_INTERVAL_SECS", 60 * 60),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated list of day offsets, e.g. "7,3,1".
/// Invalid entries are skipped; an empty result falls back to the default.
fn env_days(name: &str, default: &[i64]) -> Vec<i64> {
    let parsed: Vec<i64> = env::var(name)
        .map(|v| {
            v.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .filter(|d| *d >= 0)
                .collect()
        })
        .unwrap_or_default();

    if parsed.is_empty() {
        default.to_vec()
    } else {
        parsed
    }
}
