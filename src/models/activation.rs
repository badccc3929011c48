use serde::{Deserialize, Serialize};

/// A site (install) activated against a license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: String,
    pub license_id: String,
    /// Normalized form: scheme and `www.` stripped, no trailing slash.
    pub site_url: String,
    /// Local/staging sites are recorded but never count against the
    /// activation limit.
    pub is_local: bool,
    pub activated_at: i64,
    pub last_seen_at: i64,
}
