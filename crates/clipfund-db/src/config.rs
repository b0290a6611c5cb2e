//! Database configuration

use serde::{Deserialize, Serialize};

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum pool connections
    pub max_connections: u32,
    /// Minimum pool connections
    pub min_connections: u32,
    /// Connection acquire timeout in seconds
    pub acquire_timeout_secs: u64,
    /// Apply bundled migrations on startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/clipfund".to_string(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Mask the password in the URL for logging
    pub fn url_masked(&self) -> String {
        mask_url(&self.url)
    }
}

fn mask_url(url: &str) -> String {
    let (Some(scheme_end), Some(at_pos)) = (url.find("://"), url.rfind('@')) else {
        return url.to_string();
    };
    if at_pos < scheme_end {
        return url.to_string();
    }
    let credentials = &url[scheme_end + 3..at_pos];
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at_pos..]),
        None => url.to_string(),
    }
}
