use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, token_store::MAX_TTL, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://otbor.db?mode=rwc";
pub const DEFAULT_KEY_PREFIX: &str = "otbor:";
pub const DEFAULT_PARTICIPANTS_TAB: &str = "участники";

/// Typed configuration, loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub superadmin_ids: Vec<i64>,
    /// Overrides the `getMe` lookup when building deep links.
    pub bot_username: Option<String>,

    // Storage
    pub database_url: String,
    pub redis_url: Option<String>,
    pub key_prefix: String,

    // Spreadsheets
    pub google_api_key: Option<String>,
    pub google_access_token: Option<String>,
    pub participants_tab: String,

    // Engine timings
    pub invite_ttl: Duration,
    pub dialogue_ttl: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let superadmin_ids = parse_csv_i64(env_str("SUPERADMIN_IDS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if superadmin_ids.is_empty() {
            return Err(Error::Config(
                "SUPERADMIN_IDS environment variable is required".to_string(),
            ));
        }

        let bot_username = env_str("BOT_USERNAME")
            .and_then(non_empty)
            .map(|s| s.trim_start_matches('@').to_string());

        let database_url = env_str("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let redis_url = env_str("REDIS_URL").and_then(non_empty);
        let key_prefix = env_str("REDIS_PREFIX")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        let google_api_key = env_str("GOOGLE_SHEETS_API_KEY").and_then(non_empty);
        let google_access_token = env_str("GOOGLE_SHEETS_ACCESS_TOKEN").and_then(non_empty);
        let participants_tab = env_str("PARTICIPANTS_TAB")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_PARTICIPANTS_TAB.to_string());

        let max_ttl = MAX_TTL.as_secs();
        let invite_ttl =
            Duration::from_secs(env_u64("INVITE_TTL_SECS").unwrap_or(86_400).clamp(1, max_ttl));
        let dialogue_ttl =
            Duration::from_secs(env_u64("DIALOGUE_TTL_SECS").unwrap_or(3_600).clamp(1, max_ttl));

        // Audit logging
        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/otbor-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        // Rate limiting
        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            superadmin_ids,
            bot_username,
            database_url,
            redis_url,
            key_prefix,
            google_api_key,
            google_access_token,
            participants_tab,
            invite_ttl,
            dialogue_ttl,
            audit_log_path,
            audit_log_json,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }

    pub fn is_superadmin(&self, user_id: i64) -> bool {
        self.superadmin_ids.contains(&user_id)
    }

    pub fn sheets_configured(&self) -> bool {
        self.google_api_key.is_some() || self.google_access_token.is_some()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        telegram_bot_token: "x".to_string(),
        superadmin_ids: vec![1],
        bot_username: Some("otbor_test_bot".to_string()),
        database_url: "sqlite::memory:".to_string(),
        redis_url: None,
        key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        google_api_key: None,
        google_access_token: None,
        participants_tab: DEFAULT_PARTICIPANTS_TAB.to_string(),
        invite_ttl: Duration::from_secs(86_400),
        dialogue_ttl: Duration::from_secs(3_600),
        audit_log_path: "/tmp/otbor-test-audit.log".into(),
        audit_log_json: true,
        rate_limit_enabled: false,
        rate_limit_requests: 20,
        rate_limit_window: Duration::from_secs(60),
    }
}
