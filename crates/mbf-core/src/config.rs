use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::UserId, errors::Error, Result};

/// Fixed reconciliation interval; not configurable.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Typed process configuration, read once at startup from the environment.
///
/// Notifier settings are hot-reloadable and live in their own file, see
/// [`crate::notify::config`].
#[derive(Clone, Debug)]
pub struct Config {
    // Main bot
    pub main_bot_token: String,
    pub main_bot_owner: Option<UserId>,

    // External files
    pub mirror_bots_file: PathBuf,
    pub notifier_config_file: PathBuf,

    // Runner tuning
    pub poll_timeout: Duration,
    pub poll_error_delay: Duration,
    pub stop_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let main_bot_token = env_str("MAIN_BOT_TOKEN").unwrap_or_default();
        if main_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "MAIN_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let main_bot_owner = env_i64("MAIN_BOT_OWNER").map(UserId);

        let mirror_bots_file =
            env_path("MIRROR_BOTS_FILE").unwrap_or_else(|| PathBuf::from("mirror-bots.json"));
        let notifier_config_file =
            env_path("NOTIFIER_CONFIG_FILE").unwrap_or_else(|| PathBuf::from("notifier.json"));

        let poll_timeout = Duration::from_secs(env_u64("POLL_TIMEOUT_SECS").unwrap_or(30));
        let poll_error_delay =
            Duration::from_millis(env_u64("POLL_ERROR_DELAY_MS").unwrap_or(1000));
        let stop_timeout = Duration::from_secs(env_u64("STOP_TIMEOUT_SECS").unwrap_or(10));

        Ok(Self {
            main_bot_token,
            main_bot_owner,
            mirror_bots_file,
            notifier_config_file,
            poll_timeout,
            poll_error_delay,
            stop_timeout,
        })
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

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
