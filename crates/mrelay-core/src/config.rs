use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v17.0";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Typed configuration for the relay, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Platform
    pub whatsapp_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub graph_api_base: String,
    pub platform_timeout: Duration,

    // HTTP ingress
    pub listen_addr: SocketAddr,

    // Quota / dedup
    pub media_quota: u64,
    pub quota_window: Duration,
    pub dedup_ttl: Duration,

    // Content fetch
    pub fetch_throttle: Duration,
    pub fetch_timeout: Duration,
    pub fetch_user_agent: String,

    // Artifacts
    pub document_size_limit: usize,
    pub chunk_size: usize,

    // Scratch storage
    pub temp_dir: PathBuf,
    pub sweep_interval: Duration,
    pub sweep_max_age: Duration,

    // Process
    /// How long shutdown waits for in-flight runs.
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv();

        let whatsapp_token = required("WHATSAPP_TOKEN")?;
        let phone_number_id = required("PHONE_NUMBER_ID")?;
        let verify_token = required("VERIFY_TOKEN")?;
        let app_secret = env_str("WHATSAPP_APP_SECRET").and_then(non_empty);
        let graph_api_base = env_str("GRAPH_API_BASE")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let platform_timeout = Duration::from_secs(env_u64("PLATFORM_TIMEOUT_SECS").unwrap_or(60));

        let listen_addr = env_str("LISTEN_ADDR")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("LISTEN_ADDR {listen_addr:?} is invalid: {e}")))?;

        let media_quota = env_u64("MEDIA_QUOTA").unwrap_or(12);
        let quota_window = Duration::from_secs(env_u64("QUOTA_WINDOW_SECS").unwrap_or(24 * 60 * 60));
        let dedup_ttl = Duration::from_secs(env_u64("DEDUP_TTL_SECS").unwrap_or(60 * 60));

        let fetch_throttle = Duration::from_millis(env_u64("FETCH_THROTTLE_MS").unwrap_or(1000));
        let fetch_timeout = Duration::from_secs(env_u64("FETCH_TIMEOUT_SECS").unwrap_or(10));
        let fetch_user_agent = env_str("FETCH_USER_AGENT")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let document_size_limit = env_usize("DOCUMENT_SIZE_LIMIT").unwrap_or(100 * 1024 * 1024);
        let chunk_size = env_usize("CHUNK_SIZE").unwrap_or(1000 * 1024);

        let temp_dir = env_str("TEMP_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("mrelay"));
        fs::create_dir_all(&temp_dir)?;
        let sweep_interval = Duration::from_secs(env_u64("SWEEP_INTERVAL_SECS").unwrap_or(600));
        let sweep_max_age = Duration::from_secs(env_u64("SWEEP_MAX_AGE_SECS").unwrap_or(60 * 60));
        let shutdown_grace = Duration::from_secs(env_u64("SHUTDOWN_GRACE_SECS").unwrap_or(30));

        Ok(Self {
            whatsapp_token,
            phone_number_id,
            verify_token,
            app_secret,
            graph_api_base,
            platform_timeout,
            listen_addr,
            media_quota,
            quota_window,
            dedup_ttl,
            fetch_throttle,
            fetch_timeout,
            fetch_user_agent,
            document_size_limit,
            chunk_size,
            temp_dir,
            sweep_interval,
            sweep_max_age,
            shutdown_grace,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Export `./.env` entries into the process environment without overriding
/// variables that are already set. Call before logging init so `RUST_LOG`
/// from the file applies.
pub fn load_dotenv() {
    load_dotenv_if_present(Path::new(".env"));
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

// Zero is never a sensible value for any of our knobs; treat it like unset.
fn env_u64(key: &str) -> Option<u64> {
    env_str(key)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key)
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parsing_strips_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\nWHATSAPP_TOKEN=\"abc\"\n\nVERIFY_TOKEN='hello'\nbroken line\n=novalue\nMEDIA_QUOTA = 5\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("WHATSAPP_TOKEN".to_string(), "abc".to_string()),
                ("VERIFY_TOKEN".to_string(), "hello".to_string()),
                ("MEDIA_QUOTA".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn dotenv_fills_unset_variables_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "MRELAY_TEST_DOTENV_NEW=from-file\nMRELAY_TEST_DOTENV_SET=from-file\n",
        )
        .unwrap();
        env::set_var("MRELAY_TEST_DOTENV_SET", "from-env");

        load_dotenv_if_present(&path);

        assert_eq!(env::var("MRELAY_TEST_DOTENV_NEW").unwrap(), "from-file");
        assert_eq!(env::var("MRELAY_TEST_DOTENV_SET").unwrap(), "from-env");
        load_dotenv_if_present(&dir.path().join("missing.env"));
    }

    #[test]
    fn non_empty_trims_and_rejects_blank() {
        assert_eq!(non_empty("  x ".to_string()), Some("x".to_string()));
        assert_eq!(non_empty("   ".to_string()), None);
    }
}
