use std::env;
use std::path::PathBuf;

/// Server configuration, read once at startup from `TALKTO_*` environment
/// variables and managed as Rocket state.
///
/// - `TALKTO_HOST` — bind address (default: 127.0.0.1)
/// - `TALKTO_PORT` — API port (default: 15377)
/// - `TALKTO_FRONTEND_PORT` — dev frontend port, for the advertised UI URL (default: 3000)
/// - `TALKTO_NETWORK` — LAN mode; disables the localhost auth bypass (default: false)
/// - `TALKTO_DATA_DIR` — directory holding `talkto.db` (default: data)
/// - `TALKTO_PROMPTS_DIR` — directory holding `*.md` prompt templates (default: prompts)
/// - `TALKTO_LOG_LEVEL` — `debug` enables verbose invocation-path logging (default: info)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub frontend_port: u16,
    pub network: bool,
    pub data_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 15377,
            frontend_port: 3000,
            network: false,
            data_dir: PathBuf::from("data"),
            prompts_dir: PathBuf::from("prompts"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("TALKTO_HOST")
            && !val.trim().is_empty()
        {
            config.host = val;
        }
        if let Ok(val) = env::var("TALKTO_PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            config.port = n;
        }
        if let Ok(val) = env::var("TALKTO_FRONTEND_PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            config.frontend_port = n;
        }
        if let Ok(val) = env::var("TALKTO_NETWORK") {
            config.network = val == "1" || val.to_lowercase() == "true";
        }
        if let Ok(val) = env::var("TALKTO_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("TALKTO_PROMPTS_DIR") {
            config.prompts_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("TALKTO_LOG_LEVEL") {
            config.log_level = val.to_lowercase();
        }

        config
    }

    pub fn db_path(&self) -> String {
        self.data_dir.join("talkto.db").to_string_lossy().to_string()
    }

    /// Base URL advertised to agents in registration prompts.
    /// Uses the LAN IP in network mode so agents on other machines can reach us.
    pub fn base_url(&self) -> String {
        if self.network {
            match local_ip_address::local_ip() {
                Ok(ip) => return format!("http://{}:{}", ip, self.port),
                Err(e) => {
                    eprintln!("⚠️  Could not determine LAN IP ({e}), advertising localhost");
                }
            }
        }
        format!("http://localhost:{}", self.port)
    }

    pub fn debug(&self) -> bool {
        self.log_level == "debug"
    }
}
