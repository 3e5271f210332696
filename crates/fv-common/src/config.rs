use serde::Deserialize;

/// Top-level application configuration.
/// Loaded from environment variables (a `.env` file is honored at startup).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// TCP port the relay listens on (default: 3456)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Failed login attempts allowed per source before lockout (default: 5)
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Login lockout window in minutes (default: 15)
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: u64,
    /// Path of the persistent user/machine document (default: ./users.json)
    #[serde(default = "default_users_file")]
    pub users_file: String,
    /// Directory of agent source files served to bootstrap scripts
    /// (default: ./agent-files)
    #[serde(default = "default_agent_files_dir")]
    pub agent_files_dir: String,
}

impl AppConfig {
    /// Load config from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        cfg.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_login_attempts: default_max_login_attempts(),
            lockout_minutes: default_lockout_minutes(),
            users_file: default_users_file(),
            agent_files_dir: default_agent_files_dir(),
        }
    }
}

fn default_port() -> u16 {
    3456
}
fn default_max_login_attempts() -> u32 {
    5
}
fn default_lockout_minutes() -> u64 {
    15
}
fn default_users_file() -> String {
    "./users.json".to_string()
}
fn default_agent_files_dir() -> String {
    "./agent-files".to_string()
}
