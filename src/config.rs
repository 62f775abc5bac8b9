use std::collections::BTreeMap;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "coderun", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file (built-in defaults are used when omitted)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Override the bind address from the configuration file
    #[arg(long = "bind")]
    pub bind_address: Option<String>,

    /// Override the bind port from the configuration file
    #[arg(long = "port", short = 'p')]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file, then apply CLI overrides
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = Some(address.clone());
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = Some(port);
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub execution: ExecutionConfig,
    /// Replaces the built-in runtime table when non-empty
    pub languages: Vec<LanguageConfig>,
    pub generate: GenerateConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    #[default]
    Docker,
    Local,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub isolation: IsolationKind,
    /// Container runtime binary used by the docker layer
    pub docker_binary: String,
    pub timeout: Second,
    pub grace_period: MilliSecond,
    /// Value passed to `--cpus`
    pub cpus: String,
    /// Value passed to `--memory`
    pub memory: String,
    /// Per-stream capture bound
    pub max_output_bytes: usize,
    pub default_language: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationKind::Docker,
            docker_binary: "docker".to_string(),
            timeout: Second(30),
            grace_period: MilliSecond(2000),
            cpus: "1".to_string(),
            memory: "256m".to_string(),
            max_output_bytes: 1024 * 1024,
            default_language: "python".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Second(pub u64);

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<Second> for Duration {
    fn from(value: Second) -> Self {
        Duration::from_secs(value.0)
    }
}

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GenerateConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the provider key
    pub api_key_env: String,
    pub referer: String,
    pub title: String,
    pub max_attempts: u32,
    pub backoff_base: MilliSecond,
    pub attempt_timeout: Second,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.0-flash-exp:free".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            referer: "http://localhost:3000".to_string(),
            title: "ExecutorAI".to_string(),
            max_attempts: 3,
            backoff_base: MilliSecond(500),
            attempt_timeout: Second(20),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}
