use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub engine: EngineConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma separated allowed origins, `*` for any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    /// Largest request body accepted, base64 images included.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_cors_origins() -> String {
    "*".into()
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn get_cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_module_names")]
    pub module_names: Vec<String>,
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<String>,
    #[serde(default = "default_factories")]
    pub factories: Vec<String>,
    #[serde(default = "default_model_methods")]
    pub model_methods: Vec<String>,
    #[serde(default = "default_hand_drawn_keyword")]
    pub hand_drawn_keyword: String,
    /// Where the package caches downloaded model weights.
    #[serde(default)]
    pub model_cache_dir: Option<PathBuf>,
}

fn default_python() -> String {
    "python3".into()
}

fn default_module_names() -> Vec<String> {
    vec!["DECIMER".into(), "decimer".into()]
}

fn default_entry_points() -> Vec<String> {
    vec!["predict_SMILES".into()]
}

fn default_factories() -> Vec<String> {
    vec!["load_model".into()]
}

fn default_model_methods() -> Vec<String> {
    vec![
        "predict_SMILES".into(),
        "predict_smiles".into(),
        "predict".into(),
        "__call__".into(),
    ]
}

fn default_hand_drawn_keyword() -> String {
    "hand_drawn".into()
}

const CACHE_ENV_VARS: [&str; 4] = [
    "PYSTOW_HOME",
    "HF_HOME",
    "TRANSFORMERS_CACHE",
    "XDG_CACHE_HOME",
];

impl EngineConfig {
    /// Environment for the worker process. Points every cache the package
    /// and its dependencies know about at the model cache directory.
    pub fn worker_env(&self) -> HashMap<String, String> {
        let Some(dir) = &self.model_cache_dir else {
            return HashMap::new();
        };
        let dir = dir.to_string_lossy().into_owned();
        CACHE_ENV_VARS
            .iter()
            .map(|var| (var.to_string(), dir.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.module_names.is_empty() {
            return Err("engine.module_names must name at least one module".into());
        }
        if self.entry_points.is_empty() && self.factories.is_empty() {
            return Err("engine needs at least one entry point or factory".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadinessConfig {
    #[serde(default = "default_warmup_timeout_secs")]
    pub warmup_timeout_secs: u64,
    #[serde(default)]
    pub warmup_on_start: bool,
}

fn default_warmup_timeout_secs() -> u64 {
    900
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            warmup_timeout_secs: default_warmup_timeout_secs(),
            warmup_on_start: false,
        }
    }
}

impl ReadinessConfig {
    pub fn get_warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_probe_modules")]
    pub modules: Vec<String>,
}

fn default_probe_modules() -> Vec<String> {
    vec![
        "DECIMER".into(),
        "decimer".into(),
        "tensorflow".into(),
        "PIL".into(),
        "pystow".into(),
    ]
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            modules: default_probe_modules(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config
        .engine
        .validate()
        .map_err(config::ConfigError::Message)?;

    Ok(config)
}
