use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::descriptor::ProtocolKind;
use crate::engine_config::{BuildOptions, DEFAULT_SOCKS_PORT};
use crate::probe_engine::{DEFAULT_CONCURRENCY, EngineOptions};
use crate::validator::{DEFAULT_ENGINE, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub main: MainConfig,
    pub engine: EngineConfigSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MainConfig {
    /// Path or URL of the candidate list.
    pub input: String,
    /// Where accepted links are written.
    pub output: String,
    /// Seconds before a single engine run counts as timed out.
    pub timeout: u64,
    pub concurrent: usize,
    pub verbose: bool,
    pub protocols: Vec<ProtocolKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfigSection {
    /// Engine executable, looked up on PATH when not absolute.
    pub path: String,
    pub socks_port: u16,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Invalid config file {}", path))?;
        Ok(config)
    }

    pub fn generate_default_toml() -> String {
        toml::to_string_pretty(&Self::default()).expect("serialize default config")
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            concurrency: self.main.concurrent.max(1),
            timeout: Duration::from_secs(self.main.timeout),
            build: BuildOptions {
                socks_port: self.engine.socks_port,
                protocols: self.main.protocols.clone(),
            },
        }
    }
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            input: "config.txt".into(),
            output: "valid.txt".into(),
            timeout: DEFAULT_TIMEOUT.as_secs(),
            concurrent: DEFAULT_CONCURRENCY,
            verbose: false,
            protocols: ProtocolKind::ALL.to_vec(),
        }
    }
}

impl Default for EngineConfigSection {
    fn default() -> Self {
        Self {
            path: DEFAULT_ENGINE.into(),
            socks_port: DEFAULT_SOCKS_PORT,
        }
    }
}
