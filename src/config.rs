use crate::sidecar::PortRange;
use crate::AppConfig;
use anyhow::Context;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub ports: Ports,
    pub service_definitions_path: Option<String>,
    #[serde(default)]
    pub tokens: Tokens,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct Ports {
    #[serde(default = "default_sidecar_min_port")]
    pub sidecar_min_port: u16,
    #[serde(default = "default_sidecar_max_port")]
    pub sidecar_max_port: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            sidecar_min_port: default_sidecar_min_port(),
            sidecar_max_port: default_sidecar_max_port(),
        }
    }
}

impl Ports {
    pub fn sidecar_range(&self) -> anyhow::Result<PortRange> {
        Ok(PortRange::new(self.sidecar_min_port, self.sidecar_max_port)?)
    }
}

fn default_sidecar_min_port() -> u16 {
    21000
}

fn default_sidecar_max_port() -> u16 {
    21255
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Tokens {
    #[serde(default)]
    pub default: String,
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    let config_path = get_config_path()?;
    let file = File::open(&config_path)
        .with_context(|| format!("Failed to open config file {}", &config_path))?;

    let config: Config = serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse config file {}", &config_path))?;
    config.ports.sidecar_range()?;

    Ok(Arc::new(config))
}

fn get_config_path() -> anyhow::Result<String> {
    use std::env;
    use tracing::info;

    env::var("APP_CONFIG").or_else(|e| {
        info!(
            error = format!("{:?}", e).as_str(),
            "Missing or invalid APP_CONFIG env var, fallback to config.yml"
        );
        Ok("config.yml".to_string())
    })
}
