use anyhow::Context;
use sidecar_agent::agent::Agent;
use sidecar_agent::config::load_config;
use sidecar_agent::service::ServiceDefinition;
use sidecar_agent::utils::{is_yaml, parse_files, scan_for_files};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::subscriber::set_global_default;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    set_global_default(subscriber)?;

    Ok(())
}

fn parse_service_definition(path: PathBuf) -> anyhow::Result<ServiceDefinition> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open service definition {}", path.display()))?;

    serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse service definition {}", path.display()))
}

async fn load_service_definitions(path: Option<&str>) -> anyhow::Result<Vec<ServiceDefinition>> {
    let path = match path {
        Some(path) => path,
        None => {
            info!("No service_definitions_path configured");
            return Ok(vec![]);
        }
    };

    let files = scan_for_files(path)
        .await
        .with_context(|| format!("Failed to scan {}", path))?
        .into_iter()
        .filter(|file| is_yaml(file))
        .collect();

    parse_files(files, parse_service_definition).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let config = load_config()?;

    let agent = Agent::from_config(&config)?;
    info!(
        sidecar_min_port = config.ports.sidecar_min_port,
        sidecar_max_port = config.ports.sidecar_max_port,
        "Agent ready"
    );

    let definitions = load_service_definitions(config.service_definitions_path.as_deref()).await?;

    for definition in definitions {
        match agent.add_service(&definition, &config.tokens.default).await {
            Ok(registration) => {
                if let Some(sidecar) = registration.sidecar {
                    info!(
                        service = registration.service.id.as_str(),
                        sidecar = sidecar.id.as_str(),
                        port = sidecar.port,
                        "Derived sidecar service"
                    );
                }
            }
            Err(e) => error!(
                service = definition.name.as_str(),
                error = e.to_string().as_str(),
                "Failed to register service"
            ),
        }
    }

    print!("{}", serde_yaml::to_string(&agent.services().await)?);

    Ok(())
}
