pub mod local;

use crate::config::Config;
use crate::service::check::CheckError;
use crate::service::proxy::{DefaultUpstreams, UpstreamDefaulter};
use crate::service::{HealthCheck, NodeService, ServiceDefinition};
use crate::sidecar::{self, meta, PortRange, RegisteredPort, Resolver, SidecarError};
use local::LocalState;
use std::fmt;
use tokio::sync::Mutex;
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("Invalid service {id:?}: {reason}")]
    InvalidService { id: String, reason: String },
    #[error("Invalid check {index} of service {id:?}: {source}")]
    InvalidCheck {
        id: String,
        index: usize,
        source: CheckError,
    },
    #[error("Unknown service {0:?}")]
    UnknownService(String),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
}

/// Result of a successful registration.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    pub service: NodeService,
    pub sidecar: Option<NodeService>,
}

/// Registers services, and the sidecars they ask for, with the local state.
pub struct Agent {
    ports: PortRange,
    upstreams: Box<dyn UpstreamDefaulter>,
    state: Mutex<LocalState>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("ports", &self.ports).finish()
    }
}

impl Agent {
    pub fn new(ports: PortRange) -> Self {
        Self::with_upstream_defaulter(ports, Box::new(DefaultUpstreams))
    }

    pub fn with_upstream_defaulter(ports: PortRange, upstreams: Box<dyn UpstreamDefaulter>) -> Self {
        Self {
            ports,
            upstreams,
            state: Mutex::new(LocalState::new()),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(config.ports.sidecar_range()?))
    }

    /// Registers the service described by `definition` together with its
    /// sidecar, if one is requested.
    ///
    /// The state lock is held from reading the used ports until both services
    /// are committed, so concurrent registrations never pick the same port.
    /// Nothing is committed when any step fails.
    #[tracing::instrument(
        name = "Agent::add_service",
        skip(self, definition, token),
        fields(service = definition.name.as_str())
    )]
    pub async fn add_service(
        &self,
        definition: &ServiceDefinition,
        token: &str,
    ) -> Result<Registration, AgentError> {
        let service = definition.node_service();
        validate_service(&service, definition)?;

        let mut state = self.state.lock().await;

        // the incoming parent replaces whatever is registered under its ID
        let mut registered = state.registered_ports();
        registered.retain(|r| r.service_id != service.id);
        registered.push(RegisteredPort {
            service_id: service.id.clone(),
            port: service.port,
        });

        let resolver = Resolver::new(self.ports, self.upstreams.as_ref());
        let sidecar = resolver.resolve(&service, definition.sidecar_service(), token, &registered)?;

        let checks = HealthCheck::for_service(&service.id, &service.service, definition.checks.clone());
        state.add_service(service.clone(), token.to_owned());
        checks.into_iter().for_each(|c| state.add_check(c));

        info!(
            id = service.id.as_str(),
            port = service.port,
            "Registered service"
        );

        if sidecar.is_none() {
            if let Some(stale) = agent_sidecar_of(&state, &service.id) {
                state.remove_service(&stale);
                info!(
                    id = stale.as_str(),
                    parent = service.id.as_str(),
                    "Removed sidecar service no longer requested"
                );
            }
        }

        let sidecar = sidecar.map(|registration| {
            let sidecar_service = registration.service;
            let checks = HealthCheck::for_service(
                &sidecar_service.id,
                &sidecar_service.service,
                registration.checks,
            );

            state.add_service(sidecar_service.clone(), registration.token);
            checks.into_iter().for_each(|c| state.add_check(c));

            info!(
                id = sidecar_service.id.as_str(),
                parent = service.id.as_str(),
                port = sidecar_service.port,
                "Registered sidecar service"
            );

            sidecar_service
        });

        Ok(Registration { service, sidecar })
    }

    /// Deregisters a service and its checks. A sidecar the agent registered
    /// for it goes as well. Returns the IDs of all removed services.
    #[tracing::instrument(name = "Agent::remove_service", skip(self))]
    pub async fn remove_service(&self, id: &str) -> Result<Vec<String>, AgentError> {
        let mut state = self.state.lock().await;

        state
            .remove_service(id)
            .ok_or_else(|| AgentError::UnknownService(id.to_owned()))?;
        let mut removed = vec![id.to_owned()];

        if let Some(sidecar_id) = agent_sidecar_of(&state, id) {
            state.remove_service(&sidecar_id);
            removed.push(sidecar_id);
        }

        info!(removed = format!("{:?}", removed).as_str(), "Removed services");

        Ok(removed)
    }

    pub async fn service(&self, id: &str) -> Option<NodeService> {
        self.state.lock().await.service(id).cloned()
    }

    /// All registered services ordered by ID.
    pub async fn services(&self) -> Vec<NodeService> {
        let state = self.state.lock().await;
        let mut services: Vec<NodeService> = state.services().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));

        services
    }

    pub async fn checks_for(&self, service_id: &str) -> Vec<HealthCheck> {
        self.state
            .lock()
            .await
            .checks_for(service_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn service_token(&self, id: &str) -> Option<String> {
        self.state.lock().await.service_token(id).map(str::to_owned)
    }
}

/// ID of the sidecar the agent registered on behalf of `parent_id`, if any.
/// Services that merely reuse the sidecar ID without the marker don't count.
fn agent_sidecar_of(state: &LocalState, parent_id: &str) -> Option<String> {
    let sidecar_id = sidecar::sidecar_service_id(parent_id);

    state
        .service(&sidecar_id)
        .and_then(|s| s.meta.get(meta::SIDECAR_KEY))
        .filter(|v| v.as_str() == meta::SIDECAR_VALUE)
        .map(|_| sidecar_id)
}

fn validate_service(service: &NodeService, definition: &ServiceDefinition) -> Result<(), AgentError> {
    let invalid = |reason: String| AgentError::InvalidService {
        id: service.id.clone(),
        reason,
    };

    if service.service.is_empty() {
        return Err(invalid("Missing service name".to_owned()));
    }

    meta::validate_meta(&service.meta).map_err(|e| invalid(e.to_string()))?;

    if service.is_connect_proxy() {
        let destination = service
            .proxy
            .as_ref()
            .map(|p| p.destination_service_name.as_str())
            .unwrap_or_default();

        if destination.is_empty() {
            return Err(invalid(
                "Proxy.DestinationServiceName must be set for a Connect proxy".to_owned(),
            ));
        }
        if service.port == 0 {
            return Err(invalid("Port must be set for a Connect proxy".to_owned()));
        }
        if definition.sidecar_service().is_some() {
            return Err(invalid(
                "A Connect proxy cannot have a sidecar_service of its own".to_owned(),
            ));
        }
    }

    for (index, check) in definition.checks.iter().enumerate() {
        check.validate().map_err(|source| AgentError::InvalidCheck {
            id: service.id.clone(),
            index,
            source,
        })?;
    }

    Ok(())
}
