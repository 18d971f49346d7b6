use crate::service::{HealthCheck, NodeService};
use crate::sidecar::RegisteredPort;
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct ServiceState {
    service: NodeService,
    token: String,
}

/// Services and checks registered with this agent.
#[derive(Debug, Default)]
pub struct LocalState {
    services: HashMap<String, ServiceState>,
    checks: HashMap<String, HealthCheck>,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a service. Checks of a replaced service are dropped.
    pub fn add_service(&mut self, service: NodeService, token: String) {
        let id = service.id.clone();

        if self
            .services
            .insert(id.clone(), ServiceState { service, token })
            .is_some()
        {
            self.remove_checks_for(&id);
        }
    }

    pub fn remove_service(&mut self, id: &str) -> Option<NodeService> {
        let removed = self.services.remove(id)?;
        self.remove_checks_for(id);

        Some(removed.service)
    }

    pub fn service(&self, id: &str) -> Option<&NodeService> {
        self.services.get(id).map(|s| &s.service)
    }

    pub fn services(&self) -> impl Iterator<Item = &NodeService> {
        self.services.values().map(|s| &s.service)
    }

    pub fn service_token(&self, id: &str) -> Option<&str> {
        self.services.get(id).map(|s| s.token.as_str())
    }

    pub fn add_check(&mut self, check: HealthCheck) {
        self.checks.insert(check.check_id.clone(), check);
    }

    pub fn checks_for(&self, service_id: &str) -> Vec<&HealthCheck> {
        let mut checks: Vec<&HealthCheck> = self
            .checks
            .values()
            .filter(|c| c.service_id == service_id)
            .collect();
        checks.sort_by(|a, b| a.check_id.cmp(&b.check_id));

        checks
    }

    /// Ports of every registered service, ordered by service ID.
    pub fn registered_ports(&self) -> Vec<RegisteredPort> {
        let mut ports: Vec<RegisteredPort> = self
            .services()
            .map(|s| RegisteredPort {
                service_id: s.id.clone(),
                port: s.port,
            })
            .collect();
        ports.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        ports
    }

    fn remove_checks_for(&mut self, service_id: &str) {
        self.checks.retain(|_, c| c.service_id != service_id);
    }
}
