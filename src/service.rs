pub mod check;
pub mod proxy;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

pub use check::{CheckType, HealthCheck};
pub use proxy::{ConnectProxyConfig, ProxyOverride, Upstream, UpstreamDestType};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceKind {
    #[default]
    Typical,
    ConnectProxy,
}

/// A service as it is held in the agent's local registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeService {
    pub kind: ServiceKind,
    pub id: String,
    pub service: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    pub port: u16,
    pub enable_tag_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ConnectProxyConfig>,
}

impl NodeService {
    pub fn is_connect_proxy(&self) -> bool {
        self.kind == ServiceKind::ConnectProxy
    }
}

/// A registration request as written by the user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    pub kind: ServiceKind,
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub meta: HashMap<String, String>,
    pub port: u16,
    pub enable_tag_override: bool,
    pub proxy: Option<ConnectProxyConfig>,
    pub checks: Vec<CheckType>,
    pub connect: Option<ServiceConnect>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConnect {
    pub sidecar_service: Option<SidecarOverride>,
}

impl ServiceDefinition {
    pub fn node_service(&self) -> NodeService {
        let id = if self.id.is_empty() {
            self.name.clone()
        } else {
            self.id.clone()
        };

        NodeService {
            kind: self.kind,
            id,
            service: self.name.clone(),
            tags: self.tags.clone(),
            address: self.address.clone(),
            meta: self.meta.clone(),
            port: self.port,
            enable_tag_override: self.enable_tag_override,
            proxy: self.proxy.clone(),
        }
    }

    pub fn sidecar_service(&self) -> Option<&SidecarOverride> {
        self.connect
            .as_ref()
            .and_then(|connect| connect.sidecar_service.as_ref())
    }
}

/// Listener port requested for a sidecar.
///
/// Zero is always read as "pick one from the sidecar port range". There is
/// no way to register a sidecar without a port; should that ever be needed
/// this type has to grow a third state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestedPort(u16);

impl RequestedPort {
    pub fn new(port: u16) -> Self {
        RequestedPort(port)
    }

    pub fn explicit(self) -> Option<u16> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0)
        }
    }
}

/// User supplied adjustments to the sidecar derived from a parent service.
///
/// `None` means "inherit the derived default". The sidecar's ID, kind and
/// proxy destination always come from the parent and cannot be expressed
/// here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarOverride {
    pub name: Option<String>,
    pub port: RequestedPort,
    pub tags: Option<Vec<String>>,
    pub address: Option<String>,
    pub meta: HashMap<String, String>,
    pub enable_tag_override: Option<bool>,
    pub proxy: Option<ProxyOverride>,
    pub token: Option<String>,
    pub check: Option<CheckType>,
}

impl SidecarOverride {
    /// The custom check, unless it was left at its zero value.
    pub fn custom_check(&self) -> Option<&CheckType> {
        self.check.as_ref().filter(|check| !check.is_empty())
    }

    /// The override token, unless it is missing or empty.
    pub fn custom_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.is_empty())
    }
}
