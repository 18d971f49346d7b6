use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectProxyConfig {
    pub destination_service_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub destination_service_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_service_address: String,
    pub local_service_port: u16,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,
}

/// The proxy settings a sidecar override may change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOverride {
    pub local_service_address: Option<String>,
    pub local_service_port: Option<u16>,
    pub config: Option<HashMap<String, Value>>,
    pub upstreams: Option<Vec<Upstream>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamDestType {
    Service,
    PreparedQuery,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstream {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_type: Option<UpstreamDestType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub destination_namespace: String,
    pub destination_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub datacenter: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_bind_address: String,
    pub local_bind_port: u16,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, Value>,
}

/// Completes partially specified upstreams before they are attached to a
/// sidecar.
pub trait UpstreamDefaulter: Send + Sync {
    fn fill_defaults(&self, upstreams: Vec<Upstream>) -> Vec<Upstream>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultUpstreams;

impl UpstreamDefaulter for DefaultUpstreams {
    fn fill_defaults(&self, upstreams: Vec<Upstream>) -> Vec<Upstream> {
        upstreams
            .into_iter()
            .map(|mut upstream| {
                upstream
                    .destination_type
                    .get_or_insert(UpstreamDestType::Service);
                upstream
            })
            .collect()
    }
}
