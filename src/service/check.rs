use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum CheckError {
    #[error("Interval and TTL cannot both be specified")]
    IntervalAndTtl,
    #[error("Interval must be > 0 for Script, HTTP, TCP or gRPC checks")]
    MissingInterval,
    #[error("TTL must be > 0 for TTL checks")]
    MissingTtl,
    #[error("TTL must not be set for Alias checks")]
    AliasWithTtl,
    #[error("Alias checks cannot also be Script, HTTP, TCP or gRPC checks")]
    AliasWithProbe,
}

/// Definition of a health check.
///
/// Exactly which kind of check it is follows from the fields that are set:
/// `script_args`, `http`, `tcp` and `grpc` poll every `interval`,
/// `alias_service` mirrors another service and anything else is a TTL check.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckType {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub script_args: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tcp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub grpc: String,
    #[serde(with = "humantime_serde", skip_serializing_if = "Duration::is_zero")]
    pub interval: Duration,
    #[serde(with = "humantime_serde", skip_serializing_if = "Duration::is_zero")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde", skip_serializing_if = "Duration::is_zero")]
    pub ttl: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias_service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alias_node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
}

impl CheckType {
    pub fn is_empty(&self) -> bool {
        *self == CheckType::default()
    }

    pub fn is_script(&self) -> bool {
        !self.script_args.is_empty()
    }

    pub fn is_alias(&self) -> bool {
        !self.alias_service.is_empty()
    }

    /// Checks that run a probe on every interval.
    pub fn is_polling(&self) -> bool {
        self.is_script() || !self.http.is_empty() || !self.tcp.is_empty() || !self.grpc.is_empty()
    }

    pub fn validate(&self) -> Result<(), CheckError> {
        let polling = self.is_polling();

        if !self.interval.is_zero() && !self.ttl.is_zero() {
            return Err(CheckError::IntervalAndTtl);
        }
        if polling && self.interval.is_zero() {
            return Err(CheckError::MissingInterval);
        }
        if self.is_alias() {
            if !self.ttl.is_zero() {
                return Err(CheckError::AliasWithTtl);
            }
            if polling {
                return Err(CheckError::AliasWithProbe);
            }
        }
        if !polling && !self.is_alias() && self.ttl.is_zero() {
            return Err(CheckError::MissingTtl);
        }

        Ok(())
    }
}

/// A check as committed to the local registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub check_id: String,
    pub name: String,
    pub service_id: String,
    pub service_name: String,
    pub definition: CheckType,
}

impl HealthCheck {
    /// Turns the checks of one service into registry entries. A lone check
    /// gets `service:<id>`, several are numbered from 1.
    pub fn for_service(service_id: &str, service_name: &str, checks: Vec<CheckType>) -> Vec<Self> {
        let numbered = checks.len() > 1;

        checks
            .into_iter()
            .enumerate()
            .map(|(i, definition)| {
                let check_id = if numbered {
                    format!("service:{}:{}", service_id, i + 1)
                } else {
                    format!("service:{}", service_id)
                };
                let name = if definition.name.is_empty() {
                    format!("Service '{}' check", service_name)
                } else {
                    definition.name.clone()
                };

                HealthCheck {
                    check_id,
                    name,
                    service_id: service_id.to_owned(),
                    service_name: service_name.to_owned(),
                    definition,
                }
            })
            .collect()
    }
}
