pub mod checks;
pub mod meta;
pub mod port;

use crate::service::check::CheckError;
use crate::service::proxy::UpstreamDefaulter;
use crate::service::{CheckType, ConnectProxyConfig, NodeService, ServiceKind, SidecarOverride};
use std::collections::HashSet;
use tracing::debug;

pub use port::PortRange;

pub const SIDECAR_SUFFIX: &str = "-sidecar-proxy";
pub const DEFAULT_LOCAL_SERVICE_ADDRESS: &str = "127.0.0.1";

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum SidecarError {
    #[error("invalid meta for key {key:?}: Key prefix '{}' is reserved for internal use", meta::RESERVED_PREFIX)]
    ReservedMetaKey { key: String },
    #[error("invalid meta: {reason}")]
    InvalidMeta { reason: String },
    #[error("invalid sidecar_service check: {0}")]
    InvalidCheck(#[from] CheckError),
    #[error("no port provided for sidecar_service and auto-assignment disabled in config")]
    AllocationDisabled,
    #[error("no port provided for sidecar_service and none left in the configured range [{min}, {max}]")]
    RangeExhausted { min: u16, max: u16 },
}

/// A port some registered service listens on, as seen in a registry snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisteredPort {
    pub service_id: String,
    pub port: u16,
}

/// Everything needed to register the sidecar of a service.
#[derive(Clone, Debug, PartialEq)]
pub struct SidecarRegistration {
    pub service: NodeService,
    pub checks: Vec<CheckType>,
    pub token: String,
}

pub fn sidecar_service_id(parent_id: &str) -> String {
    format!("{}{}", parent_id, SIDECAR_SUFFIX)
}

/// Derives sidecar registrations from parent services and their overrides.
pub struct Resolver<'a> {
    ports: PortRange,
    upstreams: &'a dyn UpstreamDefaulter,
}

impl<'a> Resolver<'a> {
    pub fn new(ports: PortRange, upstreams: &'a dyn UpstreamDefaulter) -> Self {
        Self { ports, upstreams }
    }

    /// Builds the sidecar for `parent`, or `None` when no sidecar was asked
    /// for.
    ///
    /// `registered` is a snapshot of the ports every currently registered
    /// service uses. The caller has to keep that snapshot valid until the
    /// result is committed, nothing here takes a lock.
    pub fn resolve(
        &self,
        parent: &NodeService,
        sidecar: Option<&SidecarOverride>,
        token: &str,
        registered: &[RegisteredPort],
    ) -> Result<Option<SidecarRegistration>, SidecarError> {
        let sidecar = match sidecar {
            Some(s) => s,
            None => return Ok(None),
        };

        // user meta is checked before the marker key is injected below
        meta::validate_meta(&sidecar.meta)?;
        if let Some(check) = sidecar.custom_check() {
            check.validate()?;
        }

        let id = sidecar_service_id(&parent.id);
        let port = match sidecar.port.explicit() {
            Some(port) => port,
            None => self.auto_port(&id, registered)?,
        };

        let mut meta = sidecar.meta.clone();
        meta.insert(meta::SIDECAR_KEY.to_owned(), meta::SIDECAR_VALUE.to_owned());

        let service = NodeService {
            kind: ServiceKind::ConnectProxy,
            service: sidecar
                .name
                .clone()
                .unwrap_or_else(|| format!("{}{}", parent.service, SIDECAR_SUFFIX)),
            id,
            tags: sidecar.tags.clone().unwrap_or_default(),
            address: sidecar.address.clone().unwrap_or_default(),
            meta,
            port,
            enable_tag_override: sidecar.enable_tag_override.unwrap_or(false),
            proxy: Some(self.proxy_config(parent, sidecar)),
        };

        let checks = checks::synthesize(port, &parent.id, sidecar.custom_check())?;
        let token = sidecar.custom_token().unwrap_or(token).to_owned();

        debug!(
            parent = parent.id.as_str(),
            sidecar = service.id.as_str(),
            port,
            "Resolved sidecar service"
        );

        Ok(Some(SidecarRegistration {
            service,
            checks,
            token,
        }))
    }

    /// A sidecar that already holds a port inside the range keeps it as long
    /// as no other service uses that port, anything else gets the lowest port
    /// nobody else is using.
    fn auto_port(&self, sidecar_id: &str, registered: &[RegisteredPort]) -> Result<u16, SidecarError> {
        let mut used = HashSet::new();
        let mut previous = None;

        for other in registered.iter().filter(|r| self.ports.contains(r.port)) {
            if other.service_id == sidecar_id {
                previous = Some(other.port);
            } else {
                used.insert(other.port);
            }
        }

        match previous {
            Some(port) if !used.contains(&port) => Ok(port),
            _ => self.ports.allocate(&used),
        }
    }

    fn proxy_config(&self, parent: &NodeService, sidecar: &SidecarOverride) -> ConnectProxyConfig {
        let mut proxy = ConnectProxyConfig {
            destination_service_name: parent.service.clone(),
            destination_service_id: parent.id.clone(),
            local_service_address: DEFAULT_LOCAL_SERVICE_ADDRESS.to_owned(),
            local_service_port: parent.port,
            ..Default::default()
        };

        if let Some(custom) = &sidecar.proxy {
            if let Some(address) = &custom.local_service_address {
                proxy.local_service_address = address.clone();
            }
            if let Some(port) = custom.local_service_port {
                proxy.local_service_port = port;
            }
            if let Some(config) = &custom.config {
                proxy.config = config.clone();
            }
            if let Some(upstreams) = &custom.upstreams {
                proxy.upstreams = self.upstreams.fill_defaults(upstreams.clone());
            }
        }

        proxy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::proxy::{DefaultUpstreams, ProxyOverride, Upstream, UpstreamDestType};
    use crate::service::RequestedPort;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn web() -> NodeService {
        NodeService {
            id: "web1".into(),
            service: "web".into(),
            port: 1111,
            ..Default::default()
        }
    }

    fn single_port() -> PortRange {
        PortRange::new(2222, 2222).expect("valid range")
    }

    fn test_upstreams() -> Vec<Upstream> {
        vec![
            Upstream {
                destination_name: "db".into(),
                local_bind_port: 9191,
                ..Default::default()
            },
            Upstream {
                destination_type: Some(UpstreamDestType::PreparedQuery),
                destination_name: "geo-cache".into(),
                local_bind_port: 8181,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_no_sidecar() -> TestResult {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);

        assert_eq!(None, resolver.resolve(&web(), None, "foo", &[])?);

        Ok(())
    }

    #[test]
    fn test_all_the_defaults() -> TestResult {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);

        let got = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &[])?
            .ok_or("expected a sidecar")?;

        let mut meta = HashMap::new();
        meta.insert("consul-sidecar".to_owned(), "y".to_owned());
        assert_eq!(
            NodeService {
                kind: ServiceKind::ConnectProxy,
                id: "web1-sidecar-proxy".into(),
                service: "web-sidecar-proxy".into(),
                port: 2222,
                meta,
                proxy: Some(ConnectProxyConfig {
                    destination_service_name: "web".into(),
                    destination_service_id: "web1".into(),
                    local_service_address: "127.0.0.1".into(),
                    local_service_port: 1111,
                    ..Default::default()
                }),
                ..Default::default()
            },
            got.service
        );
        assert_eq!(
            vec![
                CheckType {
                    name: "Connect Sidecar Listening".into(),
                    tcp: "127.0.0.1:2222".into(),
                    interval: Duration::from_secs(10),
                    ..Default::default()
                },
                CheckType {
                    name: "Connect Sidecar Aliasing web1".into(),
                    alias_service: "web1".into(),
                    ..Default::default()
                },
            ],
            got.checks
        );
        assert_eq!("foo", got.token);

        Ok(())
    }

    #[test]
    fn test_all_the_allowed_overrides() -> TestResult {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let custom_check = CheckType {
            script_args: vec!["sleep".into(), "1".into()],
            interval: Duration::from_secs(999),
            ..Default::default()
        };
        let mut config = HashMap::new();
        config.insert("baz".to_owned(), json!("qux"));
        let mut user_meta = HashMap::new();
        user_meta.insert("foo".to_owned(), "bar".to_owned());

        let sidecar = SidecarOverride {
            name: Some("motorbike1".into()),
            port: RequestedPort::new(3333),
            tags: Some(vec!["foo".into(), "bar".into()]),
            address: Some("127.127.127.127".into()),
            meta: user_meta,
            enable_tag_override: Some(true),
            proxy: Some(ProxyOverride {
                local_service_address: Some("127.0.127.0".into()),
                local_service_port: Some(9999),
                config: Some(config.clone()),
                upstreams: Some(test_upstreams()),
            }),
            token: Some("custom-token".into()),
            check: Some(custom_check.clone()),
        };

        let got = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])?
            .ok_or("expected a sidecar")?;

        let mut meta = HashMap::new();
        meta.insert("foo".to_owned(), "bar".to_owned());
        meta.insert("consul-sidecar".to_owned(), "y".to_owned());
        assert_eq!(
            NodeService {
                kind: ServiceKind::ConnectProxy,
                id: "web1-sidecar-proxy".into(),
                service: "motorbike1".into(),
                port: 3333,
                tags: vec!["foo".into(), "bar".into()],
                address: "127.127.127.127".into(),
                meta,
                enable_tag_override: true,
                proxy: Some(ConnectProxyConfig {
                    destination_service_name: "web".into(),
                    destination_service_id: "web1".into(),
                    local_service_address: "127.0.127.0".into(),
                    local_service_port: 9999,
                    config,
                    upstreams: DefaultUpstreams.fill_defaults(test_upstreams()),
                }),
            },
            got.service
        );
        assert_eq!(vec![custom_check], got.checks);
        assert_eq!("custom-token", got.token);

        Ok(())
    }

    #[test]
    fn test_no_auto_ports_available() {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let registered = vec![RegisteredPort {
            service_id: "api-proxy-sidecar".into(),
            port: 2222,
        }];

        let err = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &registered)
            .unwrap_err();

        assert_eq!(SidecarError::RangeExhausted { min: 2222, max: 2222 }, err);
        assert!(err
            .to_string()
            .contains("none left in the configured range [2222, 2222]"));
    }

    #[test]
    fn test_auto_ports_disabled() {
        let resolver = Resolver::new(PortRange::disabled(), &DefaultUpstreams);

        let err = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &[])
            .unwrap_err();

        assert_eq!(SidecarError::AllocationDisabled, err);
        assert!(err.to_string().contains("auto-assignment disabled in config"));
    }

    #[test]
    fn test_explicit_port_skips_allocation() -> TestResult {
        let resolver = Resolver::new(PortRange::disabled(), &DefaultUpstreams);
        let sidecar = SidecarOverride {
            port: RequestedPort::new(4444),
            ..Default::default()
        };

        let got = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])?
            .ok_or("expected a sidecar")?;
        assert_eq!(4444, got.service.port);
        assert_eq!("127.0.0.1:4444", got.checks[0].tcp);

        Ok(())
    }

    #[test]
    fn test_lowest_free_port_in_range() -> TestResult {
        let resolver = Resolver::new(PortRange::new(21000, 21005)?, &DefaultUpstreams);
        let registered = vec![
            RegisteredPort {
                service_id: "db".into(),
                port: 5432,
            },
            RegisteredPort {
                service_id: "api1-sidecar-proxy".into(),
                port: 21000,
            },
            RegisteredPort {
                service_id: "cache1-sidecar-proxy".into(),
                port: 21001,
            },
            RegisteredPort {
                service_id: "other-sidecar-proxy".into(),
                port: 21003,
            },
        ];

        let got = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &registered)?
            .ok_or("expected a sidecar")?;
        assert_eq!(21002, got.service.port);

        Ok(())
    }

    #[test]
    fn test_reregistration_keeps_port() -> TestResult {
        let resolver = Resolver::new(PortRange::new(21000, 21005)?, &DefaultUpstreams);
        let registered = vec![
            RegisteredPort {
                service_id: "api1-sidecar-proxy".into(),
                port: 21000,
            },
            RegisteredPort {
                service_id: "web1-sidecar-proxy".into(),
                port: 21004,
            },
        ];

        let got = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &registered)?
            .ok_or("expected a sidecar")?;
        assert_eq!(21004, got.service.port);

        Ok(())
    }

    #[test]
    fn test_previous_port_taken_by_another_service() -> TestResult {
        let resolver = Resolver::new(PortRange::new(21000, 21005)?, &DefaultUpstreams);
        let registered = vec![
            RegisteredPort {
                service_id: "web1".into(),
                port: 21000,
            },
            RegisteredPort {
                service_id: "web1-sidecar-proxy".into(),
                port: 21000,
            },
        ];

        let got = resolver
            .resolve(&web(), Some(&SidecarOverride::default()), "foo", &registered)?
            .ok_or("expected a sidecar")?;
        assert_eq!(21001, got.service.port);

        Ok(())
    }

    #[test]
    fn test_invalid_check_type() {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let sidecar = SidecarOverride {
            check: Some(CheckType {
                tcp: "foo".into(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])
            .unwrap_err();
        assert!(err.to_string().contains("Interval must be > 0"));
    }

    #[test]
    fn test_invalid_check_reported_before_port_exhaustion() {
        let resolver = Resolver::new(PortRange::disabled(), &DefaultUpstreams);
        let sidecar = SidecarOverride {
            check: Some(CheckType {
                tcp: "foo".into(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])
            .unwrap_err();
        assert!(matches!(err, SidecarError::InvalidCheck(_)));
    }

    #[test]
    fn test_invalid_meta() {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let mut meta = HashMap::new();
        meta.insert(
            "consul-reserved-key-should-be-rejected".to_owned(),
            "true".to_owned(),
        );
        let sidecar = SidecarOverride {
            meta,
            check: Some(CheckType {
                tcp: "foo".into(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])
            .unwrap_err();
        assert!(matches!(err, SidecarError::ReservedMetaKey { .. }));
        assert!(err.to_string().contains("reserved for internal use"));
    }

    #[test]
    fn test_empty_override_token_falls_back_to_caller() -> TestResult {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let sidecar = SidecarOverride {
            token: Some(String::new()),
            ..Default::default()
        };

        let got = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])?
            .ok_or("expected a sidecar")?;
        assert_eq!("foo", got.token);

        Ok(())
    }

    #[test]
    fn test_partial_proxy_override() -> TestResult {
        let resolver = Resolver::new(single_port(), &DefaultUpstreams);
        let sidecar = SidecarOverride {
            proxy: Some(ProxyOverride {
                local_service_port: Some(8080),
                ..Default::default()
            }),
            ..Default::default()
        };

        let got = resolver
            .resolve(&web(), Some(&sidecar), "foo", &[])?
            .ok_or("expected a sidecar")?;
        let proxy = got.service.proxy.ok_or("expected proxy config")?;
        assert_eq!("127.0.0.1", proxy.local_service_address);
        assert_eq!(8080, proxy.local_service_port);
        assert_eq!("web1", proxy.destination_service_id);
        assert!(proxy.upstreams.is_empty());

        Ok(())
    }
}
