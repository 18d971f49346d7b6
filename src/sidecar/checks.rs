use super::SidecarError;
use crate::service::CheckType;
use std::time::Duration;

pub const LISTENING_CHECK_NAME: &str = "Connect Sidecar Listening";
pub const LISTENING_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const LISTENING_CHECK_HOST: &str = "127.0.0.1";

/// Health checks for a sidecar listening on `port` in front of `parent_id`.
///
/// A non-empty `custom` check replaces the defaults entirely.
pub fn synthesize(
    port: u16,
    parent_id: &str,
    custom: Option<&CheckType>,
) -> Result<Vec<CheckType>, SidecarError> {
    match custom.filter(|check| !check.is_empty()) {
        Some(check) => {
            check.validate()?;
            Ok(vec![check.clone()])
        }
        None => Ok(default_checks(port, parent_id)),
    }
}

fn default_checks(port: u16, parent_id: &str) -> Vec<CheckType> {
    vec![
        CheckType {
            name: LISTENING_CHECK_NAME.to_owned(),
            tcp: format!("{}:{}", LISTENING_CHECK_HOST, port),
            interval: LISTENING_CHECK_INTERVAL,
            ..Default::default()
        },
        CheckType {
            name: format!("Connect Sidecar Aliasing {}", parent_id),
            alias_service: parent_id.to_owned(),
            ..Default::default()
        },
    ]
}
