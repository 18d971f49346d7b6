use super::SidecarError;
use std::collections::HashMap;

/// Prefix of meta keys the agent writes itself.
pub const RESERVED_PREFIX: &str = "consul-";
/// Marks services the agent registered as a sidecar of another service.
pub const SIDECAR_KEY: &str = "consul-sidecar";
pub const SIDECAR_VALUE: &str = "y";

pub const MAX_PAIRS: usize = 64;
pub const MAX_KEY_LEN: usize = 128;
pub const MAX_VALUE_LEN: usize = 512;

/// Validates user supplied service meta.
///
/// Must run before the agent injects its own `consul-` keys; the injected
/// keys would fail this check.
pub fn validate_meta(meta: &HashMap<String, String>) -> Result<(), SidecarError> {
    let mut keys: Vec<&String> = meta.keys().collect();
    keys.sort();

    if let Some(key) = keys.iter().find(|key| key.starts_with(RESERVED_PREFIX)) {
        return Err(SidecarError::ReservedMetaKey {
            key: (*key).clone(),
        });
    }

    if meta.len() > MAX_PAIRS {
        return Err(invalid(format!(
            "Node metadata cannot contain more than {} key/value pairs",
            MAX_PAIRS
        )));
    }

    for key in keys {
        if key.is_empty() {
            return Err(invalid("Key cannot be blank".to_owned()));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid(format!(
                "Key {:?} contains an invalid character, allowed are [A-Za-z0-9_-]",
                key
            )));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(invalid(format!(
                "Key {:?} is too long (limit: {} characters)",
                key, MAX_KEY_LEN
            )));
        }
        if meta[key].len() > MAX_VALUE_LEN {
            return Err(invalid(format!(
                "Value for key {:?} is too long (limit: {} characters)",
                key, MAX_VALUE_LEN
            )));
        }
    }

    Ok(())
}

fn invalid(reason: String) -> SidecarError {
    SidecarError::InvalidMeta { reason }
}
