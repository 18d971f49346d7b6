use super::SidecarError;
use std::collections::HashSet;

/// Inclusive range sidecar ports are picked from. `0..=0` turns automatic
/// assignment off.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortRange {
    min: u16,
    max: u16,
}

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum PortRangeError {
    #[error("sidecar_min_port {min} must be <= sidecar_max_port {max}")]
    Inverted { min: u16, max: u16 },
    #[error("sidecar_min_port and sidecar_max_port must both be zero or both be non-zero, got [{min}, {max}]")]
    HalfDisabled { min: u16, max: u16 },
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self, PortRangeError> {
        if (min == 0) != (max == 0) {
            return Err(PortRangeError::HalfDisabled { min, max });
        }
        if min > max {
            return Err(PortRangeError::Inverted { min, max });
        }

        Ok(Self { min, max })
    }

    pub fn disabled() -> Self {
        Self { min: 0, max: 0 }
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn is_disabled(&self) -> bool {
        self.min == 0 && self.max == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        !self.is_disabled() && (self.min..=self.max).contains(&port)
    }

    /// Lowest port of the range that is not in `used`.
    pub fn allocate(&self, used: &HashSet<u16>) -> Result<u16, SidecarError> {
        if self.is_disabled() {
            return Err(SidecarError::AllocationDisabled);
        }

        (self.min..=self.max)
            .find(|port| !used.contains(port))
            .ok_or(SidecarError::RangeExhausted {
                min: self.min,
                max: self.max,
            })
    }
}
