//! Runtime namespace and version identifiers.

use sbor::prelude::*;
use std::fmt;

/// Opaque runtime namespace: a fixed-size byte identifier for a runtime's
/// chain. Every block header and storage root is scoped to one namespace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BasicSbor)]
#[sbor(transparent)]
pub struct Namespace(pub [u8; 32]);

impl Namespace {
    /// Construct a namespace from raw bytes.
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes as a slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "Namespace({}..)", &hex[..8])
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A runtime version.
///
/// The sandbox provisioner refuses to commit a runtime whose reported version
/// differs from the configured one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    /// Construct a version from its components.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::from_raw([0xab; 32]);
        assert!(ns.to_string().starts_with("abab"));
        assert_eq!(ns.to_string().len(), 64);
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(1, 2, 3) < Version::new(1, 3, 0));
        assert!(Version::new(2, 0, 0) > Version::new(1, 99, 99));
        assert_eq!(Version::new(0, 1, 0).to_string(), "0.1.0");
    }
}
