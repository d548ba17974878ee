//! Method names and their dispatch hash.
//!
//! Method names are resolved through a 64-bit FNV-1a hash. The hash is a
//! `const fn`, so the names the engine knows about are hashed at compile time
//! and incoming names are hashed once per parsed message.

use std::fmt;

pub const FNV1A64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV1A64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit.
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A64_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV1A64_PRIME);
        i += 1;
    }
    hash
}

/// Hash of a method name as used by the registry.
pub fn method_hash(name: &str) -> u64 {
    fnv1a64(name.as_bytes())
}

/// A method name paired with its precomputed hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodName {
    name: &'static str,
    hash: u64,
}

impl MethodName {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            hash: fnv1a64(name.as_bytes()),
        }
    }

    pub const fn as_str(&self) -> &'static str {
        self.name
    }

    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Methods spoken by policy agents and their servers.
pub mod methods {
    use super::MethodName;

    pub const ECHO: MethodName = MethodName::new("echo");
    pub const SEND_IDENTITY: MethodName = MethodName::new("send_identity");
    pub const POLICY_RESOLVE: MethodName = MethodName::new("policy_resolve");
    pub const POLICY_UNRESOLVE: MethodName = MethodName::new("policy_unresolve");
    pub const POLICY_UPDATE: MethodName = MethodName::new("policy_update");
    pub const ENDPOINT_DECLARE: MethodName = MethodName::new("endpoint_declare");
    pub const ENDPOINT_UNDECLARE: MethodName = MethodName::new("endpoint_undeclare");
    pub const ENDPOINT_RESOLVE: MethodName = MethodName::new("endpoint_resolve");
    pub const ENDPOINT_UNRESOLVE: MethodName = MethodName::new("endpoint_unresolve");
    pub const ENDPOINT_UPDATE: MethodName = MethodName::new("endpoint_update");
    pub const STATE_REPORT: MethodName = MethodName::new("state_report");
    pub const CUSTOM: MethodName = MethodName::new("custom");

    pub const ALL: [MethodName; 12] = [
        ECHO,
        SEND_IDENTITY,
        POLICY_RESOLVE,
        POLICY_UNRESOLVE,
        POLICY_UPDATE,
        ENDPOINT_DECLARE,
        ENDPOINT_UNDECLARE,
        ENDPOINT_RESOLVE,
        ENDPOINT_UNRESOLVE,
        ENDPOINT_UPDATE,
        STATE_REPORT,
        CUSTOM,
    ];
}
