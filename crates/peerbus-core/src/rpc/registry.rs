//! Immutable method table.
//!
//! A [`MethodRegistry`] maps the FNV-1a hash of a method name to the handler
//! for that method. It is assembled once through [`MethodRegistryBuilder`],
//! which rejects two names that share a hash, and never changes afterwards.

use super::message::{CorrelationId, ErrorObject};
use super::method::{method_hash, methods, MethodName};
use crate::error::{CommsError, Result};
use crate::peer::PeerHandle;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// An inbound Request as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: CorrelationId,
    pub method: String,
    pub params: Value,
}

/// What a request handler wants sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error(Value),
    /// Nothing now; the handler may answer later through the peer handle.
    None,
}

impl Reply {
    pub fn error(error: ErrorObject) -> Self {
        Reply::Error(error.to_value())
    }
}

/// Callbacks for one method.
///
/// All callbacks run on the reactor thread and must not block.
pub trait MethodHandler: Send + Sync + 'static {
    fn on_request(&self, peer: &PeerHandle, request: &Request) -> Reply {
        debug!(
            "Peer {} sent request {} for {} which takes no requests",
            peer.id(),
            request.id,
            request.method
        );
        Reply::error(ErrorObject::new(
            ErrorObject::METHOD_NOT_FOUND,
            format!("Method {} does not accept requests", request.method),
        ))
    }

    fn on_result(&self, peer: &PeerHandle, id: &CorrelationId, result: &Value) {
        debug!("Peer {} result for {}: {}", peer.id(), id, result);
    }

    fn on_error(&self, peer: &PeerHandle, id: &CorrelationId, error: &Value) {
        warn!("Peer {} error for {}: {}", peer.id(), id, error);
    }
}

/// Replies to every `echo` request with its params.
#[derive(Debug, Default)]
pub struct EchoMethod;

impl MethodHandler for EchoMethod {
    fn on_request(&self, _peer: &PeerHandle, request: &Request) -> Reply {
        Reply::Result(request.params.clone())
    }

    fn on_result(&self, peer: &PeerHandle, id: &CorrelationId, _result: &Value) {
        debug!("Peer {} echo {} answered", peer.id(), id);
    }
}

struct RequestFn<F>(F);

impl<F> MethodHandler for RequestFn<F>
where
    F: Fn(&PeerHandle, &Request) -> Reply + Send + Sync + 'static,
{
    fn on_request(&self, peer: &PeerHandle, request: &Request) -> Reply {
        (self.0)(peer, request)
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub hash: u64,
    pub handler: Arc<dyn MethodHandler>,
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("hash", &format_args!("{:#018x}", self.hash))
            .finish()
    }
}

/// Keys are already FNV-1a output, so they are used as-is.
#[derive(Default)]
struct PrehashedHasher(u64);

impl Hasher for PrehashedHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = (self.0 << 8) | u64::from(b);
        }
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
}

type MethodTable = HashMap<u64, MethodDescriptor, BuildHasherDefault<PrehashedHasher>>;

/// Hash-to-handler table, fixed after construction.
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    methods: MethodTable,
}

impl MethodRegistry {
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder::new()
    }

    /// Look up a method by name hash.
    pub fn resolve(&self, hash: u64) -> Option<&MethodDescriptor> {
        self.methods.get(&hash)
    }

    pub fn resolve_name(&self, name: &str) -> Option<&MethodDescriptor> {
        self.resolve(method_hash(name))
            .filter(|descriptor| descriptor.name == name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.values().map(|d| d.name.as_str())
    }
}

/// Collects methods and validates them into a [`MethodRegistry`].
pub struct MethodRegistryBuilder {
    entries: Vec<(String, Arc<dyn MethodHandler>)>,
    hash_fn: fn(&str) -> u64,
}

impl Default for MethodRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistryBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            hash_fn: method_hash,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_hash_fn(mut self, hash_fn: fn(&str) -> u64) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Add the built-in `echo` method.
    pub fn echo(self) -> Self {
        self.register(methods::ECHO, EchoMethod)
    }

    pub fn register<H: MethodHandler>(self, method: MethodName, handler: H) -> Self {
        self.method(method.as_str(), handler)
    }

    pub fn method<H: MethodHandler>(mut self, name: impl Into<String>, handler: H) -> Self {
        self.entries.push((name.into(), Arc::new(handler)));
        self
    }

    /// Register a method from a request closure.
    pub fn request_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&PeerHandle, &Request) -> Reply + Send + Sync + 'static,
    {
        self.method(name, RequestFn(f))
    }

    pub fn build(self) -> Result<MethodRegistry> {
        let mut methods = MethodTable::default();

        for (name, handler) in self.entries {
            if name.is_empty() {
                return Err(CommsError::Config {
                    message: "method name must not be empty".to_string(),
                });
            }

            let hash = (self.hash_fn)(&name);
            if let Some(existing) = methods.get(&hash) {
                if existing.name == name {
                    return Err(CommsError::Config {
                        message: format!("method {} registered twice", name),
                    });
                }
                return Err(CommsError::DuplicateMethodHash {
                    first: existing.name.clone(),
                    second: name,
                    hash,
                });
            }

            methods.insert(hash, MethodDescriptor { name, hash, handler });
        }

        Ok(MethodRegistry { methods })
    }
}
