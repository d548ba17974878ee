//! Message model, framing, method table and inbound dispatch.

pub mod codec;
pub(crate) mod dispatch;
pub mod message;
pub mod method;
pub mod registry;

pub use codec::{encode, FrameDecoder};
pub use message::{CorrelationId, ErrorObject, Message};
pub use method::{fnv1a64, method_hash, methods, MethodName};
pub use registry::{
    EchoMethod, MethodDescriptor, MethodHandler, MethodRegistry, MethodRegistryBuilder, Reply,
    Request,
};
