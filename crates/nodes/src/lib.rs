//! `nodes` crate — the `ExecutableNode` trait, the node-type registry and
//! the built-in node implementations.
//!
//! Every node type must implement [`ExecutableNode`]. The engine looks
//! implementations up through [`NodeTypes`]; the supervisor only ever sees
//! the serialisable [`NodeTypeInfo`] metadata.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;
pub mod webhook;

pub use error::NodeError;
pub use registry::{CredentialTypeInfo, NodeTypeInfo, NodeTypes};
pub use traits::{ExecutableNode, ExecutionContext, StaticData, SubWorkflowRunner, UiMessageSink};
pub use webhook::{HttpMethod, ResponseMode, WebhookDescription};
