//! Worker orchestration
//!
//! - [`lifecycle`]: spawning, handshake, supervision and shutdown of workers
//! - [`registry`]: identity-indexed handles in registration order
//! - [`namespace`]: qualified `<identity>::<operation>` listings
//! - [`dispatcher`]: routing of qualified calls with error mapping
//! - [`facade`]: the [`Orchestrator`] entry point and its MCP tool surface

pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod handle;
pub mod lifecycle;
pub mod namespace;
pub mod registry;

pub use dispatcher::CallDispatcher;
pub use error::{DispatchError, ErrorPayload, StartupError};
pub use facade::{Orchestrator, OrchestratorTools};
pub use handle::{WorkerHandle, WorkerInfo};
pub use lifecycle::{LifecycleManager, LifecycleOptions};
pub use namespace::{NamespaceResolver, ServerSummary, ToolEntry};
pub use registry::SessionRegistry;
