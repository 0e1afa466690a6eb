//! Routing engine: consumers, dispatch and reconciliation.
//!
//! ```text
//! change feed ──► Orchestrator ──► ConsumerRegistry
//!                                     │
//!                                     └── BusConsumer ──► Dispatcher ──► NotificationTransport
//! ```

pub mod consumer;
pub mod dispatcher;
pub mod orchestrator;
pub mod registry;
pub mod snapshot;
pub mod template;

pub use consumer::{BusConsumer, ConsumerError, ConsumerState};
pub use dispatcher::{DispatchError, Dispatcher};
pub use orchestrator::{Orchestrator, OrchestratorError, ReconcileError, Reconciled};
pub use registry::{ConsumerInfo, ConsumerRegistry, FilterSlot};
pub use snapshot::{Subscriber, SubscriberSnapshot};
pub use template::{RenderError, render, render_context};
