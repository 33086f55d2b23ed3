//! Actor-style runtime for statically wired graphs of message-driven cells.
//!
//! Nodes and filters are built from textual wiring declarations, resolved
//! once into direct references, and driven by a cooperative scheduler that
//! drains one batch of messages per tick.
pub mod address;
pub mod config;
pub mod error;
pub mod filter;
pub mod logger;
pub mod message;
pub mod model;
pub mod node;
pub mod resolve_queue;
pub mod runtime;
pub mod scaffold;
pub mod tx;
pub mod wiring;

pub use address::{ActorId, Hix};
pub use config::RuntimeConfig;
pub use error::{ModelError, ReplyError, TxError, WiringError};
pub use filter::{Broadcast, FilterCell, FilterFactory, Selection};
pub use node::{Cell, CellContext, CellFactory, HandlerCell};
pub use resolve_queue::{Reply, ReplyHandle, Slot};
pub use runtime::{Regime, RunState, Runtime, RuntimeControl};
pub use scaffold::{FilterDescriptor, NodeDescriptor, scaffold, scaffold_with};
pub use tx::Tx;
