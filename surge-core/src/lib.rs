//! Protocol-agnostic core: the adapter and factory seams every protocol
//! implements, the execution engine that drives work through them, and the
//! template substitution pass used by request templates.

pub mod adapter;
pub mod engine;
pub mod factory;
pub mod template;

pub use adapter::ProtocolAdapter;
pub use engine::{Engine, RunSummary};
pub use factory::OperationFactory;
