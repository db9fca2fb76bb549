//! Data shapes shared by every crate in the workspace: the protocol-neutral
//! operation and result types, the benchmark configuration, and the error
//! taxonomy.

pub mod config;
pub mod error;
pub mod operation;
pub mod result;
pub mod value;

pub use config::BenchmarkConfig;
pub use error::{ErrorKind, SurgeError};
pub use operation::Operation;
pub use result::OperationResult;
pub use value::ParamValue;
