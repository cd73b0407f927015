//! Immutable configuration and result types.

pub mod options;
pub mod result;

pub use options::{DEFAULT_MAX_REDIRECTS, TransferOptions, TransferRequest};
pub use result::{ErrorKind, TransferOutcome, TransferResult, TransferStatus};
