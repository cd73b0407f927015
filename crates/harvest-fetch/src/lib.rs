//! Resumable, integrity-checked and SSRF-guarded payload transfer.
//!
//! # Architecture
//!
//! This crate follows the three-layer pattern:
//! - [`data`] - Immutable request, option and result types
//! - [`core`] - Pure transformations (retry classification, header parsing)
//! - [`net`], [`rate`], [`budget`], [`fetch`] - I/O and shared run state behind traits
//!
//! # Key Features
//!
//! - **Single-Pass**: bytes are hashed while they stream into `<dest>.part`
//! - **Atomic Placement**: only a validated part file is renamed onto `dest`
//! - **Resume**: `Range` requests continue an interrupted part file, with the
//!   prefix re-hashed so the final digest covers the whole file
//! - **SSRF-Safe**: every redirect hop is validated before it is followed and
//!   the whole chain again after the body is streamed
//! - **Mechanism-Only**: callers own the budget and limiter policy they pass in

pub mod budget;
pub mod core;
pub mod data;
mod error;
pub mod fetch;
pub mod net;
pub mod rate;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use budget::{BudgetError, BudgetScope, ByteBudget, TargetBudget};
pub use core::{RetryPolicy, filename_from_url, is_redirect};
pub use data::{ErrorKind, TransferOptions, TransferOutcome, TransferRequest, TransferResult, TransferStatus};
pub use error::{FetchError, Result};
pub use fetch::{FtpTransfer, ResumableTransfer};
pub use net::{HttpClient, HttpClientOptions, HttpResponse, UrlPolicy, UrlSafetyValidator};
#[cfg(feature = "reqwest")]
pub use net::ReqwestClient;
pub use rate::{Clock, LimiterConfig, LimiterRegistry, ManualClock, SystemClock, TokenBucket};
