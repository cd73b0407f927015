//! Content verification primitives for downloaded artifacts.
//!
//! Incremental hashing while bytes stream to disk, SHA-256 digest parsing for
//! declared checksums, and whole-file hashing for cache checks.
//!
//! # Example
//!
//! ```
//! use harvest_verify::{Hasher, Sha256Digest, Sha256Hasher};
//!
//! let expected: Sha256Digest =
//!     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".parse().unwrap();
//!
//! let mut hasher = Sha256Hasher::new();
//! hasher.update(b"hel");
//! hasher.update(b"lo");
//! expected.verify(&hasher.finalize()).unwrap();
//! ```

pub use self::digest::Sha256Digest;
pub use self::error::{Result, VerificationError};
pub use self::hasher::{Hasher, Sha256Hasher};
pub use self::reader::{VerifiedReader, sha256_file};

mod digest;
mod error;
mod hasher;
mod reader;
