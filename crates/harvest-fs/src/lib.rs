//! Atomic filesystem primitives for staged downloads.
//!
//! - [`atomic_write`] for small records (manifests, markers, summaries)
//! - [`part_path`] / [`publish`] / [`discard`] for `.part` staging files
//! - [`list_files`] / [`dir_size`] for accounting tool-produced trees

mod error;
mod primitives;

pub use error::{Error, Result};
pub use primitives::{
    AtomicWriteOptions, PART_SUFFIX, atomic_read, atomic_write, dir_size, discard, discard_dir,
    list_files, part_path, publish, safe_component,
};
