pub mod atomic_write;
pub mod staged;
pub mod tree;

pub use atomic_write::{AtomicWriteOptions, atomic_read, atomic_write};
pub use staged::{PART_SUFFIX, discard, discard_dir, part_path, publish};
pub use tree::{dir_size, list_files, safe_component};
