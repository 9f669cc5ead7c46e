//! Shared utility functions.

mod fs;

pub use fs::{remove_dir_if_exists, write_atomic};
