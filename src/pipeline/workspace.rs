//! Scratch directory layout for one book.
//!
//! ```text
//! {root}/pdf/{lib}-{id}/
//!     checkpoint.json
//!     workdir/{output_key}.pdf
//!     covers/{Variant}.pdf
//!     Content.pdf
//! ```

use std::path::{Path, PathBuf};

use crate::models::BookId;
use crate::utils::remove_dir_if_exists;

#[derive(Debug, Clone)]
pub struct JobWorkspace {
    dir: PathBuf,
}

impl JobWorkspace {
    pub fn new(root: &Path, book: &BookId) -> Self {
        Self {
            dir: root.join("pdf").join(book.job_key()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.join("workdir")
    }

    pub fn artifact_path(&self, output_key: &str) -> PathBuf {
        self.scratch_dir().join(format!("{}.pdf", output_key))
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.dir.join("covers")
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join("Content.pdf")
    }

    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.scratch_dir()).await?;
        tokio::fs::create_dir_all(self.covers_dir()).await
    }

    pub async fn clear_scratch(&self) -> std::io::Result<()> {
        remove_dir_if_exists(&self.scratch_dir()).await
    }
}
