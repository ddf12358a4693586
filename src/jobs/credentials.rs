// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scoped temporary cookie file.
//!
//! yt-dlp only reads cookies from a file path, so inline cookie text from a
//! request is written to a uniquely named temporary file for the lifetime of
//! one job. On Unix the file is created with mode 0600. The file is removed
//! by [`CredentialFile::release`] or, failing that, on drop; a failed
//! removal is logged and otherwise ignored.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

#[derive(Debug)]
pub struct CredentialFile {
    file: Option<NamedTempFile>,
    path: PathBuf,
}

impl CredentialFile {
    /// Write `contents` to a fresh file in the system temp directory.
    pub fn create(contents: &str) -> io::Result<Self> {
        Self::create_in(std::env::temp_dir(), contents)
    }

    pub fn create_in(dir: impl AsRef<Path>, contents: &str) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("vidpull-cookies-")
            .suffix(".txt")
            .tempfile_in(dir)?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        let path = file.path().to_path_buf();
        tracing::info!(path = %path.display(), "Using cookies from temporary file");
        Ok(Self { file: Some(file), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match file.close() {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cleaned up temporary cookie file");
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up temporary cookie file"
                );
            }
        }
    }
}

impl Drop for CredentialFile {
    fn drop(&mut self) {
        self.remove();
    }
}
