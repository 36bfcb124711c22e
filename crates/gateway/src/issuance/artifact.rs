//! Scoped filesystem artifacts of one issuance call
//!
//! [`TemporaryCsrArtifact`] owns the staged CSR file and [`ResultArtifacts`]
//! owns the agent's numbered output files (`0000_cert.pem`,
//! `0000_chain.pem`, ...). Both clean up when dropped, so every exit path of
//! an issuance call, including early error returns, leaves nothing behind.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, trace, warn};

/// File name of the certificate the agent writes on success
pub const RESULT_CERT_FILE: &str = "0000_cert.pem";

/// A CSR written to a private temporary file
#[derive(Debug)]
pub struct TemporaryCsrArtifact {
    path: TempPath,
}

impl TemporaryCsrArtifact {
    /// Write `csr` to a fresh temporary file
    ///
    /// The file lives in `dir` when given, otherwise in the system temp dir.
    pub fn stage(csr: &[u8], dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("csr").suffix(".req");

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        file.write_all(csr)?;
        file.flush()?;

        let path = file.into_temp_path();
        trace!(path = %path.display(), bytes = csr.len(), "Staged CSR");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryCsrArtifact {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "Removing staged CSR");
    }
}

/// The agent's numbered result files in its state directory
///
/// Claiming clears leftovers from earlier runs so a stale certificate can
/// never be returned; [`release`](Self::release) removes this run's files.
/// Dropping an unreleased claim sweeps synchronously as a last resort.
#[derive(Debug)]
pub struct ResultArtifacts {
    dir: PathBuf,
    released: bool,
}

impl ResultArtifacts {
    /// Take ownership of the result files in `dir`
    ///
    /// Must only be called while holding the issuance token.
    pub async fn claim(dir: &Path) -> Self {
        let artifacts = Self {
            dir: dir.to_path_buf(),
            released: false,
        };
        artifacts.clear().await;
        artifacts
    }

    /// Path of the issued certificate
    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(RESULT_CERT_FILE)
    }

    /// Remove this run's files and give up the claim
    pub async fn release(mut self) {
        self.clear().await;
        self.released = true;
    }

    /// Best-effort removal of every `00*_*.pem` file
    pub async fn clear(&self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot list agent result files");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "Cannot list agent result files");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_result_file(name) {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => debug!(file = %name, "Removed agent result file"),
                Err(e) => warn!(file = %name, error = %e, "Failed to remove agent result file"),
            }
        }
    }

    fn clear_blocking(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let is_result = entry.file_name().to_str().is_some_and(is_result_file);
            if is_result {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "Failed to remove agent result file");
                }
            }
        }
    }
}

impl Drop for ResultArtifacts {
    fn drop(&mut self) {
        if !self.released {
            self.clear_blocking();
        }
    }
}

/// Matches the agent's `NNNN_<kind>.pem` output naming
fn is_result_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".pem") else {
        return false;
    };
    match stem.split_once('_') {
        Some((number, kind)) => {
            number.len() == 4
                && number.starts_with("00")
                && number.bytes().all(|b| b.is_ascii_digit())
                && !kind.is_empty()
        }
        None => false,
    }
}
