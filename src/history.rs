use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::kubeconfig::write_atomic;

/// One-value records keyed by arbitrary strings, stored as one file per key.
///
/// File names are the hex SHA-256 of the key, so context names with slashes,
/// colons or other characters unsafe for file names map to stable, fixed
/// length names.
pub struct HistoryFile {
    dir: PathBuf,
}

impl HistoryFile {
    pub fn new<P: Into<PathBuf>>(dir: P) -> HistoryFile {
        HistoryFile { dir: dir.into() }
    }

    pub fn namespaces<P: AsRef<Path>>(history_dir: P) -> HistoryFile {
        Self::new(history_dir.as_ref().join("namespaces"))
    }

    pub fn contexts<P: AsRef<Path>>(history_dir: P) -> HistoryFile {
        Self::new(history_dir.as_ref().join("contexts"))
    }

    /// The recorded value, or an empty string when nothing is recorded.
    pub fn load(&self, key: &str) -> Result<String> {
        let path = self.path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(err) => return Err(KubeError::load(path, err)),
        };
        let content = String::from_utf8(data)
            .map_err(|_| KubeError::load(&path, "history record is not valid utf-8"))?;

        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        let value = lines.next().unwrap_or("");
        if lines.next().is_some() {
            return Err(KubeError::load(path, "history record has more than one line"));
        }
        Ok(value.to_string())
    }

    pub fn save(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key);
        fs::create_dir_all(&self.dir).map_err(|err| KubeError::save(&self.dir, err))?;
        write_atomic(&path, value.as_bytes()).map_err(|err| KubeError::save(&path, err))?;
        debug!("recorded '{value}' for '{key}' in '{}'", path.display());
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(storage_key(key))
    }
}

pub fn storage_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}
