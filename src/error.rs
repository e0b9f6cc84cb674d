use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("load '{}': {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },

    #[error("remote query failed: {0}")]
    RemoteQuery(String),

    #[error("{0}")]
    NoHistory(String),

    #[error("save '{}': {reason}", path.display())]
    Save { path: PathBuf, reason: String },
}

impl KubeError {
    pub fn load<P, E>(path: P, err: E) -> Self
    where
        P: Into<PathBuf>,
        E: ToString,
    {
        KubeError::Load {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn save<P, E>(path: P, err: E) -> Self
    where
        P: Into<PathBuf>,
        E: ToString,
    {
        KubeError::Save {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn context_not_found<S: Into<String>>(name: S) -> Self {
        KubeError::NotFound {
            kind: "context",
            name: name.into(),
        }
    }

    pub fn namespace_not_found<S: Into<String>>(name: S) -> Self {
        KubeError::NotFound {
            kind: "namespace",
            name: name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KubeError>;
