use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server answered HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("downloaded data is corrupt: {0}")]
    Corrupt(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Transport(_))
    }
}

/// Failures surfaced by the installer core. Every filesystem or network
/// error is translated into one of these at the manager boundary.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid game directory {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(
        "update to {version} failed and could not be rolled back; {} file(s) need repair",
        affected.len()
    )]
    PartialUpdate {
        version: String,
        affected: Vec<String>,
    },

    #[error("failed to {action} {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: io::Error,
        remaining: Vec<String>,
        rolled_back: bool,
    },

    #[error("install record {} is unreadable: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("another instance is working on this game (lock {}{})", lock.display(), holder_suffix(*pid))]
    ConcurrentOperation { lock: PathBuf, pid: Option<u32> },

    #[error("operation cancelled")]
    Cancelled { rolled_back: bool },

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("game config: {0}")]
    Config(String),
}

fn holder_suffix(pid: Option<u32>) -> String {
    pid.map(|pid| format!(", held by pid {pid}"))
        .unwrap_or_default()
}

impl PatchError {
    pub fn file_access(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        PatchError::FileAccess {
            path: path.into(),
            action,
            source,
            remaining: Vec::new(),
            rolled_back: false,
        }
    }

    pub fn rolled_back(self) -> Self {
        match self {
            PatchError::FileAccess {
                path,
                action,
                source,
                remaining,
                ..
            } => PatchError::FileAccess {
                path,
                action,
                source,
                remaining,
                rolled_back: true,
            },
            PatchError::Cancelled { .. } => PatchError::Cancelled { rolled_back: true },
            other => other,
        }
    }

    /// Files the user should look at after this failure.
    pub fn affected_files(&self) -> &[String] {
        match self {
            PatchError::PartialUpdate { affected, .. } => affected,
            PatchError::FileAccess { remaining, .. } => remaining,
            _ => &[],
        }
    }

    /// Whether re-running the same command is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            PatchError::InvalidTarget { .. }
            | PatchError::InvalidBundle(_)
            | PatchError::CorruptState { .. } => false,
            PatchError::Fetch(err) => err.is_retryable(),
            PatchError::PartialUpdate { .. }
            | PatchError::FileAccess { .. }
            | PatchError::ConcurrentOperation { .. }
            | PatchError::Cancelled { .. }
            | PatchError::Config(_) => true,
        }
    }

    pub fn retry_hint(&self) -> &'static str {
        match self {
            PatchError::PartialUpdate { .. } => {
                "run `install --force` to repair the degraded installation"
            }
            PatchError::FileAccess { .. } => {
                "close the game and re-run, with elevated rights if the files are protected"
            }
            PatchError::ConcurrentOperation { .. } => {
                "wait for the other instance to finish, then re-run"
            }
            PatchError::Fetch(err) if err.is_retryable() => "check the network or mirror settings and re-run",
            PatchError::Cancelled { .. } => "nothing was changed; re-run when ready",
            _ if self.is_retryable() => "re-run the command",
            _ => "fix the input and re-run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolled_back_marks_file_access() {
        let err = PatchError::file_access(
            "write",
            "/games/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        )
        .rolled_back();
        match err {
            PatchError::FileAccess { rolled_back, .. } => assert!(rolled_back),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fetch_status_errors_are_not_retryable() {
        let err = PatchError::from(FetchError::HttpStatus {
            status: 404,
            url: "https://example.com".to_string(),
        });
        assert!(!err.is_retryable());
        assert!(PatchError::from(FetchError::Timeout("slow".into())).is_retryable());
    }

    #[test]
    fn concurrent_operation_names_holder() {
        let err = PatchError::ConcurrentOperation {
            lock: PathBuf::from("/tmp/state.lock"),
            pid: Some(42),
        };
        assert!(err.to_string().contains("pid 42"));
    }
}
