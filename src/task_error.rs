//! TaskError: unified error type for simsnap-tasks public APIs
//!
//! Every fallible operation in the coordination layer (transport, message
//! registry, job distribution, locking and the remote dataset protocol)
//! reports through this enum. Variants fall into the classes used to decide
//! what happens next:
//! - *protocol* errors are programming errors and are fatal to the rank that
//!   detects them;
//! - *resource* errors (a missing field) are recoverable by the caller;
//! - *job* errors are caught per job and logged by the job loop.

use crate::comm::CommTag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for simsnap-tasks operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    // ----- protocol ---------------------------------------------------------
    /// An inbound tag does not correspond to any registered message type.
    #[error("Unknown message received (tag {0})")]
    UnknownTag(CommTag),
    /// Two registrations (of one type, or of two distinct types) produced the same tag.
    #[error("Attempting to register duplicate message class `{name}` (tag {tag} already used by `{existing}`)")]
    DuplicateMessageType {
        name: &'static str,
        existing: &'static str,
        tag: CommTag,
    },
    /// A handler is already registered for this message type.
    #[error("A handler is already registered for message `{0}`")]
    HandlerAlreadyRegistered(&'static str),
    /// Tried to unregister a handler that is not the current one.
    #[error("Handler being unregistered for `{0}` is not the registered handler")]
    HandlerMismatch(&'static str),
    /// Dispatch found no handler for a known message type.
    #[error("Unable to dispatch message `{0}` as no handler is registered")]
    NoHandler(&'static str),
    /// An envelope was decoded as a type whose tag does not match.
    #[error("Envelope carries tag {actual}, expected `{expected}`")]
    TagMismatch { expected: &'static str, actual: CommTag },
    /// A dataset request arrived for a session that is not active.
    #[error("Dataset session for rank {rank} is {state}; `{request}` is not valid")]
    SessionNotActive {
        rank: usize,
        state: &'static str,
        request: &'static str,
    },
    /// The dataset server answered with `SessionNotActive`; `message` is the
    /// server's description (client rank, session state and request).
    #[error("Dataset server rank {server} rejected the request: {message}")]
    RemoteSessionNotActive { server: usize, message: String },
    /// A lock release arrived from a rank that does not hold the lock.
    #[error("Rank {rank} released lock `{name}` it does not hold")]
    LockNotHeld { name: String, rank: usize },
    /// A rank asked the coordinator for a lock it already holds.
    #[error("Rank {rank} requested lock `{name}` it already holds")]
    LockAlreadyHeld { name: String, rank: usize },
    /// Workers disagree on the length of the job list of one job loop.
    #[error("Job loop {iteration}: rank {rank} sees {actual} jobs, others see {expected}")]
    JobCountMismatch {
        iteration: u64,
        rank: usize,
        expected: usize,
        actual: usize,
    },
    /// A worker asked for more jobs after being told its job loop was over.
    #[error("Rank {rank} asked for a job after job loop {iteration} ended")]
    JobLoopEnded { iteration: u64, rank: usize },
    /// A reply of the wrong kind arrived.
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    // ----- transport --------------------------------------------------------
    /// Destination or source rank is outside the process group.
    #[error("Rank {rank} is outside the group of size {size}")]
    RankOutOfRange { rank: usize, size: usize },
    /// The peer side of the transport has gone away.
    #[error("Transport disconnected while waiting on rank {0}")]
    Disconnected(usize),
    /// A rank's thread panicked.
    #[error("Rank {rank} panicked: {message}")]
    RankPanicked { rank: usize, message: String },
    /// Backend-specific communication failure.
    #[error("Communication error: {0}")]
    Comm(String),

    // ----- codec ------------------------------------------------------------
    /// Failed to encode or decode a message body.
    #[error("Codec error: {0}")]
    Codec(String),
    /// A wire array did not have the byte length its header promised.
    #[error("Array layout error: {0}")]
    ArrayLayout(String),

    // ----- resource ---------------------------------------------------------
    /// The requested field does not exist in the dataset (recoverable).
    #[error("Field `{0}` not found")]
    FieldNotFound(String),
    /// A selector could not be resolved against the dataset.
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    /// The dataset reader failed to load a path.
    #[error("Failed to load dataset `{path}`: {reason}")]
    DatasetLoad { path: String, reason: String },

    // ----- configuration / jobs ---------------------------------------------
    /// Invalid group configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// A single job failed; the job loop logs it and carries on.
    #[error("Job {index} failed: {reason}")]
    Job { index: usize, reason: String },
}

impl TaskError {
    /// True for programming errors that must not be retried.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            TaskError::UnknownTag(_)
                | TaskError::DuplicateMessageType { .. }
                | TaskError::HandlerAlreadyRegistered(_)
                | TaskError::HandlerMismatch(_)
                | TaskError::NoHandler(_)
                | TaskError::TagMismatch { .. }
                | TaskError::SessionNotActive { .. }
                | TaskError::RemoteSessionNotActive { .. }
                | TaskError::LockNotHeld { .. }
                | TaskError::LockAlreadyHeld { .. }
                | TaskError::JobCountMismatch { .. }
                | TaskError::JobLoopEnded { .. }
                | TaskError::UnexpectedReply(_)
        )
    }

    /// True for errors a client may catch and carry on from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TaskError::FieldNotFound(_) | TaskError::InvalidSelector(_) | TaskError::Job { .. }
        )
    }
}

impl From<bincode::Error> for TaskError {
    fn from(e: bincode::Error) -> Self {
        TaskError::Codec(e.to_string())
    }
}

/// Error class carried by a `ServerError` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    FieldNotFound,
    InvalidSelector,
    DatasetLoad,
    SessionNotActive,
    Other,
}

impl TaskError {
    /// Split an error into the kind and text sent back to a client.
    pub fn to_remote(&self) -> (RemoteErrorKind, String) {
        let kind = match self {
            TaskError::FieldNotFound(_) => RemoteErrorKind::FieldNotFound,
            TaskError::InvalidSelector(_) => RemoteErrorKind::InvalidSelector,
            TaskError::DatasetLoad { .. } => RemoteErrorKind::DatasetLoad,
            TaskError::SessionNotActive { .. } | TaskError::RemoteSessionNotActive { .. } => {
                RemoteErrorKind::SessionNotActive
            }
            _ => RemoteErrorKind::Other,
        };
        let message = match self {
            TaskError::FieldNotFound(f) => f.clone(),
            TaskError::InvalidSelector(s) => s.clone(),
            TaskError::DatasetLoad { path, reason } => format!("{path}\n{reason}"),
            TaskError::RemoteSessionNotActive { message, .. } => message.clone(),
            other => other.to_string(),
        };
        (kind, message)
    }

    /// Rebuild a client-side error from a `ServerError` reply.
    pub fn from_remote(kind: RemoteErrorKind, message: String, server: usize) -> Self {
        match kind {
            RemoteErrorKind::FieldNotFound => TaskError::FieldNotFound(message),
            RemoteErrorKind::InvalidSelector => TaskError::InvalidSelector(message),
            RemoteErrorKind::DatasetLoad => {
                let (path, reason) = message.split_once('\n').unwrap_or(("", message.as_str()));
                TaskError::DatasetLoad {
                    path: path.to_string(),
                    reason: reason.to_string(),
                }
            }
            RemoteErrorKind::SessionNotActive => TaskError::RemoteSessionNotActive { server, message },
            RemoteErrorKind::Other => TaskError::Comm(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TaskError::NoHandler("X").is_protocol());
        assert!(!TaskError::NoHandler("X").is_recoverable());
        assert!(TaskError::FieldNotFound("r".into()).is_recoverable());
        assert!(!TaskError::FieldNotFound("r".into()).is_protocol());
    }

    #[test]
    fn remote_roundtrip_keeps_field_name() {
        let (kind, msg) = TaskError::FieldNotFound("nonexistent".into()).to_remote();
        assert_eq!(kind, RemoteErrorKind::FieldNotFound);
        assert_eq!(
            TaskError::from_remote(kind, msg, 0),
            TaskError::FieldNotFound("nonexistent".into())
        );
    }

    #[test]
    fn remote_session_error_keeps_server_text() {
        let server_side = TaskError::SessionNotActive {
            rank: 3,
            state: "closed",
            request: "RequestView",
        };
        let (kind, msg) = server_side.to_remote();
        assert_eq!(kind, RemoteErrorKind::SessionNotActive);
        let client_side = TaskError::from_remote(kind, msg, 0);
        assert_eq!(
            client_side,
            TaskError::RemoteSessionNotActive {
                server: 0,
                message: server_side.to_string()
            }
        );
        let text = client_side.to_string();
        assert!(text.contains("rank 3"));
        assert!(text.contains("closed"));
        assert!(text.contains("`RequestView`"));
        assert!(client_side.is_protocol());
    }
}
