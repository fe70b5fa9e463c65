use shardload_resources::{ChannelIdentity, DatumError, NodeId};
use snafu::Snafu;
use tracing::warn;

use crate::{directory::DirectoryError, transport::TransportError};

/// Load error types.
///
/// The message is returned to the caller of the load, for this reason it
/// should contain the information needed to fix the input or find the
/// failing node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// Validation error.
    ///
    /// The load options, column selection or a row value do not satisfy a
    /// precondition. Raised before any rows are sent when possible.
    #[snafu(display("validation error: {message}"))]
    Validation { message: String },
    /// A value could not be converted to its column type.
    #[snafu(display("invalid value for column \"{column}\": {source}"))]
    Datum { column: String, source: DatumError },
    /// A channel was found in a state the bulk-load protocol does not allow.
    #[snafu(display("protocol violation on channel {identity}: {message}"))]
    ProtocolViolation {
        identity: ChannelIdentity,
        message: String,
    },
    /// The transport failed or the remote node returned an error.
    #[snafu(display("transport error on node {node} during {operation}: {source}"))]
    Transport {
        node: NodeId,
        operation: &'static str,
        source: TransportError,
    },
    /// The readiness wait itself failed.
    #[snafu(display("failed to wait for channel readiness"))]
    Wait { source: std::io::Error },
    /// Partition directory error.
    #[snafu(display("partition directory error during {operation}: {source}"))]
    Directory {
        operation: &'static str,
        source: DirectoryError,
    },
    /// The load was cancelled.
    #[snafu(display("load cancelled"))]
    Cancelled,
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

/// Categories of errors for classification and handling.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid input, user error
    Validation,
    /// Network or remote failures
    Temporary,
    /// Broken invariants, bugs
    Internal,
    /// External cancellation
    Cancelled,
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Validation { .. } | LoadError::Datum { .. } => ErrorKind::Validation,
            LoadError::Transport { .. } | LoadError::Wait { .. } => ErrorKind::Temporary,
            LoadError::ProtocolViolation { .. } => ErrorKind::Internal,
            LoadError::Directory { source, .. } => match source {
                DirectoryError::InvalidArgument { .. } => ErrorKind::Validation,
                _ => ErrorKind::Internal,
            },
            LoadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, LoadError::ProtocolViolation { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, LoadError::Transport { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoadError::Cancelled)
    }
}

impl ErrorKind {
    /// Whether the whole load may succeed if started again.
    ///
    /// The load itself never retries.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary)
    }

    /// Standard exit code for this error category.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Validation => 64, // EX_USAGE
            Self::Temporary => 75,  // EX_TEMPFAIL
            Self::Cancelled => 130,
            Self::Internal => 70, // EX_SOFTWARE
        }
    }
}

/// Keeps the first error of a multi-step teardown and logs the others.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<LoadError>);

impl FirstError {
    pub fn record(&mut self, error: LoadError) {
        match &self.0 {
            None => self.0 = Some(error),
            Some(first) => warn!(%error, %first, "error superseded by an earlier error"),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.0 {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}
