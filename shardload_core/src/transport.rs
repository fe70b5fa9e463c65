//! Transport contract.
//!
//! The core never speaks to sockets itself. A [`Transport`] opens
//! [`Connection`]s for a channel identity, and a connection exposes the
//! handful of blocking and non-blocking primitives the bulk-load protocol
//! needs. Implementations must keep the non-blocking primitives truly
//! non-blocking: they are driven from a single readiness loop.

use std::os::fd::RawFd;

use shardload_resources::ChannelIdentity;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("could not connect: {message}"))]
    Connect { message: String },
    #[snafu(display("i/o error"))]
    Io { source: std::io::Error },
    #[snafu(display("remote error: {message}"))]
    Remote { message: String },
    #[snafu(display("connection closed"))]
    Closed,
}

/// Outcome of a non-blocking flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// The write buffer is empty.
    Flushed,
    /// Part of the buffer is still queued; wait for the socket to be writable.
    WouldBlock,
}

/// A complete result received from the remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteResult {
    /// The remote accepted the command and processed all rows.
    CommandOk { rows: Option<u64> },
    /// The remote is (still) waiting for upload data.
    UploadReady,
    /// The remote reported an error.
    Error { message: String },
    /// Any other result status.
    Other { status: String },
}

/// Opens connections to nodes.
pub trait Transport: Send + Sync {
    /// Opens a connection to the identity's node, authenticated as the
    /// identity's principal. The connection starts idle and blocking.
    fn open(&self, identity: &ChannelIdentity) -> Result<Box<dyn Connection>, TransportError>;
}

/// One connection to a node.
pub trait Connection: Send {
    /// Issues the bulk-load command and waits until the remote is ready to
    /// receive data, then switches the socket to non-blocking mode.
    fn begin_upload(&mut self, command: &str, binary: bool) -> Result<(), TransportError>;

    /// Queues upload data. Never reports would-block: the buffer grows and a
    /// flush is attempted opportunistically.
    fn put_bytes(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Ends the upload sub-protocol and blocks until the remote acknowledges.
    fn end_upload(&mut self) -> Result<(), TransportError>;

    /// Queues the end-of-upload marker without waiting.
    fn put_end_marker(&mut self) -> Result<(), TransportError>;

    /// Whether the remote is currently waiting for upload data.
    fn in_upload(&mut self) -> bool;

    /// Writes out as much of the pending buffer as the socket accepts.
    fn flush(&mut self) -> Result<FlushStatus, TransportError>;

    /// Reads whatever response bytes are available without blocking.
    fn consume_input(&mut self) -> Result<(), TransportError>;

    /// Whether a complete result is still outstanding.
    fn is_busy(&self) -> bool;

    /// Returns the next complete result, `None` once all results were taken.
    fn next_result(&mut self) -> Option<RemoteResult>;

    /// The socket used for readiness waits.
    fn socket(&self) -> RawFd;

    fn set_blocking(&mut self, blocking: bool) -> Result<(), TransportError>;
}
