use std::fmt;

use shardload_resources::{ChannelIdentity, NodeId};
use tracing::debug;

use crate::{
    error::{LoadError, ProtocolViolationSnafu, Result},
    transport::{Connection, TransportError},
};

/// Upload sub-protocol state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected, no upload in progress. Blocking mode.
    Idle,
    /// Upload started, rows may be sent.
    Uploading,
    /// End marker sent, waiting for the remote to acknowledge.
    Processing,
    /// The channel failed and must not be reused.
    Error,
}

/// A connection to one node, tracked through the upload sub-protocol.
pub struct UploadChannel {
    identity: ChannelIdentity,
    state: ChannelState,
    connection: Box<dyn Connection>,
}

impl UploadChannel {
    pub(crate) fn new(identity: ChannelIdentity, connection: Box<dyn Connection>) -> Self {
        Self {
            identity,
            state: ChannelState::Idle,
            connection,
        }
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    pub fn node(&self) -> &NodeId {
        &self.identity.node
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_uploading(&self) -> bool {
        self.state == ChannelState::Uploading
    }

    /// Puts the channel into upload mode with the load's command.
    ///
    /// Does nothing if the channel is already uploading. A channel still
    /// processing a previous upload is a protocol violation.
    pub fn start_upload(&mut self, command: &str, binary: bool) -> Result<()> {
        match self.state {
            ChannelState::Uploading => Ok(()),
            ChannelState::Idle => {
                debug!(channel = %self.identity, "starting upload");
                if let Err(source) = self.connection.begin_upload(command, binary) {
                    self.state = ChannelState::Error;
                    return Err(self.transport_error("begin upload", source));
                }
                self.state = ChannelState::Uploading;
                Ok(())
            }
            ChannelState::Processing => ProtocolViolationSnafu {
                identity: self.identity.clone(),
                message: "channel is still processing a previous upload",
            }
            .fail(),
            ChannelState::Error => ProtocolViolationSnafu {
                identity: self.identity.clone(),
                message: "channel is in error state",
            }
            .fail(),
        }
    }

    /// Sends upload data. The channel must be uploading.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        if self.state != ChannelState::Uploading {
            return ProtocolViolationSnafu {
                identity: self.identity.clone(),
                message: format!("cannot send rows in state {:?}", self.state),
            }
            .fail();
        }

        if let Err(source) = self.connection.put_bytes(data) {
            self.state = ChannelState::Error;
            return Err(self.transport_error("put", source));
        }

        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: ChannelState) {
        debug!(channel = %self.identity, from = ?self.state, to = ?state, "channel state");
        self.state = state;
    }

    pub(crate) fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub(crate) fn transport_error(
        &self,
        operation: &'static str,
        source: TransportError,
    ) -> LoadError {
        LoadError::Transport {
            node: self.identity.node.clone(),
            operation,
            source,
        }
    }
}

impl fmt::Debug for UploadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadChannel")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
