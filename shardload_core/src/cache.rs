use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    sync::Arc,
};

use shardload_resources::ChannelIdentity;
use tracing::debug;

use crate::{
    channel::UploadChannel,
    error::{LoadError, Result},
    flush::MultiplexedFlusher,
    transport::Transport,
};

/// Load-scoped cache of upload channels, one per node and principal.
///
/// Channels are opened lazily and closed when the cache is dropped.
pub struct ConnectionCache {
    transport: Arc<dyn Transport>,
    command: String,
    binary: bool,
    channels: BTreeMap<ChannelIdentity, UploadChannel>,
    /// Channels with an upload started since the last finalize.
    active: BTreeSet<ChannelIdentity>,
}

impl ConnectionCache {
    pub fn new(transport: Arc<dyn Transport>, command: impl Into<String>, binary: bool) -> Self {
        Self {
            transport,
            command: command.into(),
            binary,
            channels: BTreeMap::new(),
            active: BTreeSet::new(),
        }
    }

    /// The command every channel starts its upload with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the channel for the identity, opening it if needed.
    pub fn get(&mut self, identity: &ChannelIdentity) -> Result<&mut UploadChannel> {
        open_channel(self.transport.as_ref(), &mut self.channels, identity)
    }

    /// Returns the channel for the identity, ready to receive rows.
    ///
    /// An idle channel starts its upload. A channel still processing a
    /// previous upload is a protocol violation.
    pub fn get_for_upload(&mut self, identity: &ChannelIdentity) -> Result<&mut UploadChannel> {
        let channel = open_channel(self.transport.as_ref(), &mut self.channels, identity)?;
        channel.start_upload(&self.command, self.binary)?;
        self.active.insert(identity.clone());
        Ok(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Identities of the channels with an upload started since the last finalize.
    pub fn active(&self) -> impl Iterator<Item = &ChannelIdentity> {
        self.active.iter()
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Drains and acknowledges every active channel.
    pub fn finalize(&mut self, flusher: &MultiplexedFlusher) -> Result<()> {
        let result = flusher.finalize(active_channels(&mut self.channels, &self.active));
        self.retain_uploading();
        result
    }

    /// Ends the upload sub-protocol on every channel still uploading.
    pub fn end_sub_protocol(&mut self, flusher: &MultiplexedFlusher) -> Result<()> {
        let result = flusher.end_sub_protocol(active_channels(&mut self.channels, &self.active));
        self.retain_uploading();
        result
    }

    fn retain_uploading(&mut self) {
        let channels = &self.channels;
        self.active
            .retain(|identity| channels.get(identity).is_some_and(UploadChannel::is_uploading));
    }
}

fn open_channel<'a>(
    transport: &dyn Transport,
    channels: &'a mut BTreeMap<ChannelIdentity, UploadChannel>,
    identity: &ChannelIdentity,
) -> Result<&'a mut UploadChannel> {
    match channels.entry(identity.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            debug!(channel = %identity, "opening channel");
            let connection = transport
                .open(identity)
                .map_err(|source| LoadError::Transport {
                    node: identity.node.clone(),
                    operation: "connect",
                    source,
                })?;
            Ok(entry.insert(UploadChannel::new(identity.clone(), connection)))
        }
    }
}

fn active_channels<'a>(
    channels: &'a mut BTreeMap<ChannelIdentity, UploadChannel>,
    active: &'a BTreeSet<ChannelIdentity>,
) -> impl Iterator<Item = &'a mut UploadChannel> {
    channels
        .iter_mut()
        .filter(move |(identity, _)| active.contains(*identity))
        .map(|(_, channel)| channel)
}

impl Drop for ConnectionCache {
    fn drop(&mut self) {
        for (identity, channel) in std::mem::take(&mut self.channels) {
            debug!(channel = %identity, state = ?channel.state(), "closing channel");
            drop(channel);
        }
    }
}
