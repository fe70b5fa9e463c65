//! Multiplexed finalize of upload channels.
//!
//! All channels are advanced in rounds from a single thread. Each round tries
//! to flush and read every pending channel without blocking, then waits once
//! on the sockets of the channels that made no progress. The wait set is
//! registered from scratch every round, so a socket that is already ready
//! wakes the wait immediately and a channel that left the set is never
//! waited on again.

use std::{io, time::Duration};

use mio::{Events, Interest, Poll, Token, unix::SourceFd};
use shardload_observability::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span};

use crate::{
    channel::{ChannelState, UploadChannel},
    error::{FirstError, LoadError, ProtocolViolationSnafu},
    metrics::LoadMetrics,
    transport::{Connection, FlushStatus, RemoteResult, TransportError},
};

/// Outcome of one non-blocking drain attempt.
enum Drain {
    Done,
    Wait(Interest),
}

/// Drains and closes the upload sub-protocol of many channels at once.
#[derive(Clone)]
pub struct MultiplexedFlusher {
    wait_timeout: Duration,
    ct: CancellationToken,
    metrics: LoadMetrics,
}

impl MultiplexedFlusher {
    pub fn new(wait_timeout: Duration, ct: CancellationToken) -> Self {
        Self {
            wait_timeout,
            ct,
            metrics: LoadMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: LoadMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Ends the upload on every uploading channel and waits for all of them
    /// to acknowledge.
    ///
    /// Every channel is attempted even after one fails; the first error is
    /// returned. Acknowledged channels are left idle and blocking, failed
    /// ones in the error state. Channels that are not uploading are ignored,
    /// so a set with nothing pending costs no transport call.
    pub fn finalize<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a mut UploadChannel>,
    ) -> crate::Result<()> {
        let mut working: Vec<&mut UploadChannel> = channels
            .into_iter()
            .filter(|channel| channel.is_uploading())
            .collect();

        if working.is_empty() {
            return Ok(());
        }

        let _span = debug_span!("finalize", channels = working.len()).entered();
        self.metrics.finalize.add(1, &[]);

        let mut errors = FirstError::default();

        let mut pending = Vec::with_capacity(working.len());
        for (index, channel) in working.iter_mut().enumerate() {
            if !channel.connection_mut().in_upload() {
                let error = ProtocolViolationSnafu {
                    identity: channel.identity().clone(),
                    message: "remote is not in upload mode",
                }
                .build();
                self.fail(channel, error, &mut errors);
                continue;
            }

            match channel.connection_mut().put_end_marker() {
                Ok(()) => {
                    channel.set_state(ChannelState::Processing);
                    pending.push(index);
                }
                Err(source) => {
                    let error = channel.transport_error("end upload", source);
                    self.fail(channel, error, &mut errors);
                }
            }
        }

        let attempted = pending.clone();
        let completed = self.drain(&mut working, pending, &mut errors);

        for &index in &attempted {
            let channel = &mut working[index];
            if let Err(source) = channel.connection_mut().set_blocking(true) {
                let error = channel.transport_error("set blocking", source);
                self.fail(channel, error, &mut errors);
            }
        }

        for index in completed {
            let channel = &mut working[index];
            if channel.state() != ChannelState::Processing {
                continue;
            }
            match take_final_result(channel.connection_mut()) {
                Ok(()) => channel.set_state(ChannelState::Idle),
                Err(source) => {
                    let error = channel.transport_error("finalize", source);
                    self.fail(channel, error, &mut errors);
                }
            }
        }

        errors.into_result()
    }

    /// Ends the upload of every uploading channel with a blocking call.
    ///
    /// Channels in any other state are skipped. Every channel is attempted;
    /// the first error is returned.
    pub fn end_sub_protocol<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a mut UploadChannel>,
    ) -> crate::Result<()> {
        let mut errors = FirstError::default();

        for channel in channels {
            if !channel.is_uploading() {
                continue;
            }

            let result = channel
                .connection_mut()
                .set_blocking(true)
                .and_then(|_| channel.connection_mut().end_upload());

            match result {
                Ok(()) => channel.set_state(ChannelState::Idle),
                Err(source) => {
                    let error = channel.transport_error("end upload", source);
                    self.fail(channel, error, &mut errors);
                }
            }
        }

        errors.into_result()
    }

    /// Runs drain rounds until no pending channel is left.
    ///
    /// Returns the channels whose final result is available.
    fn drain(
        &self,
        working: &mut [&mut UploadChannel],
        mut pending: Vec<usize>,
        errors: &mut FirstError,
    ) -> Vec<usize> {
        let mut completed = Vec::with_capacity(pending.len());
        let mut poll: Option<Poll> = None;
        let mut events = Events::with_capacity(pending.len().max(1));
        let mut round = 0usize;

        while !pending.is_empty() {
            round += 1;

            let mut waiting = Vec::with_capacity(pending.len());
            for index in pending.drain(..) {
                let channel = &mut working[index];
                match drain_once(channel.connection_mut()) {
                    Ok(Drain::Done) => completed.push(index),
                    Ok(Drain::Wait(interest)) => waiting.push((index, interest)),
                    Err((operation, source)) => {
                        let error = channel.transport_error(operation, source);
                        self.fail(channel, error, errors);
                    }
                }
            }

            if waiting.is_empty() {
                break;
            }

            if self.ct.is_cancelled() {
                for (index, _) in waiting {
                    working[index].set_state(ChannelState::Error);
                }
                errors.record(LoadError::Cancelled);
                break;
            }

            debug!(round, waiting = waiting.len(), "waiting for channel readiness");

            let result = match poll.take() {
                Some(existing) => Ok(existing),
                None => Poll::new(),
            }
            .and_then(|mut current| {
                let waited = self.wait(&mut current, &mut events, working, &waiting);
                poll = Some(current);
                waited
            });

            if let Err(source) = result {
                for &(index, _) in &waiting {
                    working[index].set_state(ChannelState::Error);
                }
                errors.record(LoadError::Wait { source });
                break;
            }

            pending.extend(waiting.into_iter().map(|(index, _)| index));
        }

        completed
    }

    /// Blocks until one of the waiting sockets is ready or the timeout expires.
    fn wait(
        &self,
        poll: &mut Poll,
        events: &mut Events,
        working: &[&mut UploadChannel],
        waiting: &[(usize, Interest)],
    ) -> io::Result<()> {
        let mut registered = Vec::with_capacity(waiting.len());
        let mut result = Ok(());

        for &(index, interest) in waiting {
            let fd = working[index].connection().socket();
            if let Err(error) = poll
                .registry()
                .register(&mut SourceFd(&fd), Token(index), interest)
            {
                result = Err(error);
                break;
            }
            registered.push(fd);
        }

        if result.is_ok() {
            result = match poll.poll(events, Some(self.wait_timeout)) {
                Err(error) if error.kind() == io::ErrorKind::Interrupted => Ok(()),
                other => other,
            };
        }

        for fd in registered {
            if let Err(error) = poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(fd, %error, "failed to deregister socket");
            }
        }

        result
    }

    fn fail(&self, channel: &mut UploadChannel, error: LoadError, errors: &mut FirstError) {
        channel.set_state(ChannelState::Error);
        self.metrics
            .finalize_errors
            .add(1, &[KeyValue::new("node", channel.node().to_string())]);
        errors.record(error);
    }
}

/// Flushes the pending writes, then reads what the remote sent so far.
fn drain_once(connection: &mut dyn Connection) -> Result<Drain, (&'static str, TransportError)> {
    match connection.flush().map_err(|source| ("flush", source))? {
        FlushStatus::WouldBlock => return Ok(Drain::Wait(Interest::WRITABLE)),
        FlushStatus::Flushed => {}
    }

    connection
        .consume_input()
        .map_err(|source| ("read", source))?;

    if connection.is_busy() {
        Ok(Drain::Wait(Interest::READABLE))
    } else {
        Ok(Drain::Done)
    }
}

/// Checks that the remote acknowledged the upload with exactly one result.
fn take_final_result(connection: &mut dyn Connection) -> Result<(), TransportError> {
    let outcome = match connection.next_result() {
        Some(RemoteResult::CommandOk { .. }) => Ok(()),
        Some(RemoteResult::Error { message }) => Err(TransportError::Remote { message }),
        Some(other) => Err(TransportError::Remote {
            message: format!("unexpected result {other:?}"),
        }),
        None => Err(TransportError::Remote {
            message: "unexpected missing result".to_string(),
        }),
    };

    let mut extra = 0usize;
    while connection.next_result().is_some() {
        extra += 1;
    }

    outcome?;

    if extra > 0 {
        return Err(TransportError::Remote {
            message: format!("unexpected extra results: {extra}"),
        });
    }

    Ok(())
}
