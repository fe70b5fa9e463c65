#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{ErrorKind, Read, Write},
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::{Arc, Mutex},
    time::Duration,
};

use shardload_core::{
    Connection, DirectoryError, FlushStatus, InMemoryPartitionDirectory, LoadOptions,
    PartitionDirectory, RemoteResult, Transport, TransportError,
};
use shardload_resources::{
    ChannelIdentity, ColumnType, CompressionStatus, Dimension, NodeId, Partition, PartitionId,
    PartitionPoint, Principal, Table,
};

/// Everything the fake nodes and the directory observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(String),
    Begin { node: String, command: String },
    Put { node: String, data: Vec<u8> },
    EndMarker(String),
    EndUpload(String),
    Blocking { node: String, blocking: bool },
    Close(String),
    Create(PartitionPoint),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// How the remote answers once the upload ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Error(String),
    Missing,
    Extra,
}

/// Behavior of one fake node.
#[derive(Debug, Clone)]
pub struct NodeScript {
    /// Flush calls that report would-block before the buffer drains.
    pub busy_flushes: usize,
    /// Reads that leave the result incomplete.
    pub busy_reads: usize,
    pub reply: Reply,
    pub refuse_connect: bool,
}

impl Default for NodeScript {
    fn default() -> Self {
        Self {
            busy_flushes: 0,
            busy_reads: 0,
            reply: Reply::Ok,
            refuse_connect: false,
        }
    }
}

/// A transport whose nodes are scripted, backed by real socket pairs.
#[derive(Clone, Default)]
pub struct MockTransport {
    log: EventLog,
    scripts: Arc<Mutex<HashMap<String, NodeScript>>>,
}

impl MockTransport {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            scripts: Default::default(),
        }
    }

    pub fn with_script(self, node: &str, script: NodeScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(node.to_string(), script);
        self
    }
}

impl Transport for MockTransport {
    fn open(&self, identity: &ChannelIdentity) -> Result<Box<dyn Connection>, TransportError> {
        let node = identity.node.to_string();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .unwrap_or_default();

        if script.refuse_connect {
            return Err(TransportError::Connect {
                message: format!("connection to {node} refused"),
            });
        }

        let (local, remote) =
            UnixStream::pair().map_err(|source| TransportError::Io { source })?;
        self.log.lock().unwrap().push(Event::Open(node.clone()));

        Ok(Box::new(MockConnection {
            node,
            log: self.log.clone(),
            script,
            local,
            remote,
            in_upload: false,
            busy: false,
            results: Vec::new(),
        }))
    }
}

struct MockConnection {
    node: String,
    log: EventLog,
    script: NodeScript,
    local: UnixStream,
    remote: UnixStream,
    in_upload: bool,
    busy: bool,
    results: Vec<RemoteResult>,
}

impl MockConnection {
    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }

    /// Makes the local socket readable, as if the remote answered.
    fn respond(&mut self) -> Result<(), TransportError> {
        self.remote
            .write_all(b"r")
            .map_err(|source| TransportError::Io { source })
    }
}

impl Connection for MockConnection {
    fn begin_upload(&mut self, command: &str, _binary: bool) -> Result<(), TransportError> {
        self.push(Event::Begin {
            node: self.node.clone(),
            command: command.to_string(),
        });
        self.in_upload = true;
        self.local
            .set_nonblocking(true)
            .map_err(|source| TransportError::Io { source })
    }

    fn put_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.push(Event::Put {
            node: self.node.clone(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn end_upload(&mut self) -> Result<(), TransportError> {
        self.push(Event::EndUpload(self.node.clone()));
        self.in_upload = false;
        Ok(())
    }

    fn put_end_marker(&mut self) -> Result<(), TransportError> {
        self.push(Event::EndMarker(self.node.clone()));
        self.in_upload = false;
        self.busy = true;
        self.respond()
    }

    fn in_upload(&mut self) -> bool {
        self.in_upload
    }

    fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        if self.script.busy_flushes > 0 {
            self.script.busy_flushes -= 1;
            return Ok(FlushStatus::WouldBlock);
        }
        Ok(FlushStatus::Flushed)
    }

    fn consume_input(&mut self) -> Result<(), TransportError> {
        let mut buf = [0u8; 64];
        loop {
            match self.local.read(&mut buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(source) => return Err(TransportError::Io { source }),
            }
        }

        if !self.busy {
            return Ok(());
        }

        if self.script.busy_reads > 0 {
            self.script.busy_reads -= 1;
            return self.respond();
        }

        self.busy = false;
        self.results = match &self.script.reply {
            Reply::Ok => vec![RemoteResult::CommandOk { rows: None }],
            Reply::Error(message) => vec![RemoteResult::Error {
                message: message.clone(),
            }],
            Reply::Missing => vec![],
            Reply::Extra => vec![
                RemoteResult::CommandOk { rows: None },
                RemoteResult::Other {
                    status: "COPY_IN".to_string(),
                },
            ],
        };
        self.results.reverse();
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn next_result(&mut self) -> Option<RemoteResult> {
        self.results.pop()
    }

    fn socket(&self) -> RawFd {
        self.local.as_raw_fd()
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<(), TransportError> {
        self.push(Event::Blocking {
            node: self.node.clone(),
            blocking,
        });
        self.local
            .set_nonblocking(!blocking)
            .map_err(|source| TransportError::Io { source })
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.push(Event::Close(self.node.clone()));
    }
}

/// A partition directory that records creations in the event log.
pub struct RecordingDirectory {
    inner: InMemoryPartitionDirectory,
    log: EventLog,
}

impl RecordingDirectory {
    pub fn new(inner: InMemoryPartitionDirectory, log: EventLog) -> Self {
        Self { inner, log }
    }

    pub fn inner(&self) -> &InMemoryPartitionDirectory {
        &self.inner
    }
}

impl PartitionDirectory for RecordingDirectory {
    fn find_owner(&self, point: &PartitionPoint) -> Result<Option<Partition>, DirectoryError> {
        self.inner.find_owner(point)
    }

    fn create(&self, point: &PartitionPoint) -> Result<Partition, DirectoryError> {
        self.log.lock().unwrap().push(Event::Create(point.clone()));
        self.inner.create(point)
    }

    fn compression_status(&self, id: PartitionId) -> Result<CompressionStatus, DirectoryError> {
        self.inner.compression_status(id)
    }

    fn set_unordered(&self, id: PartitionId) -> Result<CompressionStatus, DirectoryError> {
        self.inner.set_unordered(id)
    }
}

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

/// Concatenation of all bytes sent to the node.
pub fn received(log: &EventLog, node: &str) -> Vec<u8> {
    events(log)
        .into_iter()
        .filter_map(|event| match event {
            Event::Put { node: n, data } if n == node => Some(data),
            _ => None,
        })
        .flatten()
        .collect()
}

pub fn count(log: &EventLog, wanted: impl Fn(&Event) -> bool) -> usize {
    events(log).iter().filter(|event| wanted(event)).count()
}

pub fn principal() -> Principal {
    Principal::new("loader")
}

pub fn identity(node: &str) -> ChannelIdentity {
    ChannelIdentity::new(NodeId::new(node), principal())
}

/// `metrics(time int8, device int4, value text)` partitioned by time.
pub fn metrics_table(interval: i64) -> Table {
    Table::new("public", "metrics")
        .with_column("time", ColumnType::Int64)
        .with_column("device", ColumnType::Int32)
        .with_column("value", ColumnType::Text)
        .with_dimension(Dimension::open("time", interval))
}

pub fn directory_for(
    table: &Table,
    nodes: &[&str],
    replication: usize,
) -> InMemoryPartitionDirectory {
    InMemoryPartitionDirectory::new(
        table.dimensions.iter().map(|dimension| dimension.kind),
        nodes.iter().map(|node| NodeId::new(*node)),
        replication,
    )
    .expect("directory")
}

pub fn test_options() -> LoadOptions {
    LoadOptions::new().with_wait_timeout(Duration::from_millis(20))
}
