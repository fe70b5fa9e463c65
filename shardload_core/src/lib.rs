//! Bulk loading of rows into a partitioned table spread over remote nodes.
//!
//! ## Data flow
//!
//! **Source**: [`RowSource`] -> [`Row`].
//!
//! **Batcher**: [`Row`] -> encoded bytes ([`RowCodec`]) + partition point ([`PartitionRouter`]).
//!
//! **Router**: partition point -> [`Partition`](shardload_resources::Partition) and its owner nodes.
//!
//! **Sender**: per-node row subsets -> [`UploadChannel`] from the [`ConnectionCache`].
//!
//! **Flusher**: upload channels -> acknowledged, idle channels ([`MultiplexedFlusher`]).
pub mod batch;
pub mod cache;
pub mod channel;
pub mod codec;
pub mod command;
pub mod directory;
pub mod engine;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod options;
pub mod router;
pub mod row;
pub mod selection;
pub mod transport;

pub use batch::{NodeRowSets, RowBatch};
pub use cache::ConnectionCache;
pub use channel::{ChannelState, UploadChannel};
pub use codec::RowCodec;
pub use command::{CopyOption, CopyStatement, OptionArg, TextFormat};
pub use directory::{DirectoryError, InMemoryPartitionDirectory, PartitionDirectory};
pub use engine::{LoadContext, run_load};
pub use error::{ErrorKind, LoadError, Result};
pub use flush::MultiplexedFlusher;
pub use metrics::LoadMetrics;
pub use options::{LoadArgs, LoadOptions};
pub use router::PartitionRouter;
pub use row::{Row, RowSource};
pub use selection::ColumnSelection;
pub use transport::{Connection, FlushStatus, RemoteResult, Transport, TransportError};
