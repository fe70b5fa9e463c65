//! Partition directory.
//!
//! The directory knows which partitions exist and which nodes hold their
//! replicas. The load consults it for every routed row and asks it to create
//! partitions on demand.

mod memory;

use shardload_resources::{CompressionStatus, Partition, PartitionId, PartitionPoint};
use snafu::Snafu;

pub use self::memory::InMemoryPartitionDirectory;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DirectoryError {
    #[snafu(display("{resource} not found: {message}"))]
    NotFound {
        resource: &'static str,
        message: String,
    },
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = DirectoryError> = std::result::Result<T, E>;

/// Lookup and creation of partitions.
pub trait PartitionDirectory: Send + Sync {
    /// Returns the partition containing the point, if it exists.
    fn find_owner(&self, point: &PartitionPoint) -> Result<Option<Partition>>;

    /// Creates the partition containing the point.
    ///
    /// Creation is idempotent: if the partition already exists it is returned.
    fn create(&self, point: &PartitionPoint) -> Result<Partition>;

    /// Returns the compaction flags of the partition.
    fn compression_status(&self, id: PartitionId) -> Result<CompressionStatus>;

    /// Flags a compacted partition as unordered and returns the new flags.
    fn set_unordered(&self, id: PartitionId) -> Result<CompressionStatus>;
}
