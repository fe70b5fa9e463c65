mod datum;
mod dimension;
mod identity;
mod partition;
mod table;

pub use self::{
    datum::{ColumnType, Datum, DatumError, DatumResult},
    dimension::{Dimension, DimensionKind, PartitionFn, Partitioning},
    identity::{ChannelIdentity, NodeId, Principal},
    partition::{CompressionStatus, Partition, PartitionId, PartitionPoint},
    table::{Column, Table, TableRef},
};
