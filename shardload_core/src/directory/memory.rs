//! In-memory implementation of the partition directory.
//!
//! Partitions are hypercubes: open dimensions are sliced by a fixed interval
//! length, closed dimensions split the non-negative int4 range into an equal
//! number of slices. Suitable for testing and embedding.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use shardload_resources::{
    CompressionStatus, DimensionKind, NodeId, Partition, PartitionId, PartitionPoint,
};
use snafu::ensure;

use super::{DirectoryError, InternalSnafu, InvalidArgumentSnafu, PartitionDirectory, Result};

/// Size of the closed dimension coordinate space.
const CLOSED_RANGE: i64 = 1 << 31;

#[derive(Debug, Default)]
struct DirectoryStore {
    /// Map of slice key (lower bound per dimension) to partition.
    partitions: HashMap<Vec<i64>, Partition>,
    /// Partition id to slice key.
    index: HashMap<PartitionId, Vec<i64>>,
    next_id: u64,
}

#[derive(Debug)]
pub struct InMemoryPartitionDirectory {
    dimensions: Vec<DimensionKind>,
    nodes: Vec<NodeId>,
    replication_factor: usize,
    store: RwLock<DirectoryStore>,
}

impl InMemoryPartitionDirectory {
    /// Create a directory for the given dimensions and nodes.
    ///
    /// Each new partition is placed on `replication_factor` consecutive nodes,
    /// starting one node further than the previous partition.
    pub fn new(
        dimensions: impl IntoIterator<Item = DimensionKind>,
        nodes: impl IntoIterator<Item = NodeId>,
        replication_factor: usize,
    ) -> Result<Self> {
        let dimensions: Vec<_> = dimensions.into_iter().collect();
        let nodes: Vec<_> = nodes.into_iter().collect();

        ensure!(
            !nodes.is_empty(),
            InvalidArgumentSnafu {
                message: "at least one node is required",
            }
        );
        ensure!(
            replication_factor > 0 && replication_factor <= nodes.len(),
            InvalidArgumentSnafu {
                message: format!(
                    "replication factor {replication_factor} must be between 1 and {}",
                    nodes.len()
                ),
            }
        );
        for dimension in &dimensions {
            match dimension {
                DimensionKind::Open { interval_length } => ensure!(
                    *interval_length > 0,
                    InvalidArgumentSnafu {
                        message: "interval length must be positive",
                    }
                ),
                DimensionKind::Closed { num_slices } => ensure!(
                    *num_slices > 0,
                    InvalidArgumentSnafu {
                        message: "number of slices must be positive",
                    }
                ),
            }
        }

        Ok(Self {
            dimensions,
            nodes,
            replication_factor,
            store: RwLock::new(DirectoryStore::default()),
        })
    }

    /// Marks the partition as compacted.
    pub fn set_compressed(&self, id: PartitionId) -> Result<()> {
        let mut store = self.write()?;
        let partition = store.partition_mut(id)?;
        partition.compression.compressed = true;
        Ok(())
    }

    /// Number of partitions created so far.
    pub fn len(&self) -> usize {
        self.store
            .read()
            .map(|store| store.partitions.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the lower bound of the slice containing the point, per dimension.
    fn slice_key(&self, point: &PartitionPoint) -> Result<Vec<i64>> {
        ensure!(
            point.num_dimensions() == self.dimensions.len(),
            InvalidArgumentSnafu {
                message: format!(
                    "point {point} has {} dimensions, expected {}",
                    point.num_dimensions(),
                    self.dimensions.len()
                ),
            }
        );

        self.dimensions
            .iter()
            .zip(point.coordinates())
            .map(|(dimension, coordinate)| match dimension {
                DimensionKind::Open { interval_length } => coordinate
                    .div_euclid(*interval_length)
                    .checked_mul(*interval_length)
                    .ok_or_else(|| {
                        InvalidArgumentSnafu {
                            message: format!("open coordinate {coordinate} has no slice"),
                        }
                        .build()
                    }),
                DimensionKind::Closed { num_slices } => {
                    ensure!(
                        (0..CLOSED_RANGE).contains(coordinate),
                        InvalidArgumentSnafu {
                            message: format!("closed coordinate {coordinate} out of range"),
                        }
                    );
                    let slices = i64::from(*num_slices);
                    let slice = coordinate * slices / CLOSED_RANGE;
                    Ok(slice * CLOSED_RANGE / slices)
                }
            })
            .collect()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DirectoryStore>> {
        self.store.read().map_err(|_| DirectoryError::Internal {
            message: "directory lock poisoned".to_string(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DirectoryStore>> {
        self.store.write().map_err(|_| DirectoryError::Internal {
            message: "directory lock poisoned".to_string(),
        })
    }
}

impl DirectoryStore {
    fn partition_mut(&mut self, id: PartitionId) -> Result<&mut Partition> {
        let Some(key) = self.index.get(&id) else {
            return Err(DirectoryError::NotFound {
                resource: "partition",
                message: id.to_string(),
            });
        };
        self.partitions.get_mut(key).ok_or_else(|| {
            InternalSnafu {
                message: format!("{id} indexed but missing"),
            }
            .build()
        })
    }
}

impl PartitionDirectory for InMemoryPartitionDirectory {
    fn find_owner(&self, point: &PartitionPoint) -> Result<Option<Partition>> {
        let key = self.slice_key(point)?;
        let store = self.read()?;
        Ok(store.partitions.get(&key).cloned())
    }

    fn create(&self, point: &PartitionPoint) -> Result<Partition> {
        let key = self.slice_key(point)?;
        let mut store = self.write()?;

        if let Some(partition) = store.partitions.get(&key) {
            return Ok(partition.clone());
        }

        let id = PartitionId(store.next_id);
        store.next_id += 1;

        let first = (id.0 as usize) % self.nodes.len();
        let owners = (0..self.replication_factor)
            .map(|i| self.nodes[(first + i) % self.nodes.len()].clone())
            .collect();

        let partition = Partition {
            id,
            owners,
            compression: CompressionStatus::default(),
        };

        store.index.insert(id, key.clone());
        store.partitions.insert(key, partition.clone());

        Ok(partition)
    }

    fn compression_status(&self, id: PartitionId) -> Result<CompressionStatus> {
        let store = self.read()?;
        store
            .index
            .get(&id)
            .and_then(|key| store.partitions.get(key))
            .map(|partition| partition.compression)
            .ok_or_else(|| DirectoryError::NotFound {
                resource: "partition",
                message: id.to_string(),
            })
    }

    fn set_unordered(&self, id: PartitionId) -> Result<CompressionStatus> {
        let mut store = self.write()?;
        let partition = store.partition_mut(id)?;
        partition.compression.unordered = true;
        Ok(partition.compression)
    }
}
