use std::fmt;

use crate::NodeId;

/// A coordinate in the partition space, one value per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionPoint {
    coordinates: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u64);

/// Compaction flags of a partition as seen by the storage layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionStatus {
    pub compressed: bool,
    /// Set when rows were written into a compressed partition after
    /// compaction, so the storage layer knows it must re-sort.
    pub unordered: bool,
}

/// A partition and the nodes holding its replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: PartitionId,
    pub owners: Vec<NodeId>,
    pub compression: CompressionStatus,
}

impl PartitionPoint {
    pub fn new(coordinates: Vec<i64>) -> Self {
        Self { coordinates }
    }

    pub fn coordinates(&self) -> &[i64] {
        &self.coordinates
    }

    pub fn num_dimensions(&self) -> usize {
        self.coordinates.len()
    }
}

impl Partition {
    /// Whether rows routed into this partition require it to be flagged
    /// unordered first.
    pub fn needs_unordered_mark(&self) -> bool {
        self.compression.compressed && !self.compression.unordered
    }
}

impl fmt::Display for PartitionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, coordinate) in self.coordinates.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{coordinate}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_display() {
        let point = PartitionPoint::new(vec![1_000, -3]);
        assert_eq!(point.to_string(), "(1000, -3)");
        assert_eq!(point.num_dimensions(), 2);
    }

    #[test]
    fn test_needs_unordered_mark() {
        let mut partition = Partition {
            id: PartitionId(1),
            owners: vec![NodeId::new("a")],
            compression: CompressionStatus::default(),
        };
        assert!(!partition.needs_unordered_mark());

        partition.compression.compressed = true;
        assert!(partition.needs_unordered_mark());

        partition.compression.unordered = true;
        assert!(!partition.needs_unordered_mark());
    }
}
