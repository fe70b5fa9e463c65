use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use bytesize::ByteSize;
use shardload_resources::{NodeId, PartitionPoint};

/// Encoded rows waiting to be routed, with the partition point of each row.
#[derive(Debug)]
pub struct RowBatch {
    rows: Vec<Bytes>,
    points: Vec<PartitionPoint>,
    size_bytes: u64,
    max_rows: usize,
    max_bytes: ByteSize,
}

impl RowBatch {
    pub fn new(max_rows: usize, max_bytes: ByteSize) -> Self {
        Self {
            rows: Vec::with_capacity(max_rows.min(4096)),
            points: Vec::with_capacity(max_rows.min(4096)),
            size_bytes: 0,
            max_rows,
            max_bytes,
        }
    }

    pub fn push(&mut self, row: Bytes, point: PartitionPoint) {
        self.size_bytes += row.len() as u64;
        self.rows.push(row);
        self.points.push(point);
    }

    /// Whether the row count or the encoded size reached its limit.
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_rows || self.size_bytes >= self.max_bytes.as_u64()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn points(&self) -> &[PartitionPoint] {
        &self.points
    }

    /// Concatenates the given rows in order.
    pub fn concat(&self, rows: &[usize]) -> Bytes {
        let size = rows.iter().map(|&index| self.rows[index].len()).sum();
        let mut out = BytesMut::with_capacity(size);
        for &index in rows {
            out.extend_from_slice(&self.rows[index]);
        }
        out.freeze()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.points.clear();
        self.size_bytes = 0;
    }
}

/// Batch row indices per destination node, for one routing pass.
///
/// Nodes are kept in the order they were first seen.
#[derive(Debug, Default)]
pub struct NodeRowSets {
    nodes: Vec<(NodeId, Vec<usize>)>,
    index: HashMap<NodeId, usize>,
}

impl NodeRowSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: &NodeId, row: usize) {
        let position = match self.index.get(node) {
            Some(position) => *position,
            None => {
                self.nodes.push((node.clone(), Vec::new()));
                self.index.insert(node.clone(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        let rows = &mut self.nodes[position].1;
        if rows.last() != Some(&row) {
            rows.push(row);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[usize])> {
        self.nodes
            .iter()
            .map(|(node, rows)| (node, rows.as_slice()))
    }
}
