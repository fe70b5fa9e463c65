//! Partition dimensions.
//!
//! A table is partitioned along one or more dimensions. Open dimensions are
//! range-like (usually time) and sliced by a fixed interval; closed
//! dimensions are hash-like and split a fixed value range into a number of
//! slices.

use std::{fmt, sync::Arc};

use crate::{Datum, DatumResult};

/// A user supplied transform applied to a dimension value before it is
/// converted to a coordinate.
pub type PartitionFn = Arc<dyn Fn(&Datum) -> DatumResult<Datum> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionKind {
    /// Range-like dimension, sliced every `interval_length` units.
    Open { interval_length: i64 },
    /// Hash-like dimension over `[0, i32::MAX]`, split into `num_slices`.
    Closed { num_slices: u16 },
}

/// Transform applied to a dimension value before coordinate conversion.
#[derive(Clone)]
pub enum Partitioning {
    /// 32-bit FNV-1a over the binary representation, masked to a
    /// non-negative `Int32`.
    Hash,
    Custom(PartitionFn),
}

/// One axis of a table's partition key.
#[derive(Debug, Clone)]
pub struct Dimension {
    /// The column holding the dimension value.
    pub column: String,
    pub kind: DimensionKind,
    pub partitioning: Option<Partitioning>,
    /// Value used when the column is not part of a load's column selection.
    ///
    /// Only honored for closed dimensions.
    pub default: Option<Datum>,
}

impl Dimension {
    /// Creates an open dimension sliced every `interval_length` units.
    pub fn open(column: impl Into<String>, interval_length: i64) -> Self {
        Self {
            column: column.into(),
            kind: DimensionKind::Open { interval_length },
            partitioning: None,
            default: None,
        }
    }

    /// Creates a closed dimension hashed into `num_slices` slices.
    pub fn closed(column: impl Into<String>, num_slices: u16) -> Self {
        Self {
            column: column.into(),
            kind: DimensionKind::Closed { num_slices },
            partitioning: Some(Partitioning::Hash),
            default: None,
        }
    }

    pub fn with_partitioning(mut self, partitioning: Option<Partitioning>) -> Self {
        self.partitioning = partitioning;
        self
    }

    pub fn with_default(mut self, default: Datum) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_open(&self) -> bool {
        matches!(self.kind, DimensionKind::Open { .. })
    }
}

impl Partitioning {
    pub fn custom(f: impl Fn(&Datum) -> DatumResult<Datum> + Send + Sync + 'static) -> Self {
        Partitioning::Custom(Arc::new(f))
    }

    pub fn apply(&self, value: &Datum) -> DatumResult<Datum> {
        match self {
            Partitioning::Hash => Ok(Datum::Int32(hash_datum(value))),
            Partitioning::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partitioning::Hash => write!(f, "Hash"),
            Partitioning::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

fn hash_datum(value: &Datum) -> i32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = value
        .to_binary()
        .iter()
        .fold(FNV_OFFSET, |acc, byte| {
            (acc ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
        });

    (hash & 0x7fff_ffff) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_non_negative() {
        let a = Partitioning::Hash.apply(&Datum::Text("device-1".into())).unwrap();
        let b = Partitioning::Hash.apply(&Datum::Text("device-1".into())).unwrap();
        assert_eq!(a, b);

        let Datum::Int32(value) = a else {
            panic!("hash must produce an int4");
        };
        assert!(value >= 0);

        let c = Partitioning::Hash.apply(&Datum::Text("device-2".into())).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_custom_partitioning() {
        let part = Partitioning::custom(|value| match value {
            Datum::Int64(v) => Ok(Datum::Int64(v / 10)),
            other => Ok(other.clone()),
        });
        assert_eq!(part.apply(&Datum::Int64(123)).unwrap(), Datum::Int64(12));
    }

    #[test]
    fn test_dimension_constructors() {
        let time = Dimension::open("time", 3_600_000_000);
        assert!(time.is_open());
        assert!(time.partitioning.is_none());

        let device = Dimension::closed("device", 4).with_default(Datum::Int32(0));
        assert!(!device.is_open());
        assert!(matches!(device.partitioning, Some(Partitioning::Hash)));
        assert_eq!(device.default, Some(Datum::Int32(0)));
    }
}
