//! Partition routing.
//!
//! Each row is mapped to a point in the partition space, one coordinate per
//! dimension, and the point to the partition holding it.

use std::{borrow::Cow, sync::Arc};

use shardload_resources::{
    ColumnType, Datum, Dimension, DimensionKind, Partition, PartitionPoint, Table,
};
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    directory::PartitionDirectory,
    error::{DatumSnafu, DirectorySnafu, Result, ValidationSnafu},
    metrics::LoadMetrics,
    row::Row,
    selection::ColumnSelection,
};

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Where a dimension value comes from.
#[derive(Debug, Clone)]
enum DimensionSource {
    /// Position in the column selection.
    Field(usize),
    /// The column is not loaded; every row gets this value.
    Default(Datum),
}

#[derive(Debug, Clone)]
struct BoundDimension {
    dimension: Dimension,
    column_type: ColumnType,
    source: DimensionSource,
}

pub struct PartitionRouter {
    dimensions: Vec<BoundDimension>,
    directory: Arc<dyn PartitionDirectory>,
    metrics: LoadMetrics,
}

impl std::fmt::Debug for PartitionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionRouter")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl PartitionRouter {
    /// Binds the table's dimensions to the load's column selection.
    ///
    /// Open dimensions must be loaded. Closed dimensions that are not loaded
    /// need a default value.
    pub fn new(
        table: &Table,
        selection: &ColumnSelection,
        directory: Arc<dyn PartitionDirectory>,
    ) -> Result<Self> {
        let dimensions = table
            .dimensions
            .iter()
            .map(|dimension| bind_dimension(table, selection, dimension))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dimensions,
            directory,
            metrics: LoadMetrics::default(),
        })
    }

    pub fn with_metrics(mut self, metrics: LoadMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Computes the row's coordinate in every dimension.
    pub fn resolve_point(&self, row: &Row) -> Result<PartitionPoint> {
        let coordinates = self
            .dimensions
            .iter()
            .map(|bound| bound.coordinate(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(PartitionPoint::new(coordinates))
    }

    /// Returns the partition holding the point, creating it if needed.
    ///
    /// `before_create` runs before a partition is created, so that callers
    /// can close the upload sub-protocol on their channels first. Compacted
    /// partitions are flagged unordered before they are returned.
    pub fn resolve_partition(
        &self,
        point: &PartitionPoint,
        mut before_create: impl FnMut() -> Result<()>,
    ) -> Result<Partition> {
        let found = self
            .directory
            .find_owner(point)
            .context(DirectorySnafu {
                operation: "find partition",
            })?;

        let mut partition = match found {
            Some(partition) => partition,
            None => {
                before_create()?;
                let partition = self.directory.create(point).context(DirectorySnafu {
                    operation: "create partition",
                })?;
                self.metrics.partitions_created.add(1, &[]);
                debug!(%point, partition = %partition.id, "created partition");
                partition
            }
        };

        if partition.needs_unordered_mark() {
            debug!(partition = %partition.id, "marking compressed partition unordered");
            partition.compression =
                self.directory
                    .set_unordered(partition.id)
                    .context(DirectorySnafu {
                        operation: "mark partition unordered",
                    })?;
        }

        Ok(partition)
    }
}

fn bind_dimension(
    table: &Table,
    selection: &ColumnSelection,
    dimension: &Dimension,
) -> Result<BoundDimension> {
    let name = &dimension.column;
    let Some((_, column)) = table.column(name) else {
        return ValidationSnafu {
            message: format!(
                "partition column \"{name}\" does not exist in \"{}\"",
                table.name
            ),
        }
        .fail();
    };

    let source = match (selection.position(name), &dimension.default) {
        (Some(index), _) => DimensionSource::Field(index),
        (None, _) if dimension.is_open() => {
            return ValidationSnafu {
                message: format!("partition column \"{name}\" must be loaded"),
            }
            .fail();
        }
        (None, Some(default)) => {
            default
                .check_type(column.column_type)
                .context(DatumSnafu {
                    column: name.clone(),
                })?;
            DimensionSource::Default(default.clone())
        }
        (None, None) => {
            return ValidationSnafu {
                message: format!("partition column \"{name}\" is not loaded and has no default"),
            }
            .fail();
        }
    };

    Ok(BoundDimension {
        dimension: dimension.clone(),
        column_type: column.column_type,
        source,
    })
}

impl BoundDimension {
    fn coordinate(&self, row: &Row) -> Result<i64> {
        let name = &self.dimension.column;

        let value = match &self.source {
            DimensionSource::Field(index) => {
                row.datum(*index, self.column_type)
                    .context(DatumSnafu {
                        column: name.clone(),
                    })?
            }
            DimensionSource::Default(value) => Some(Cow::Borrowed(value)),
        };

        let Some(value) = value else {
            ensure!(
                !self.dimension.is_open(),
                ValidationSnafu {
                    message: format!(
                        "null value in column \"{name}\" violates not-null constraint"
                    ),
                }
            );
            ensure!(
                matches!(row, Row::Text(_)),
                ValidationSnafu {
                    message: format!("null value in partition column \"{name}\""),
                }
            );
            return Ok(0);
        };

        let value = match &self.dimension.partitioning {
            Some(partitioning) => {
                Cow::Owned(partitioning.apply(&value).context(DatumSnafu {
                    column: name.clone(),
                })?)
            }
            None => value,
        };

        match self.dimension.kind {
            DimensionKind::Open { .. } => normalize_open(name, &value),
            DimensionKind::Closed { .. } => match &*value {
                Datum::Int16(v) => Ok(i64::from(*v)),
                Datum::Int32(v) => Ok(i64::from(*v)),
                other => ValidationSnafu {
                    message: format!(
                        "closed dimension \"{name}\" requires an integer value, got {}",
                        other.column_type()
                    ),
                }
                .fail(),
            },
        }
    }
}

/// Maps an open dimension value to its coordinate.
///
/// Integers map to themselves, timestamps and dates to microseconds.
fn normalize_open(name: &str, value: &Datum) -> Result<i64> {
    match value {
        Datum::Int16(v) => Ok(i64::from(*v)),
        Datum::Int32(v) => Ok(i64::from(*v)),
        Datum::Int64(v) => Ok(*v),
        Datum::Timestamp(micros) => Ok(*micros),
        Datum::Date(days) => i64::from(*days)
            .checked_mul(MICROS_PER_DAY)
            .ok_or_else(|| {
                ValidationSnafu {
                    message: format!("date out of range in column \"{name}\""),
                }
                .build()
            }),
        other => ValidationSnafu {
            message: format!(
                "unsupported type {} for open dimension \"{name}\"",
                other.column_type()
            ),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use shardload_resources::{DatumError, NodeId, Partitioning};

    use super::*;
    use crate::directory::InMemoryPartitionDirectory;

    fn table() -> Table {
        Table::new("public", "metrics")
            .with_column("time", ColumnType::Timestamp)
            .with_column("device", ColumnType::Int32)
            .with_column("value", ColumnType::Float64)
            .with_dimension(Dimension::open("time", 3_600_000_000))
            .with_dimension(Dimension::closed("device", 4))
    }

    fn directory(table: &Table) -> Arc<InMemoryPartitionDirectory> {
        Arc::new(
            InMemoryPartitionDirectory::new(
                table.dimensions.iter().map(|d| d.kind),
                [NodeId::new("a"), NodeId::new("b")],
                1,
            )
            .unwrap(),
        )
    }

    fn router(table: &Table, names: Option<&[String]>) -> Result<PartitionRouter> {
        let selection = ColumnSelection::resolve(table, names)?;
        PartitionRouter::new(table, &selection, directory(table))
    }

    #[test]
    fn test_resolve_point_text() {
        let table = table();
        let router = router(&table, None).unwrap();
        let point = router
            .resolve_point(&Row::text([
                Some("2024-01-01 00:00:00"),
                Some("7"),
                Some("1.5"),
            ]))
            .unwrap();

        assert_eq!(point.num_dimensions(), 2);
        assert_eq!(point.coordinates()[0], 1_704_067_200_000_000);
        let hashed = Partitioning::Hash.apply(&Datum::Int32(7)).unwrap();
        assert_eq!(Datum::Int32(point.coordinates()[1] as i32), hashed);
    }

    #[test]
    fn test_null_values() {
        let table = table();
        let router = router(&table, None).unwrap();

        let err = router
            .resolve_point(&Row::text([None, Some("7"), None]))
            .unwrap_err();
        assert!(err.to_string().contains("not-null"));

        let point = router
            .resolve_point(&Row::text([Some("2024-01-01 00:00:00"), None, None]))
            .unwrap();
        assert_eq!(point.coordinates()[1], 0);

        let err = router
            .resolve_point(&Row::values([Some(Datum::Timestamp(0)), None, None]))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unloaded_dimensions() {
        let table = table();
        let names = vec!["device".to_string()];
        assert!(router(&table, Some(names.as_slice())).unwrap_err().is_validation());

        let names = vec!["time".to_string()];
        assert!(router(&table, Some(names.as_slice())).unwrap_err().is_validation());

        let table = Table::new("public", "metrics")
            .with_column("time", ColumnType::Timestamp)
            .with_column("device", ColumnType::Int32)
            .with_dimension(Dimension::open("time", 100))
            .with_dimension(Dimension::closed("device", 4).with_default(Datum::Int32(3)));
        let router = router(&table, Some(names.as_slice())).unwrap();
        let point = router
            .resolve_point(&Row::values([Some(Datum::Timestamp(250))]))
            .unwrap();
        assert_eq!(point.coordinates()[0], 250);
        assert_eq!(
            Datum::Int32(point.coordinates()[1] as i32),
            Partitioning::Hash.apply(&Datum::Int32(3)).unwrap()
        );
    }

    #[test]
    fn test_open_normalization() {
        assert_eq!(normalize_open("d", &Datum::Int16(-3)).unwrap(), -3);
        assert_eq!(normalize_open("d", &Datum::Date(1)).unwrap(), MICROS_PER_DAY);
        assert!(normalize_open("d", &Datum::Text("x".into())).is_err());
    }

    #[test]
    fn test_custom_partitioning() {
        let table = Table::new("public", "t")
            .with_column("k", ColumnType::Text)
            .with_dimension(Dimension::closed("k", 2).with_partitioning(Some(
                Partitioning::custom(|value| match value {
                    Datum::Text(s) => Ok(Datum::Int32(s.len() as i32)),
                    other => Err(DatumError::TypeMismatch {
                        expected: ColumnType::Text,
                        actual: other.column_type(),
                    }),
                }),
            )));
        let router = router(&table, None).unwrap();
        let point = router.resolve_point(&Row::text([Some("abcd")])).unwrap();
        assert_eq!(point.coordinates(), &[4]);
    }

    #[test]
    fn test_resolve_partition_creates_once() {
        let table = table();
        let directory = directory(&table);
        let selection = ColumnSelection::resolve(&table, None).unwrap();
        let router = PartitionRouter::new(&table, &selection, directory.clone()).unwrap();

        let calls = Cell::new(0);
        let point = PartitionPoint::new(vec![10, 10]);
        let first = router
            .resolve_partition(&point, || {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();
        let second = router
            .resolve_partition(&point, || {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(calls.get(), 1);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_compressed_partition_marked_unordered() {
        let table = table();
        let directory = directory(&table);
        let selection = ColumnSelection::resolve(&table, None).unwrap();
        let router = PartitionRouter::new(&table, &selection, directory.clone()).unwrap();

        let point = PartitionPoint::new(vec![10, 10]);
        let partition = router.resolve_partition(&point, || Ok(())).unwrap();
        directory.set_compressed(partition.id).unwrap();

        let partition = router.resolve_partition(&point, || Ok(())).unwrap();
        assert!(partition.compression.compressed);
        assert!(partition.compression.unordered);
    }
}
