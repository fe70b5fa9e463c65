use std::sync::Arc;

use crate::{ColumnType, Dimension};

/// A column of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// A horizontally partitioned table.
#[derive(Debug, Clone)]
pub struct Table {
    /// The schema the table lives in.
    pub schema: String,
    /// The table name.
    pub name: String,
    /// Columns in table order.
    pub columns: Vec<Column>,
    /// Partition dimensions, in partition key order.
    pub dimensions: Vec<Dimension>,
}

pub type TableRef = Arc<Table>;

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            dimensions: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    /// Returns the position and definition of the named column.
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}
