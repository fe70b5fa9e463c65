use std::collections::HashSet;

use shardload_resources::{Column, Table};
use snafu::ensure;

use crate::error::{Result, ValidationSnafu};

/// The columns a load writes, in the order rows carry them.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSelection {
    columns: Vec<Column>,
}

impl ColumnSelection {
    /// Resolves the statement's column list against the table.
    ///
    /// Without a column list every table column is selected, in table order.
    pub fn resolve(table: &Table, names: Option<&[String]>) -> Result<Self> {
        let Some(names) = names else {
            return Ok(Self {
                columns: table.columns.clone(),
            });
        };

        let mut seen = HashSet::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());

        for name in names {
            let Some((_, column)) = table.column(name) else {
                return ValidationSnafu {
                    message: format!(
                        "column \"{name}\" of relation \"{}\" does not exist",
                        table.name
                    ),
                }
                .fail();
            };

            ensure!(
                seen.insert(name.as_str()),
                ValidationSnafu {
                    message: format!("column \"{name}\" specified more than once"),
                }
            );

            columns.push(column.clone());
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of the named column in the selection.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}
