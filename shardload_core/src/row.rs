use std::borrow::Cow;

use shardload_resources::{ColumnType, Datum, DatumResult};

use crate::error::Result;

/// One decoded input row, fields in column selection order.
///
/// `None` fields are NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Fields as text, as produced by a text input parser.
    Text(Vec<Option<String>>),
    /// Fields as typed values.
    Values(Vec<Option<Datum>>),
}

impl Row {
    pub fn text<S: Into<String>>(fields: impl IntoIterator<Item = Option<S>>) -> Self {
        Row::Text(fields.into_iter().map(|f| f.map(Into::into)).collect())
    }

    pub fn values(fields: impl IntoIterator<Item = Option<Datum>>) -> Self {
        Row::Values(fields.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Row::Text(fields) => fields.len(),
            Row::Values(fields) => fields.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, index: usize) -> bool {
        match self {
            Row::Text(fields) => fields.get(index).is_none_or(Option::is_none),
            Row::Values(fields) => fields.get(index).is_none_or(Option::is_none),
        }
    }

    /// Returns the field's text representation.
    pub fn text_field(&self, index: usize) -> Option<Cow<'_, str>> {
        match self {
            Row::Text(fields) => fields
                .get(index)
                .and_then(Option::as_deref)
                .map(Cow::Borrowed),
            Row::Values(fields) => fields
                .get(index)
                .and_then(Option::as_ref)
                .map(|datum| Cow::Owned(datum.to_text())),
        }
    }

    /// Returns the field as a value of the given column type.
    ///
    /// Text fields are parsed, typed fields must already have the column type.
    pub fn datum(
        &self,
        index: usize,
        column_type: ColumnType,
    ) -> DatumResult<Option<Cow<'_, Datum>>> {
        match self {
            Row::Text(fields) => match fields.get(index).and_then(Option::as_deref) {
                None => Ok(None),
                Some(text) => column_type.parse_text(text).map(|d| Some(Cow::Owned(d))),
            },
            Row::Values(fields) => match fields.get(index).and_then(Option::as_ref) {
                None => Ok(None),
                Some(datum) => {
                    datum.check_type(column_type)?;
                    Ok(Some(Cow::Borrowed(datum)))
                }
            },
        }
    }
}

/// The upstream producer of decoded rows.
///
/// Called repeatedly until it returns `None`; never rewound.
pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<I> RowSource for I
where
    I: Iterator<Item = Row>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.next())
    }
}
