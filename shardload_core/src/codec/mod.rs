//! Row encoding in the remote's bulk-load wire format.
//!
//! The codec is chosen once per load and dispatched explicitly.

mod binary;
mod text;

use bytes::Bytes;
use snafu::ensure;

use crate::{
    command::{CopyOption, TextFormat},
    error::{Result, ValidationSnafu},
    row::Row,
    selection::ColumnSelection,
};

pub use self::{
    binary::{BINARY_SIGNATURE, BINARY_TRAILER, BinaryCodec, binary_header, decode_row},
    text::TextCodec,
};

/// Encodes rows for the remote, one complete row per call.
#[derive(Debug, Clone)]
pub enum RowCodec {
    Text(TextCodec),
    Binary(BinaryCodec),
}

impl RowCodec {
    /// Builds the codec for a load.
    ///
    /// The text codec derives its delimiter and null marker from the
    /// statement options, which also validates them.
    pub fn new(selection: &ColumnSelection, options: &[CopyOption], binary: bool) -> Result<Self> {
        if binary {
            return Ok(RowCodec::Binary(BinaryCodec::new(selection.columns())));
        }

        let format = TextFormat::from_options(options)?;
        Ok(RowCodec::Text(TextCodec::new(format, selection.len())))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, RowCodec::Binary(_))
    }

    /// Encodes one row, fields in column selection order.
    pub fn encode(&self, row: &Row) -> Result<Bytes> {
        match self {
            RowCodec::Text(codec) => codec.encode(row),
            RowCodec::Binary(codec) => codec.encode(row),
        }
    }
}

fn check_field_count(row: &Row, expected: usize) -> Result<()> {
    ensure!(
        row.len() == expected,
        ValidationSnafu {
            message: format!("row has {} fields, expected {expected}", row.len()),
        }
    );
    Ok(())
}
