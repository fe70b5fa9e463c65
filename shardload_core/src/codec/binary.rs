use bytes::{Buf, BufMut, Bytes, BytesMut};
use shardload_resources::{Column, ColumnType, Datum};
use snafu::{ResultExt, ensure};

use crate::{
    error::{DatumSnafu, Result, ValidationSnafu},
    row::Row,
};

use super::check_field_count;

/// Signature that starts every binary upload stream.
pub const BINARY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Field count that marks the end of a binary upload stream.
pub const BINARY_TRAILER: [u8; 2] = [0xff, 0xff];

/// Length written in place of a NULL field.
const NULL_LENGTH: i32 = -1;

/// Returns the stream header: signature, flags and header extension length.
pub fn binary_header() -> Bytes {
    let mut out = BytesMut::with_capacity(BINARY_SIGNATURE.len() + 8);
    out.put_slice(BINARY_SIGNATURE);
    out.put_u32(0);
    out.put_u32(0);
    out.freeze()
}

/// Binary format codec.
///
/// A row is the field count followed by a length-prefixed value per field,
/// all integers in network byte order.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    columns: Vec<Column>,
}

impl BinaryCodec {
    pub fn new(columns: &[Column]) -> Self {
        Self {
            columns: columns.to_vec(),
        }
    }

    pub fn encode(&self, row: &Row) -> Result<Bytes> {
        check_field_count(row, self.columns.len())?;

        let num_fields = u16::try_from(self.columns.len()).map_err(|_| {
            ValidationSnafu {
                message: format!("too many columns: {}", self.columns.len()),
            }
            .build()
        })?;

        let mut out = BytesMut::with_capacity(2 + 8 * self.columns.len());
        out.put_u16(num_fields);

        let mut value = Vec::new();
        for (index, column) in self.columns.iter().enumerate() {
            let datum = row
                .datum(index, column.column_type)
                .context(DatumSnafu {
                    column: column.name.clone(),
                })?;

            let Some(datum) = datum else {
                out.put_i32(NULL_LENGTH);
                continue;
            };

            value.clear();
            datum.write_binary(&mut value);
            let length = i32::try_from(value.len()).map_err(|_| {
                ValidationSnafu {
                    message: format!("value of column \"{}\" is too large", column.name),
                }
                .build()
            })?;
            out.put_i32(length);
            out.put_slice(&value);
        }

        Ok(out.freeze())
    }
}

/// Decodes one binary row with the given column types.
pub fn decode_row(mut data: &[u8], column_types: &[ColumnType]) -> Result<Vec<Option<Datum>>> {
    ensure!(
        data.remaining() >= 2,
        ValidationSnafu {
            message: "binary row is missing its field count",
        }
    );
    let num_fields = usize::from(data.get_u16());
    ensure!(
        num_fields == column_types.len(),
        ValidationSnafu {
            message: format!(
                "binary row has {num_fields} fields, expected {}",
                column_types.len()
            ),
        }
    );

    let mut fields = Vec::with_capacity(num_fields);
    for (index, column_type) in column_types.iter().enumerate() {
        ensure!(
            data.remaining() >= 4,
            ValidationSnafu {
                message: format!("binary field {index} is missing its length"),
            }
        );
        let length = data.get_i32();
        if length == NULL_LENGTH {
            fields.push(None);
            continue;
        }

        let length = usize::try_from(length).unwrap_or(usize::MAX);
        ensure!(
            data.remaining() >= length,
            ValidationSnafu {
                message: format!("binary field {index} is truncated"),
            }
        );
        let datum = column_type
            .decode_binary(&data[..length])
            .context(DatumSnafu {
                column: index.to_string(),
            })?;
        data.advance(length);
        fields.push(Some(datum));
    }

    ensure!(
        !data.has_remaining(),
        ValidationSnafu {
            message: "trailing bytes after binary row",
        }
    );

    Ok(fields)
}
