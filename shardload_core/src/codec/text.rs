use bytes::{BufMut, Bytes, BytesMut};

use crate::{command::TextFormat, error::Result, row::Row};

use super::check_field_count;

/// Text format codec.
///
/// Fields are joined by the delimiter and the row ends with a newline. NULL
/// fields are written as the null marker.
#[derive(Debug, Clone)]
pub struct TextCodec {
    format: TextFormat,
    num_fields: usize,
}

impl TextCodec {
    pub fn new(format: TextFormat, num_fields: usize) -> Self {
        Self { format, num_fields }
    }

    pub fn format(&self) -> &TextFormat {
        &self.format
    }

    pub fn encode(&self, row: &Row) -> Result<Bytes> {
        check_field_count(row, self.num_fields)?;

        let mut out = BytesMut::with_capacity(16 * self.num_fields);
        for index in 0..self.num_fields {
            if index > 0 {
                put_char(&mut out, self.format.delimiter);
            }
            match row.text_field(index) {
                None => out.put_slice(self.format.null_marker.as_bytes()),
                Some(value) if self.format.csv => self.put_csv(&mut out, &value),
                Some(value) => self.put_escaped(&mut out, &value),
            }
        }
        out.put_u8(b'\n');

        Ok(out.freeze())
    }

    fn put_escaped(&self, out: &mut BytesMut, value: &str) {
        for c in value.chars() {
            match c {
                '\\' => out.put_slice(b"\\\\"),
                '\n' => out.put_slice(b"\\n"),
                '\r' => out.put_slice(b"\\r"),
                c if c == self.format.delimiter => {
                    out.put_u8(b'\\');
                    put_char(out, c);
                }
                c => put_char(out, c),
            }
        }
    }

    fn put_csv(&self, out: &mut BytesMut, value: &str) {
        let quote = self.format.quote;
        let needs_quotes = value == self.format.null_marker
            || value
                .chars()
                .any(|c| c == self.format.delimiter || c == quote || c == '\n' || c == '\r');

        if !needs_quotes {
            out.put_slice(value.as_bytes());
            return;
        }

        let escape = self.format.escape;
        put_char(out, quote);
        for c in value.chars() {
            if c == quote || c == escape {
                put_char(out, escape);
            }
            put_char(out, c);
        }
        put_char(out, quote);
    }
}

fn put_char(out: &mut BytesMut, c: char) {
    let mut buf = [0u8; 4];
    out.put_slice(c.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use shardload_resources::Datum;

    use super::*;
    use crate::command::{CopyOption, TextFormat};

    fn codec(options: &[CopyOption], num_fields: usize) -> TextCodec {
        TextCodec::new(TextFormat::from_options(options).unwrap(), num_fields)
    }

    #[test]
    fn test_comma_delimiter_default_null() {
        let codec = codec(&[CopyOption::string("delimiter", ",")], 3);
        let bytes = codec
            .encode(&Row::text([Some("1"), None, Some("x")]))
            .unwrap();
        assert_eq!(&bytes[..], b"1,\\N,x\n");
    }

    #[test]
    fn test_default_tab_delimiter() {
        let codec = codec(&[], 2);
        let bytes = codec.encode(&Row::text([Some("a"), Some("b")])).unwrap();
        assert_eq!(&bytes[..], b"a\tb\n");
    }

    #[test]
    fn test_escaping() {
        let codec = codec(&[], 1);
        let bytes = codec
            .encode(&Row::text([Some("a\tb\\c\nd")]))
            .unwrap();
        assert_eq!(&bytes[..], b"a\\\tb\\\\c\\nd\n");
    }

    #[test]
    fn test_csv_quoting() {
        let codec = codec(&[CopyOption::string("format", "csv")], 3);
        let bytes = codec
            .encode(&Row::text([Some("a,b"), Some("say \"hi\""), None]))
            .unwrap();
        assert_eq!(&bytes[..], b"\"a,b\",\"say \"\"hi\"\"\",\\N\n");
    }

    #[test]
    fn test_csv_escape_character() {
        let codec = codec(
            &[
                CopyOption::string("format", "csv"),
                CopyOption::string("escape", "\\"),
            ],
            2,
        );
        let bytes = codec
            .encode(&Row::text([Some("1"), Some("say \"hi\" c:\\")]))
            .unwrap();
        assert_eq!(&bytes[..], b"1,\"say \\\"hi\\\" c:\\\\\"\n");

        // A backslash outside quotes is literal.
        let bytes = codec.encode(&Row::text([Some("a\\b"), None])).unwrap();
        assert_eq!(&bytes[..], b"a\\b,\\N\n");
    }

    #[test]
    fn test_typed_values() {
        let codec = codec(&[], 3);
        let bytes = codec
            .encode(&Row::values([
                Some(Datum::Int64(7)),
                Some(Datum::Bool(false)),
                None,
            ]))
            .unwrap();
        assert_eq!(&bytes[..], b"7\tf\t\\N\n");
    }
}
