//! The remote bulk-load command.
//!
//! Every channel of a load starts its upload with the same command text,
//! built once from the statement. In binary mode only the options the
//! binary format understands are forwarded.

use std::fmt::Write;

use shardload_resources::{Principal, Table};
use snafu::ensure;

use crate::error::{Result, ValidationSnafu};

/// Default text format delimiter.
pub const DEFAULT_DELIMITER: char = '\t';

/// Default text format null marker.
pub const DEFAULT_NULL_MARKER: &str = "\\N";

/// Default CSV quote character.
pub const DEFAULT_QUOTE: char = '"';

/// Words that must be quoted when used as identifiers.
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "both", "case", "cast",
    "check", "collate", "column", "constraint", "create", "default", "desc", "distinct", "do",
    "else", "end", "except", "false", "fetch", "for", "foreign", "from", "grant", "group",
    "having", "in", "into", "is", "join", "limit", "not", "null", "offset", "on", "only", "or",
    "order", "primary", "references", "select", "table", "then", "to", "true", "union", "unique",
    "user", "using", "when", "where", "window", "with",
];

/// Argument of a statement option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionArg {
    Integer(i64),
    /// Kept in its textual form to avoid losing precision.
    Float(String),
    String(String),
    /// Column names; `*` selects every column.
    List(Vec<String>),
    Star,
}

/// A `name [arg]` option of the load statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOption {
    pub name: String,
    pub arg: Option<OptionArg>,
}

/// The bulk-load statement as issued by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyStatement {
    /// Explicit column list, in statement order.
    pub columns: Option<Vec<String>>,
    pub options: Vec<CopyOption>,
    /// The principal the load acts as on every node.
    pub principal: Principal,
}

/// Delimiter, null marker and quoting of the text format.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFormat {
    pub delimiter: char,
    pub null_marker: String,
    pub csv: bool,
    pub quote: char,
    /// Written before a quote or escape character inside a quoted CSV field.
    pub escape: char,
}

impl CopyOption {
    pub fn new(name: impl Into<String>, arg: Option<OptionArg>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            arg,
        }
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Some(OptionArg::String(value.into())))
    }

    /// Returns the argument as uninterpreted text.
    pub fn arg_string(&self) -> Result<String> {
        let Some(arg) = &self.arg else {
            return ValidationSnafu {
                message: format!("{} requires a parameter", self.name),
            }
            .fail();
        };

        Ok(match arg {
            OptionArg::Integer(value) => value.to_string(),
            OptionArg::Float(value) | OptionArg::String(value) => value.clone(),
            OptionArg::List(names) => names
                .iter()
                .map(|name| {
                    if name == "*" {
                        name.clone()
                    } else {
                        quote_identifier(name)
                    }
                })
                .collect::<Vec<_>>()
                .join(", "),
            OptionArg::Star => "*".to_string(),
        })
    }
}

impl CopyStatement {
    pub fn new(principal: Principal) -> Self {
        Self {
            columns: None,
            options: Vec::new(),
            principal,
        }
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_option(mut self, option: CopyOption) -> Self {
        self.options.push(option);
        self
    }
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            null_marker: DEFAULT_NULL_MARKER.to_string(),
            csv: false,
            quote: DEFAULT_QUOTE,
            escape: DEFAULT_QUOTE,
        }
    }
}

impl TextFormat {
    /// Derives the text format from the statement options.
    ///
    /// `format csv` switches the delimiter to a comma unless one was given
    /// explicitly. The escape character defaults to the quote character.
    /// Binary input cannot be forwarded as text.
    pub fn from_options(options: &[CopyOption]) -> Result<Self> {
        let mut format = TextFormat::default();
        let mut delimiter_found = false;
        let mut escape = None;

        for option in options {
            match option.name.as_str() {
                "format" => {
                    let value = option.arg_string()?.to_lowercase();
                    ensure!(
                        value != "binary",
                        ValidationSnafu {
                            message: "remote copy does not support binary data",
                        }
                    );
                    if value == "csv" {
                        format.csv = true;
                        if !delimiter_found {
                            format.delimiter = ',';
                        }
                    }
                }
                "delimiter" => {
                    format.delimiter = single_char(option)?;
                    delimiter_found = true;
                }
                "null" => format.null_marker = option.arg_string()?,
                "quote" => format.quote = single_char(option)?,
                "escape" => escape = Some(single_char(option)?),
                _ => {}
            }
        }

        format.escape = escape.unwrap_or(format.quote);
        Ok(format)
    }
}

/// Builds the command every channel of the load starts its upload with.
pub fn deparse_copy_command(
    table: &Table,
    statement: &CopyStatement,
    binary: bool,
) -> Result<String> {
    let mut command = format!(
        "COPY {}.{} ",
        quote_identifier(&table.schema),
        quote_identifier(&table.name)
    );

    if let Some(columns) = &statement.columns {
        let columns = columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(command, "({columns}) ");
    }

    command.push_str("FROM STDIN");

    if statement.options.is_empty() && !binary {
        return Ok(command);
    }

    let mut rendered = Vec::with_capacity(statement.options.len() + 1);
    for option in &statement.options {
        if binary && !is_binary_option(&option.name) {
            continue;
        }
        rendered.push(deparse_option(option)?);
    }

    if binary {
        rendered.push("FORMAT binary".to_string());
    }

    let _ = write!(command, " WITH ({})", rendered.join(", "));
    Ok(command)
}

/// Quotes an identifier unless it is a plain lower-case, non-reserved name.
pub fn quote_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !RESERVED_KEYWORDS.contains(&name);

    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn is_binary_option(name: &str) -> bool {
    matches!(name, "oids" | "freeze" | "encoding")
}

fn deparse_option(option: &CopyOption) -> Result<String> {
    let name = option.name.as_str();
    match name {
        "delimiter" | "null" | "quote" | "escape" | "encoding" => {
            let value = option.arg_string()?.replace('\'', "''");
            Ok(format!("{name} '{value}'"))
        }
        "force_not_null" | "force_null" => Ok(format!("{name} ({})", option.arg_string()?)),
        "oids" | "freeze" | "header" if option.arg.is_none() => Ok(name.to_string()),
        _ => Ok(format!("{name} {}", option.arg_string()?)),
    }
}

fn single_char(option: &CopyOption) -> Result<char> {
    let value = option.arg_string()?;
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => ValidationSnafu {
            message: format!("COPY {} must be a single one-byte character", option.name),
        }
        .fail(),
    }
}
