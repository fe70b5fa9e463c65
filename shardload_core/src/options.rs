use std::time::Duration;

use bytesize::ByteSize;
use clap::Args;
use snafu::ensure;

use crate::error::{Result, ValidationSnafu};

/// Maximum number of rows in one batch.
pub const DEFAULT_BATCH_MAX_ROWS: usize = 1024;

/// Maximum encoded bytes in one batch.
pub const DEFAULT_BATCH_MAX_BYTES: ByteSize = ByteSize::mib(10);

/// How long a single readiness wait may block before cancellation is checked.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Options controlling one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Flush the batch after this many rows.
    pub batch_max_rows: usize,
    /// Flush the batch after this many encoded bytes.
    pub batch_max_bytes: ByteSize,
    /// Send rows in the binary format instead of text.
    pub binary: bool,
    /// Upper bound of one readiness wait.
    pub wait_timeout: Duration,
}

/// Command line arguments for load options.
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Maximum number of rows buffered before they are sent to the nodes
    #[arg(long, env = "SHARDLOAD_BATCH_MAX_ROWS", default_value_t = DEFAULT_BATCH_MAX_ROWS)]
    pub batch_max_rows: usize,
    /// Maximum encoded size of a batch, e.g. 10MiB
    #[arg(long, env = "SHARDLOAD_BATCH_MAX_BYTES", default_value = "10MiB")]
    pub batch_max_bytes: ByteSize,
    /// Send rows to the nodes in the binary format
    #[arg(long, env = "SHARDLOAD_BINARY")]
    pub binary: bool,
    /// Readiness wait timeout in milliseconds
    #[arg(long, env = "SHARDLOAD_WAIT_TIMEOUT_MS", default_value_t = 1000)]
    pub wait_timeout_ms: u64,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_max_rows(mut self, batch_max_rows: usize) -> Self {
        self.batch_max_rows = batch_max_rows;
        self
    }

    pub fn with_batch_max_bytes(mut self, batch_max_bytes: ByteSize) -> Self {
        self.batch_max_bytes = batch_max_bytes;
        self
    }

    pub fn with_binary(mut self, binary: bool) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.batch_max_rows > 0,
            ValidationSnafu {
                message: "batch_max_rows must be greater than zero",
            }
        );
        ensure!(
            self.batch_max_bytes.as_u64() > 0,
            ValidationSnafu {
                message: "batch_max_bytes must be greater than zero",
            }
        );
        ensure!(
            !self.wait_timeout.is_zero(),
            ValidationSnafu {
                message: "wait_timeout must be greater than zero",
            }
        );
        Ok(())
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_max_rows: DEFAULT_BATCH_MAX_ROWS,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            binary: false,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl From<LoadArgs> for LoadOptions {
    fn from(args: LoadArgs) -> Self {
        LoadOptions::new()
            .with_batch_max_rows(args.batch_max_rows)
            .with_batch_max_bytes(args.batch_max_bytes)
            .with_binary(args.binary)
            .with_wait_timeout(Duration::from_millis(args.wait_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[clap(flatten)]
        load: LoadArgs,
    }

    #[test]
    fn test_defaults() {
        let options = LoadOptions::default();
        assert_eq!(options.batch_max_rows, 1024);
        assert_eq!(options.batch_max_bytes.as_u64(), 10 * 1024 * 1024);
        assert!(!options.binary);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = LoadOptions::new()
            .with_batch_max_rows(0)
            .validate()
            .unwrap_err();
        assert!(err.is_validation());

        let err = LoadOptions::new()
            .with_wait_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_args_into_options() {
        let cli = Cli::try_parse_from([
            "shardload",
            "--batch-max-rows",
            "10",
            "--batch-max-bytes",
            "1MiB",
            "--binary",
            "--wait-timeout-ms",
            "50",
        ])
        .unwrap();

        let options = LoadOptions::from(cli.load);
        assert_eq!(options.batch_max_rows, 10);
        assert_eq!(options.batch_max_bytes, ByteSize::mib(1));
        assert!(options.binary);
        assert_eq!(options.wait_timeout, Duration::from_millis(50));
    }
}
