//! The load driving loop.
//!
//! A [`LoadContext`] owns everything one load needs: the codec, the router,
//! the connection cache and the current batch. Rows are pulled from the
//! source until the batch is full, routed to their partitions' owners, and
//! each node's rows are sent to its channel as one contiguous write. When the
//! load ends, successfully or not, every channel is finalized exactly once.

use std::sync::Arc;

use shardload_observability::KeyValue;
use shardload_resources::{ChannelIdentity, Partition, Principal, TableRef};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn};

use crate::{
    batch::{NodeRowSets, RowBatch},
    cache::ConnectionCache,
    codec::RowCodec,
    command::{CopyStatement, deparse_copy_command},
    directory::PartitionDirectory,
    error::{FirstError, LoadError, Result},
    flush::MultiplexedFlusher,
    metrics::LoadMetrics,
    options::LoadOptions,
    router::PartitionRouter,
    row::{Row, RowSource},
    selection::ColumnSelection,
    transport::Transport,
};

/// State of one bulk load.
pub struct LoadContext {
    table: TableRef,
    principal: Principal,
    selection: ColumnSelection,
    codec: RowCodec,
    router: PartitionRouter,
    cache: ConnectionCache,
    flusher: MultiplexedFlusher,
    batch: RowBatch,
    ct: CancellationToken,
    metrics: LoadMetrics,
    rows_processed: u64,
    finished: bool,
}

impl LoadContext {
    /// Prepares a load of the statement into the table.
    ///
    /// Options, columns and partition dimensions are validated here, before
    /// any channel is opened.
    pub fn begin(
        statement: &CopyStatement,
        table: TableRef,
        directory: Arc<dyn PartitionDirectory>,
        transport: Arc<dyn Transport>,
        options: LoadOptions,
        ct: CancellationToken,
    ) -> Result<Self> {
        options.validate()?;

        let selection = ColumnSelection::resolve(&table, statement.columns.as_deref())?;
        let codec = RowCodec::new(&selection, &statement.options, options.binary)?;
        let command = deparse_copy_command(&table, statement, options.binary)?;

        let metrics = LoadMetrics::default();
        let router =
            PartitionRouter::new(&table, &selection, directory)?.with_metrics(metrics.clone());
        let flusher =
            MultiplexedFlusher::new(options.wait_timeout, ct.clone()).with_metrics(metrics.clone());

        info!(
            table = %table.name,
            principal = %statement.principal,
            binary = options.binary,
            %command,
            "starting load"
        );

        Ok(Self {
            principal: statement.principal.clone(),
            selection,
            codec,
            router,
            cache: ConnectionCache::new(transport, command, options.binary),
            flusher,
            batch: RowBatch::new(options.batch_max_rows, options.batch_max_bytes),
            ct,
            metrics,
            rows_processed: 0,
            finished: false,
            table,
        })
    }

    /// The command every channel starts its upload with.
    pub fn command(&self) -> &str {
        self.cache.command()
    }

    pub fn selection(&self) -> &ColumnSelection {
        &self.selection
    }

    /// Rows handed to channels so far.
    pub fn rows_processed(&self) -> u64 {
        self.rows_processed
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    /// Loads every row of the source and finalizes all channels.
    ///
    /// Returns the number of rows sent. Channels are finalized even when
    /// loading fails, in which case the loading error is returned.
    pub fn run<S: RowSource + ?Sized>(mut self, source: &mut S) -> Result<u64> {
        let copied = self.copy_rows(source);
        let finished = self.finish();

        match (copied, finished) {
            (Ok(rows), Ok(())) => {
                info!(table = %self.table.name, rows, "load finished");
                Ok(rows)
            }
            (Ok(_), Err(error)) | (Err(error), Ok(())) => Err(error),
            (Err(error), Err(finish_error)) => {
                warn!(%error, %finish_error, "failed to finalize channels after load error");
                Err(error)
            }
        }
    }

    /// Resolves the partition of a single row.
    ///
    /// Creating a partition first finalizes every channel with an upload in
    /// progress.
    pub fn route_row(&mut self, row: &Row) -> Result<Partition> {
        let point = self.router.resolve_point(row)?;
        let Self {
            router,
            cache,
            flusher,
            ..
        } = self;
        router.resolve_partition(&point, || {
            if cache.has_active() {
                debug!("finalizing uploads before creating a partition");
                cache.finalize(flusher)?;
            }
            Ok(())
        })
    }

    /// Sends one row to every owner of its partition.
    ///
    /// On failure every channel is finalized before the error is returned.
    pub fn send_row(&mut self, row: &Row, partition: &Partition) -> Result<()> {
        let Err(error) = self.try_send_row(row, partition) else {
            return Ok(());
        };

        if let Err(finalize_error) = self.cache.finalize(&self.flusher) {
            warn!(%error, %finalize_error, "failed to finalize channels after send error");
        }
        Err(error)
    }

    /// Finalizes all channels and ends the load.
    pub fn end(mut self) -> Result<u64> {
        self.finish()?;
        info!(table = %self.table.name, rows = self.rows_processed, "load finished");
        Ok(self.rows_processed)
    }

    fn copy_rows<S: RowSource + ?Sized>(&mut self, source: &mut S) -> Result<u64> {
        let mut pass = 0usize;
        let mut eof = false;

        while !eof {
            if self.ct.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            pass += 1;
            let _span = debug_span!("batch", pass).entered();

            while !self.batch.is_full() {
                let Some(row) = source.next_row()? else {
                    eof = true;
                    break;
                };
                let encoded = self.codec.encode(&row)?;
                let point = self.router.resolve_point(&row)?;
                self.batch.push(encoded, point);
            }

            if self.batch.is_empty() {
                continue;
            }

            debug!(
                rows = self.batch.len(),
                bytes = self.batch.size_bytes(),
                "processing batch"
            );

            let node_rows = self.route_batch()?;
            self.send_batch(&node_rows)?;

            let rows = self.batch.len() as u64;
            self.rows_processed += rows;
            self.metrics.rows.add(rows, &[]);
            self.batch.clear();
        }

        Ok(self.rows_processed)
    }

    /// Groups the batch rows by owner node.
    ///
    /// Partitions are created on demand. Before the first creation of the
    /// pass every channel with an upload in progress is finalized; later
    /// creations in the same pass find nothing left to finalize.
    fn route_batch(&mut self) -> Result<NodeRowSets> {
        let Self {
            router,
            cache,
            flusher,
            batch,
            ..
        } = self;

        let mut node_rows = NodeRowSets::new();
        let mut flushed = false;

        for (index, point) in batch.points().iter().enumerate() {
            let partition = router.resolve_partition(point, || {
                if !flushed {
                    flushed = true;
                    if cache.has_active() {
                        debug!("finalizing uploads before creating a partition");
                        cache.finalize(flusher)?;
                    }
                }
                Ok(())
            })?;

            for owner in &partition.owners {
                node_rows.add(owner, index);
            }
        }

        Ok(node_rows)
    }

    /// Sends each node's rows to its channel in one write.
    fn send_batch(&mut self, node_rows: &NodeRowSets) -> Result<()> {
        for (node, rows) in node_rows.iter() {
            let identity = ChannelIdentity::new(node.clone(), self.principal.clone());
            let data = self.batch.concat(rows);

            self.cache.get_for_upload(&identity)?.put(&data)?;

            self.metrics
                .bytes
                .add(data.len() as u64, &[KeyValue::new("node", node.to_string())]);
            debug!(%node, rows = rows.len(), bytes = data.len(), "sent rows");
        }

        Ok(())
    }

    fn try_send_row(&mut self, row: &Row, partition: &Partition) -> Result<()> {
        let data = self.codec.encode(row)?;

        for owner in &partition.owners {
            let identity = ChannelIdentity::new(owner.clone(), self.principal.clone());
            self.cache.get_for_upload(&identity)?.put(&data)?;
            self.metrics
                .bytes
                .add(data.len() as u64, &[KeyValue::new("node", owner.to_string())]);
        }

        self.rows_processed += 1;
        self.metrics.rows.add(1, &[]);
        Ok(())
    }

    /// Finalizes every channel, once.
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let _span = debug_span!("finish", channels = self.cache.len()).entered();
        let mut errors = FirstError::default();

        if let Err(error) = self.cache.finalize(&self.flusher) {
            errors.record(error);
        }
        if let Err(error) = self.cache.end_sub_protocol(&self.flusher) {
            errors.record(error);
        }

        errors.into_result()
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        if let Err(error) = self.finish() {
            warn!(%error, "failed to finalize channels while dropping load");
        }
    }
}

/// Loads every row of the source into the table.
///
/// Returns the number of rows sent to the nodes.
pub fn run_load<S: RowSource + ?Sized>(
    statement: &CopyStatement,
    table: TableRef,
    directory: Arc<dyn PartitionDirectory>,
    transport: Arc<dyn Transport>,
    options: LoadOptions,
    ct: CancellationToken,
    source: &mut S,
) -> Result<u64> {
    LoadContext::begin(statement, table, directory, transport, options, ct)?.run(source)
}
