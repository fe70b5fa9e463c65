use shardload_observability::Counter;

#[derive(Clone)]
pub struct LoadMetrics {
    pub rows: Counter<u64>,
    pub bytes: Counter<u64>,
    pub partitions_created: Counter<u64>,
    pub finalize: Counter<u64>,
    pub finalize_errors: Counter<u64>,
}

impl Default for LoadMetrics {
    fn default() -> Self {
        let meter = shardload_observability::meter("shardload");
        Self {
            rows: meter
                .u64_counter("load.rows")
                .with_unit("{row}")
                .with_description("number of rows handed to upload channels")
                .build(),
            bytes: meter
                .u64_counter("load.bytes")
                .with_unit("By")
                .with_description("encoded bytes pushed to upload channels")
                .build(),
            partitions_created: meter
                .u64_counter("load.partitions_created")
                .with_unit("{partition}")
                .with_description("number of partitions created during loads")
                .build(),
            finalize: meter
                .u64_counter("load.finalize")
                .with_unit("{finalize}")
                .with_description("number of multiplexed finalize runs")
                .build(),
            finalize_errors: meter
                .u64_counter("load.finalize_errors")
                .with_unit("{error}")
                .with_description("number of channels that failed to finalize")
                .build(),
        }
    }
}
