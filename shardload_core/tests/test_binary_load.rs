use std::sync::Arc;

use common::{
    Event, MockTransport, directory_for, events, metrics_table, new_log, principal, received,
    test_options,
};
use shardload_core::{CopyOption, CopyStatement, Result, Row, codec::decode_row, run_load};
use shardload_resources::{ColumnType, Datum, Dimension};
use tokio_util::sync::CancellationToken;

mod common;

#[test]
fn test_binary_rows_decode_to_input() -> Result<()> {
    let log = new_log();
    let table = metrics_table(1000);
    let directory = Arc::new(directory_for(&table, &["a"], 1));
    let transport = Arc::new(MockTransport::new(log.clone()));

    let statement = CopyStatement::new(principal())
        .with_columns(["time", "value"])
        .with_option(CopyOption::string("delimiter", ","))
        .with_option(CopyOption::flag("freeze"));

    let input = vec![
        Row::values([Some(Datum::Int64(7)), Some(Datum::Text("x".to_string()))]),
        Row::values([Some(Datum::Int64(8)), None]),
    ];
    let processed = run_load(
        &statement,
        Arc::new(table),
        directory,
        transport,
        test_options().with_binary(true),
        CancellationToken::new(),
        &mut input.into_iter(),
    )?;
    assert_eq!(processed, 2);

    let Some(Event::Begin { command, .. }) = events(&log)
        .into_iter()
        .find(|e| matches!(e, Event::Begin { .. }))
    else {
        panic!("no upload started");
    };
    assert_eq!(
        command,
        "COPY public.metrics (time, value) FROM STDIN WITH (freeze, FORMAT binary)"
    );

    let data = received(&log, "a");
    // The first row is 2 + (4 + 8) + (4 + 1) bytes.
    let (first, second) = data.split_at(19);
    let types = [ColumnType::Int64, ColumnType::Text];
    assert_eq!(
        decode_row(first, &types)?,
        vec![Some(Datum::Int64(7)), Some(Datum::Text("x".to_string()))]
    );
    assert_eq!(decode_row(second, &types)?, vec![Some(Datum::Int64(8)), None]);
    assert_eq!(&second[second.len() - 4..], &[0xff, 0xff, 0xff, 0xff]);
    Ok(())
}

#[test]
fn test_binary_text_rows_are_parsed() -> Result<()> {
    let log = new_log();
    let table = metrics_table(1000);
    let directory = Arc::new(directory_for(&table, &["a"], 1));
    let transport = Arc::new(MockTransport::new(log.clone()));

    let statement = CopyStatement::new(principal()).with_columns(["device", "time"]);
    run_load(
        &statement,
        Arc::new(table),
        directory,
        transport,
        test_options().with_binary(true),
        CancellationToken::new(),
        &mut vec![Row::text([None, Some("42")])].into_iter(),
    )?;

    assert_eq!(
        received(&log, "a"),
        [
            &[0x00, 0x02][..],
            &[0xff, 0xff, 0xff, 0xff],
            &[0x00, 0x00, 0x00, 0x08],
            &42i64.to_be_bytes(),
        ]
        .concat()
    );
    Ok(())
}

#[test]
fn test_binary_null_in_closed_dimension_is_rejected() {
    let log = new_log();
    let table = metrics_table(1000).with_dimension(Dimension::closed("device", 2));
    let directory = Arc::new(directory_for(&table, &["a"], 1));
    let transport = Arc::new(MockTransport::new(log.clone()));

    let err = run_load(
        &CopyStatement::new(principal()),
        Arc::new(table),
        directory,
        transport,
        test_options().with_binary(true),
        CancellationToken::new(),
        &mut vec![Row::values([Some(Datum::Int64(1)), None, None])].into_iter(),
    )
    .unwrap_err();

    assert!(err.is_validation());
    assert!(events(&log).is_empty());
}
