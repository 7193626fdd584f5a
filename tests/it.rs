use std::time::Duration;

use bigtable_rs::{
    Error, Mutation, MutationEntry, ReadModifyWriteRule, ReadRowsOptions, RetrySettings, Row,
    RowRange, RowStream,
};
use fake_bigtable::{FakeBigtable, ReadFault};
use futures::{StreamExt, TryStreamExt};
use prost::bytes::Bytes;
use tonic::Code;


fn key(k: &str) -> Bytes {
    Bytes::copy_from_slice(k.as_bytes())
}

fn row_keys(count: usize) -> Vec<Bytes> {
    (1..=count).map(|i| key(&format!("r{:02}", i))).collect()
}

async fn collect(stream: RowStream) -> Result<Vec<Row>, Error> {
    stream.try_collect().await
}

fn keys(rows: &[Row]) -> Vec<Bytes> {
    rows.iter().map(|row| row.key().clone()).collect()
}

fn fast_retries() -> RetrySettings {
    RetrySettings::default().jitter(Duration::ZERO)
}

#[tokio::test(start_paused = true)]
async fn test_read_all_rows() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    let rows = collect(fake.client().table("t").read_rows(ReadRowsOptions::all())).await?;

    assert_eq!(keys(&rows), row_keys(10));
    let row = &rows[6];
    assert_eq!(row.cells("cf", b"a")[0].value(), &key("value-7"));
    assert_eq!(row.cells("cf", b"b")[0].value(), &key("xxxxxxx"));
    assert_eq!(fake.read_requests().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_survives_failures() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![
        ReadFault::FailAfter(1, Code::Unavailable),
        ReadFault::FailCall(Code::Unavailable),
        ReadFault::FailAfter(3, Code::Aborted),
        ReadFault::FailAfter(2, Code::DeadlineExceeded),
    ]);
    let table = fake
        .client()
        .with_retry_settings(fast_retries())
        .table("t");
    let rows = collect(table.read_rows(ReadRowsOptions::all())).await?;

    assert_eq!(keys(&rows), row_keys(10));
    let requests = fake.read_requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(
        requests.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    // the last attempt starts after the 6th row
    assert!(!requests[4].rows.ranges()[0].contains(b"r06"));
    assert!(requests[4].rows.ranges()[0].contains(b"r07"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_keys_and_ranges_with_failures() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![ReadFault::FailAfter(2, Code::Unavailable)]);
    let options = ReadRowsOptions::builder()
        .keys(["r01", "r03", "r09"])
        .range(RowRange::closed("r05", "r06"))
        .build()?;
    let rows = collect(
        fake.client()
            .with_retry_settings(fast_retries())
            .table("t")
            .read_rows(options),
    )
    .await?;

    assert_eq!(
        keys(&rows),
        vec![key("r01"), key("r03"), key("r05"), key("r06"), key("r09")]
    );
    let retry = &fake.read_requests()[1];
    assert_eq!(retry.rows.keys(), &[key("r09")][..]);
    assert_eq!(retry.rows.ranges(), &[RowRange::closed("r05", "r06")][..]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_limit_across_failure() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![ReadFault::FailAfter(2, Code::Unavailable)]);
    let options = ReadRowsOptions::builder().limit(5).build()?;
    let rows = collect(
        fake.client()
            .with_retry_settings(fast_retries())
            .table("t")
            .read_rows(options),
    )
    .await?;

    assert_eq!(keys(&rows), row_keys(5));
    let requests = fake.read_requests();
    assert_eq!(requests[0].rows_limit, Some(5));
    assert_eq!(requests[1].rows_limit, Some(3));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_prefix() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(12);
    let options = ReadRowsOptions::builder().prefix("r1").build()?;
    let rows = collect(fake.client().table("t").read_rows(options)).await?;
    assert_eq!(keys(&rows), vec![key("r10"), key("r11"), key("r12")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_second_row() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    let mut rows = fake.client().table("t").read_rows(ReadRowsOptions::all());

    assert_eq!(rows.try_next().await?.map(|r| r.key().clone()), Some(key("r01")));
    assert_eq!(rows.try_next().await?.map(|r| r.key().clone()), Some(key("r02")));
    rows.cancel();
    assert!(rows.next().await.is_none());
    assert!(rows.next().await.is_none());
    assert_eq!(fake.read_requests().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![ReadFault::FailAfter(2, Code::Unavailable)]);
    let settings = fast_retries().initial_delay(Duration::from_secs(30));
    let mut rows = fake
        .client()
        .with_retry_settings(settings)
        .table("t")
        .read_rows(ReadRowsOptions::all());

    rows.try_next().await?;
    rows.try_next().await?;
    // the stream is now waiting before its retry
    let pending = tokio::time::timeout(Duration::from_secs(1), rows.next()).await;
    assert!(pending.is_err());
    rows.cancel();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(rows.next().await.is_none());
    assert_eq!(fake.read_requests().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_key_sets_are_rejected() {
    let fake = FakeBigtable::with_rows(3);
    let result = ReadRowsOptions::builder()
        .start("r01")
        .end("r02")
        .prefixes(["a", "b"])
        .build();
    assert!(matches!(result, Err(Error::InvalidKeySet(_))));
    assert!(fake.read_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout() {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![ReadFault::HangAfter(3)]);
    let options = ReadRowsOptions::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let mut rows = fake.client().table("t").read_rows(options);

    for _ in 0..3 {
        assert!(rows.try_next().await.unwrap().is_some());
    }
    match rows.try_next().await {
        Err(Error::Status(status)) => assert_eq!(status.code(), Code::DeadlineExceeded),
        other => panic!("unexpected {:?}", other),
    }
    assert!(rows.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_read_fatal_status() {
    let fake = FakeBigtable::with_rows(10);
    fake.fail_reads(vec![
        ReadFault::FailAfter(4, Code::Unavailable),
        ReadFault::FailAfter(1, Code::NotFound),
    ]);
    let result = collect(
        fake.client()
            .with_retry_settings(fast_retries())
            .table("t")
            .read_rows(ReadRowsOptions::all()),
    )
    .await;
    assert!(matches!(result, Err(Error::Status(status)) if status.code() == Code::NotFound));
    assert_eq!(fake.read_requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_read_retries_stream_reset() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(4);
    fake.fail_reads(vec![ReadFault::ResetAfter(2)]);
    let rows = collect(
        fake.client()
            .with_retry_settings(fast_retries())
            .table("t")
            .read_rows(ReadRowsOptions::all()),
    )
    .await?;
    assert_eq!(keys(&rows), row_keys(4));
    assert_eq!(fake.read_requests().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_internal_error_is_fatal() {
    let fake = FakeBigtable::with_rows(4);
    fake.fail_reads(vec![ReadFault::FailAfter(2, Code::Internal)]);
    let result = collect(
        fake.client()
            .with_retry_settings(fast_retries())
            .table("t")
            .read_rows(ReadRowsOptions::all()),
    )
    .await;
    assert!(matches!(result, Err(Error::Status(status)) if status.code() == Code::Internal));
    assert_eq!(fake.read_requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_row() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(5);
    let table = fake.client().table("t");
    let row = table.read_row("r03", None).await?;
    assert_eq!(row.map(|r| r.key().clone()), Some(key("r03")));
    assert!(table.read_row("nope", None).await?.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mutate_rows_partial_failure() -> Result<(), Error> {
    let fake = FakeBigtable::default();
    fake.fail_mutations(vec![vec![
        ("row1", Code::Unavailable),
        ("row3", Code::Unavailable),
        ("row4", Code::InvalidArgument),
    ]]);
    let entries = (0..5)
        .map(|i| MutationEntry::new(format!("row{}", i)).set_cell("cf", "q", 0, "v"))
        .collect();
    let outcome = fake
        .client()
        .with_retry_settings(fast_retries())
        .table("t")
        .mutate_rows(entries)
        .await?;

    assert_eq!(outcome.attempts(), 2);
    assert_eq!(outcome.failures().len(), 1);
    assert_eq!(outcome.failures()[0].index, 4);
    assert_eq!(outcome.failures()[0].status.code(), Code::InvalidArgument);
    assert_eq!(
        fake.row_keys(),
        vec![key("row0"), key("row1"), key("row2"), key("row3")]
    );
    let retried = fake.mutate_requests()[1]
        .entries
        .iter()
        .map(|entry| entry.row_key().clone())
        .collect::<Vec<_>>();
    assert_eq!(retried, vec![key("row1"), key("row3")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mutate_rows_gives_up() -> Result<(), Error> {
    let fake = FakeBigtable::default();
    fake.fail_mutations(vec![vec![("row0", Code::Unavailable)]; 10]);
    let outcome = fake
        .client()
        .with_retry_settings(fast_retries().max_mutate_retries(2))
        .table("t")
        .mutate_rows(vec![MutationEntry::new("row0").delete_row()])
        .await?;
    assert_eq!(outcome.attempts(), 3);
    assert!(!outcome.is_success());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_single_row_operations() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(2);
    let table = fake.client().table("t");

    table
        .mutate_row(MutationEntry::new("r05").set_cell("cf", "a", 1, "five"))
        .await?;
    assert!(table.read_row("r05", None).await?.is_some());

    let matched = table
        .check_and_mutate_row(
            "r05",
            None,
            vec![Mutation::DeleteFromRow],
            vec![Mutation::set_cell("cf", "a", 1, "other")],
        )
        .await?;
    assert!(matched);
    assert!(table.read_row("r05", None).await?.is_none());

    let samples = table.sample_row_keys().await?;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].offset_bytes, 2048);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_modify_write_row() -> Result<(), Error> {
    let fake = FakeBigtable::with_rows(2);
    let table = fake.client().table("t");

    let row = table
        .read_modify_write_row(
            "r01",
            vec![
                ReadModifyWriteRule::append("cf", "a", "!"),
                ReadModifyWriteRule::append("cf", "a", "?"),
            ],
        )
        .await?;
    assert_eq!(row.cells("cf", b"a").len(), 1);
    assert_eq!(row.cells("cf", b"a")[0].value(), &key("value-1!?"));
    assert!(row.cells("cf", b"b").is_empty());

    let stored = table.read_row("r01", None).await?.unwrap();
    assert_eq!(stored.cells("cf", b"a")[0].value(), &key("value-1!?"));

    assert_eq!(table.increment("r02", "stats", "hits", 5).await?, 5);
    assert_eq!(table.increment("r02", "stats", "hits", -2).await?, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_read_modify_write_is_not_retried() {
    let fake = FakeBigtable::with_rows(1);
    fake.fail_read_modify_writes(vec![Code::Unavailable]);
    let result = fake
        .client()
        .with_retry_settings(fast_retries())
        .table("t")
        .increment("r01", "stats", "hits", 1)
        .await;
    assert!(matches!(result, Err(Error::Status(status)) if status.code() == Code::Unavailable));
    assert_eq!(fake.read_modify_write_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_increment_of_non_counter_fails() {
    let fake = FakeBigtable::with_rows(1);
    let result = fake
        .client()
        .table("t")
        .increment("r01", "cf", "a", 1)
        .await;
    assert!(matches!(result, Err(Error::Status(status)) if status.code() == Code::InvalidArgument));
}
