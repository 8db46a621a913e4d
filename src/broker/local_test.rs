use anyhow::{Context, Result};

use crate::broker::{Broker, LocalBroker};
use crate::config::Config;
use crate::fixtures;

const TOPIC: &str = "seldon.default.model.m1.outputs";

#[tokio::test]
async fn publish_assigns_sequential_offsets() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let broker = LocalBroker::open(config.broker_data_path()).await?;

    let first = broker.publish(TOPIC, fixtures::record("p1", b"a".to_vec())).await?;
    let second = broker.publish(TOPIC, fixtures::record("p1", b"b".to_vec())).await?;
    let other = broker.publish("other", fixtures::record("p1", b"c".to_vec())).await?;

    assert_eq!(first, 0, "expected first offset to be 0, got {}", first);
    assert_eq!(second, 1, "expected second offset to be 1, got {}", second);
    assert_eq!(other, 0, "expected offsets to be per topic, got {}", other);
    let end = broker.end_offset(TOPIC).await?;
    assert_eq!(end, 2, "expected end offset 2, got {}", end);

    Ok(())
}

#[tokio::test]
async fn fetch_returns_records_in_offset_order() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let broker = LocalBroker::open(config.broker_data_path()).await?;
    let expected = fixtures::setup_topic_data(&broker, TOPIC, "p1").await?;

    let batch = broker.fetch(TOPIC, 5, 10).await?;

    assert_eq!(batch.len(), 10, "expected 10 records, got {}", batch.len());
    for (idx, (offset, record)) in batch.iter().enumerate() {
        let expected_offset = 5 + idx as u64;
        assert_eq!(*offset, expected_offset, "expected offset {}, got {}", expected_offset, offset);
        assert_eq!(record, &expected[expected_offset as usize], "record at offset {} does not match what was published", offset);
    }
    let tail = broker.fetch(TOPIC, expected.len() as u64, 10).await?;
    assert!(tail.is_empty(), "expected no records past the end of the topic, got {}", tail.len());

    Ok(())
}

#[tokio::test]
async fn offset_signal_tracks_writes() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let broker = LocalBroker::open(config.broker_data_path()).await?;
    let mut signal = broker.offset_signal(TOPIC).await?;
    assert_eq!(*signal.borrow(), 0, "expected initial signal of 0, got {}", *signal.borrow());

    broker.publish(TOPIC, fixtures::record("p1", vec![])).await?;
    tokio::time::timeout(fixtures::TEST_TIMEOUT, signal.changed())
        .await
        .context("timeout waiting for offset signal")??;

    let next = *signal.borrow();
    assert_eq!(next, 1, "expected signal of 1 after a write, got {}", next);
    Ok(())
}

#[tokio::test]
async fn topics_are_recovered_on_reopen() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let records = {
        let broker = LocalBroker::open(config.broker_data_path()).await?;
        let records = fixtures::setup_topic_data(&broker, TOPIC, "p1").await?;
        broker.flush().await?;
        records
    };

    let broker = LocalBroker::open(config.broker_data_path()).await?;
    let end = broker.end_offset(TOPIC).await?;
    let offset = broker.publish(TOPIC, fixtures::record("p1", vec![])).await?;

    assert_eq!(end, records.len() as u64, "expected recovered end offset {}, got {}", records.len(), end);
    assert_eq!(offset, records.len() as u64, "expected next offset {}, got {}", records.len(), offset);
    Ok(())
}

#[tokio::test]
async fn publish_stamps_records_without_timestamp() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let broker = LocalBroker::open(config.broker_data_path()).await?;

    broker.publish(TOPIC, fixtures::record_at("p1", vec![], 0)).await?;
    let batch = broker.fetch(TOPIC, 0, 1).await?;

    let (_, record) = batch.first().context("expected a record")?;
    assert!(record.timestamp > 0, "expected record to be stamped, got {}", record.timestamp);
    assert_eq!(record.pipeline(), Some("p1"), "expected pipeline header to be kept, got {:?}", record.pipeline());
    Ok(())
}
