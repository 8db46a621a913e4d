use anyhow::{Context, Result};

use crate::config::Config;
use crate::engine::store::StateStore;
use crate::fixtures;
use crate::join::{JoinChange, PendingRecord, TriggerObservation};

#[tokio::test]
async fn committed_join_state_is_recovered_by_key() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let store = StateStore::open(&config.engine_state_dir("app-1")).await?;
    let record = fixtures::keyed_record("req-2", "p1", b"held".to_vec(), 200);
    let observation = TriggerObservation { offset: 3, timestamp: 150 };

    let changes = vec![
        JoinChange::Observed { key: "req-1".into(), topic: "t1".into(), observation },
        JoinChange::Observed { key: "req-1".into(), topic: "t2".into(), observation },
        JoinChange::Observed { key: "req-2".into(), topic: "t1".into(), observation },
        JoinChange::Pending(PendingRecord { offset: 9, record: record.clone() }),
        JoinChange::Pending(PendingRecord { offset: 10, record: record.clone() }),
    ];
    store.commit("main", 11, changes, 200).await?;
    let changes = vec![JoinChange::Forgotten { key: "req-1".into(), topic: "t2".into() }, JoinChange::Released(10)];
    store.commit("t2", 4, changes, 210).await?;
    let recovered = store.recover().await?;

    let req1 = recovered.observed.get("req-1").context("expected triggers of req-1")?;
    assert!(req1.get("t1") == Some(&observation), "expected t1 of req-1 to be recovered, got {:?}", req1);
    assert!(!req1.contains_key("t2"), "expected forgotten t2 of req-1 to be gone, got {:?}", req1);
    let req2 = recovered.observed.get("req-2").context("expected triggers of req-2")?;
    assert!(req2.len() == 1 && req2.contains_key("t1"), "unexpected triggers of req-2 {:?}", req2);
    assert!(
        recovered.pending == vec![PendingRecord { offset: 9, record }],
        "expected only the unreleased record to be pending, got {:?}",
        recovered.pending
    );
    assert!(recovered.offsets.get("main") == Some(&11), "unexpected offsets {:?}", recovered.offsets);
    assert!(recovered.offsets.get("t2") == Some(&4), "unexpected offsets {:?}", recovered.offsets);
    assert!(recovered.stream_time == 210, "expected stream time 210, got {}", recovered.stream_time);
    Ok(())
}
