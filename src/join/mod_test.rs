use std::collections::{BTreeMap, BTreeSet};

use crate::fixtures;
use crate::join::{JoinChange, JoinSpec, PendingRecord, TriggerJoin, TriggerObservation};
use crate::models::record::InferenceRecord;
use crate::models::step::JoinType;

const WINDOW_MS: u64 = 1_000;
const KEY: &str = "req-1";

fn join(triggers: &[&str], join_type: JoinType, window_ms: u64, max_pending: usize) -> TriggerJoin {
    let spec = JoinSpec {
        trigger_topics: triggers.iter().map(|topic| topic.to_string()).collect::<BTreeSet<_>>(),
        trigger_tensors: BTreeMap::new(),
        join_type,
    };
    TriggerJoin::new(spec, window_ms, max_pending)
}

fn main_record(key: &str, payload: &[u8], timestamp: i64) -> InferenceRecord {
    fixtures::keyed_record(key, "p1", payload.to_vec(), timestamp)
}

#[test]
fn no_triggers_is_pass_through() {
    let mut join = join(&[], JoinType::All, WINDOW_MS, 10);

    let out = join.on_main(0, main_record(KEY, b"a", 100));

    assert!(join.is_open(KEY), "expected join without triggers to be open");
    assert_eq!(out.len(), 1, "expected record to pass through, got {} records", out.len());
    assert!(join.take_changes().is_empty(), "expected no state changes for a pass-through join");
}

#[test]
fn all_join_requires_every_trigger() {
    let mut join = join(&["t1", "t2"], JoinType::All, WINDOW_MS, 10);
    let record = main_record(KEY, b"a", 100);

    let out = join.on_main(0, record.clone());
    assert!(out.is_empty(), "expected record to be held while no trigger is observed, got {}", out.len());
    let out = join.on_trigger("t1", 0, KEY, 150);
    assert!(out.is_empty(), "expected record to be held while t2 is unobserved, got {}", out.len());
    let out = join.on_trigger("t2", 0, KEY, 200);

    assert_eq!(out, vec![record], "expected held record to be released once all triggers are observed");
    assert_eq!(join.pending_len(), 0, "expected no held records, got {}", join.pending_len());
    let out = join.on_main(1, main_record(KEY, b"b", 250));
    assert_eq!(out.len(), 1, "expected later records of the key to pass the open join, got {}", out.len());
}

#[test]
fn any_join_requires_one_trigger() {
    let mut join = join(&["t1", "t2"], JoinType::Any, WINDOW_MS, 10);
    let record = main_record(KEY, b"a", 100);

    let held = join.on_main(0, record.clone());
    let out = join.on_trigger("t2", 0, KEY, 150);

    assert!(held.is_empty(), "expected record to be held, got {}", held.len());
    assert_eq!(out, vec![record], "expected held record to be released by a single trigger");
    assert!(join.is_open(KEY), "expected any join to be open");
}

#[test]
fn triggers_only_open_the_join_of_their_key() {
    let mut join = join(&["t1", "t2"], JoinType::All, WINDOW_MS, 10);
    let other = main_record("req-2", b"other", 100);
    let own = main_record(KEY, b"own", 110);

    join.on_main(0, other.clone());
    join.on_main(1, own.clone());
    join.on_trigger("t1", 0, KEY, 120);
    let out = join.on_trigger("t2", 0, KEY, 130);

    assert_eq!(out, vec![own], "expected only the record of the triggered key to be released");
    assert!(!join.is_open("req-2"), "expected join of req-2 to remain closed");
    assert_eq!(join.pending_len(), 1, "expected the record of req-2 to stay held, got {}", join.pending_len());
    let out = join.on_main(2, main_record("req-3", b"new", 140));
    assert!(out.is_empty(), "expected a new key not to pass through, got {}", out.len());
    join.on_trigger("t1", 1, "req-2", 150);
    let out = join.on_trigger("t2", 1, "req-2", 160);
    assert_eq!(out, vec![other], "expected req-2 to be released by its own triggers");
}

#[test]
fn held_records_are_released_in_arrival_order() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 10);
    let records: Vec<_> = (0..5).map(|idx| main_record(KEY, &[idx], 100 + idx as i64)).collect();

    for (offset, record) in records.iter().enumerate() {
        join.on_main(offset as u64, record.clone());
    }
    let out = join.on_trigger("t1", 0, KEY, 110);

    assert_eq!(out, records, "expected held records in arrival order");
}

#[test]
fn unknown_trigger_topics_are_ignored() {
    let mut join = join(&["t1"], JoinType::Any, WINDOW_MS, 10);

    join.on_main(0, main_record(KEY, b"", 100));
    let out = join.on_trigger("t9", 0, KEY, 110);

    assert!(out.is_empty(), "expected unknown topic not to open the join, got {}", out.len());
    assert!(!join.is_open(KEY), "expected join to remain closed");
}

#[test]
fn held_records_expire_past_the_window() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 10);

    join.on_main(0, main_record(KEY, b"old", 100));
    join.on_main(1, main_record(KEY, b"new", 1_050));
    join.on_main(2, main_record(KEY, b"newer", 1_101));
    let out = join.on_trigger("t1", 0, KEY, 1_101);

    let payloads: Vec<_> = out.iter().map(|record| record.payload.as_slice()).collect();
    assert_eq!(payloads, vec![&b"new"[..], &b"newer"[..]], "expected only live records to be released, got {:?}", payloads);
    let changes = join.take_changes();
    assert!(changes.contains(&JoinChange::Expired(0)), "expected offset 0 to expire, got {:?}", changes);
}

#[test]
fn triggers_expire_past_the_window() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 10);

    join.on_trigger("t1", 0, KEY, 100);
    assert!(join.is_open(KEY), "expected join to be open after its trigger");
    let out = join.on_main(0, main_record(KEY, b"late", 100 + WINDOW_MS as i64 + 1));

    assert!(out.is_empty(), "expected a stale trigger not to release a new record, got {}", out.len());
    assert!(!join.is_open(KEY), "expected join to close once its trigger expired");
    assert!(join.observed().is_empty(), "expected expired trigger to be forgotten, got {:?}", join.observed());
    let changes = join.take_changes();
    let forgotten = JoinChange::Forgotten { key: KEY.into(), topic: "t1".into() };
    assert!(changes.contains(&forgotten), "expected trigger to be forgotten, got {:?}", changes);
}

#[test]
fn triggers_older_than_the_window_are_ignored() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 10);

    join.on_main(0, main_record("req-2", b"a", 5_000));
    let out = join.on_trigger("t1", 0, KEY, 100);

    assert!(out.is_empty(), "expected nothing to be released, got {}", out.len());
    assert!(!join.is_open(KEY), "expected an already stale trigger not to open the join");
}

#[test]
fn zero_window_drops_records_arriving_while_closed() {
    let mut join = join(&["t1"], JoinType::All, 0, 10);

    let held = join.on_main(0, main_record(KEY, b"", 100));
    let out = join.on_trigger("t1", 0, KEY, 100);

    assert!(held.is_empty() && out.is_empty(), "expected record to be dropped, got {} and {}", held.len(), out.len());
    assert_eq!(join.pending_len(), 0, "expected nothing to be held, got {}", join.pending_len());
    let out = join.on_main(1, main_record(KEY, b"", 100));
    assert_eq!(out.len(), 1, "expected a record at the trigger's time to pass, got {}", out.len());
}

#[test]
fn pending_overflow_drops_oldest() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 2);

    for offset in 0..3u64 {
        join.on_main(offset, main_record(KEY, &[offset as u8], 100));
    }
    let out = join.on_trigger("t1", 0, KEY, 100);

    let payloads: Vec<_> = out.iter().map(|record| record.payload[0]).collect();
    assert_eq!(payloads, vec![1, 2], "expected the oldest record to be dropped, got {:?}", payloads);
}

#[test]
fn changes_track_state_for_persistence() {
    let mut join = join(&["t1"], JoinType::All, WINDOW_MS, 10);
    let record = main_record(KEY, b"", 100);

    join.on_main(7, record.clone());
    join.on_trigger("t1", 3, KEY, 100);
    let changes = join.take_changes();

    let expected = vec![
        JoinChange::Pending(PendingRecord { offset: 7, record }),
        JoinChange::Observed { key: KEY.into(), topic: "t1".into(), observation: TriggerObservation { offset: 3, timestamp: 100 } },
        JoinChange::Released(7),
    ];
    assert_eq!(changes, expected, "unexpected join changes");
    assert!(join.take_changes().is_empty(), "expected changes to be drained");
}

#[test]
fn restore_resumes_join_state() {
    let mut join = join(&["t1", "t2"], JoinType::All, WINDOW_MS, 10);
    let record = main_record(KEY, b"", 100);
    let observation = TriggerObservation { offset: 0, timestamp: 100 };
    let mut topics = BTreeMap::new();
    topics.insert("t1".to_string(), observation);
    topics.insert("stale".to_string(), observation);
    let mut unknown = BTreeMap::new();
    unknown.insert("stale".to_string(), observation);
    let mut observed = BTreeMap::new();
    observed.insert(KEY.to_string(), topics);
    observed.insert("req-9".to_string(), unknown);

    join.restore(observed, vec![PendingRecord { offset: 4, record: record.clone() }], 100);
    let out = join.on_trigger("t2", 0, KEY, 120);

    assert_eq!(out, vec![record], "expected restored record to be released");
    let topics: Vec<_> = join.observed().get(KEY).map(|topics| topics.keys().cloned().collect()).unwrap_or_default();
    assert_eq!(topics, vec!["t1", "t2"], "expected observations of unknown topics to be discarded, got {:?}", topics);
    assert!(!join.observed().contains_key("req-9"), "expected keys without known topics to be discarded");
    assert_eq!(join.stream_time(), 120, "expected stream time 120, got {}", join.stream_time());
}
