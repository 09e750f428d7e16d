//! Two devices exchanging stores over an in-process link
//!
//! Each test wires real record stores to sessions running over
//! `memory::pair`, so framing, flow control and merging are exercised end to
//! end without hardware.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tardigrade_core::sync::framing::{Frame, TAG_SOM};
use tardigrade_core::sync::{
    memory, ChannelDiscovery, DiscoveredPeer, DiscoveryLoop, NoopBackend, Offline,
};
use tardigrade_core::{
    CsvCodec, DiscoveryConfig, MergeReport, PeerLink, Record, RecordCodec, RecordHash,
    RecordStore, SessionConfig, StoreConfig, SyncEvent, SyncSession,
};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// Helpers
// ============================================================================

fn rec(hash: &str, timestamp: i64, notes: &str) -> Record {
    Record {
        hash: RecordHash::from(hash),
        timestamp,
        latitude: 12.5,
        longitude: -3.25,
        medical_need: 1,
        shelter: true,
        water: false,
        people_count: 3,
        notes: notes.to_string(),
        hop_count: 0,
    }
}

fn store_with(dir: &TempDir, records: &[Record]) -> Arc<RecordStore> {
    let store = RecordStore::open(&StoreConfig::new(dir.path())).unwrap();
    if !records.is_empty() {
        store.merge(&CsvCodec.encode_file(records)).unwrap();
    }
    Arc::new(store)
}

fn contents(store: &RecordStore) -> Vec<(String, i64, String, u64)> {
    let mut rows: Vec<_> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|r| (r.hash.0, r.timestamp, r.notes, r.hop_count))
        .collect();
    rows.sort();
    rows
}

async fn next_merge(events: &mut broadcast::Receiver<SyncEvent>) -> MergeReport {
    loop {
        match events.recv().await.unwrap() {
            SyncEvent::Merged { report, .. } => return report,
            SyncEvent::MergeFailed { message, .. } => panic!("merge failed: {message}"),
            _ => {}
        }
    }
}

/// Run a session on each end and wait for both sides to merge once
async fn exchange(a: Arc<RecordStore>, b: Arc<RecordStore>, chunk_size: usize, queue: usize) {
    let (end_a, end_b, control) = memory::pair(("phone-a", "phone-b"), chunk_size, queue);
    let config = SessionConfig::default();
    let cancel = CancellationToken::new();

    let session_a = SyncSession::new(end_a.link, a, &config).unwrap();
    let session_b = SyncSession::new(end_b.link, b, &config).unwrap();
    let mut events_a = session_a.subscribe();
    let mut events_b = session_b.subscribe();

    let task_a = tokio::spawn(session_a.run(end_a.events, cancel.child_token()));
    let task_b = tokio::spawn(session_b.run(end_b.events, cancel.child_token()));

    timeout(WAIT, next_merge(&mut events_a)).await.unwrap();
    timeout(WAIT, next_merge(&mut events_b)).await.unwrap();

    control.disconnect();
    timeout(WAIT, task_a).await.unwrap().unwrap().unwrap();
    timeout(WAIT, task_b).await.unwrap().unwrap().unwrap();
}

// ============================================================================
// Exchange
// ============================================================================

#[tokio::test]
async fn test_two_devices_converge_at_default_chunk_size() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = store_with(&dir_a, &[rec("x", 100, "needs water"), rec("k", 7, "fine")]);
    let b = store_with(
        &dir_b,
        &[rec("x", 200, "needs food"), rec("y", 50, "sheltered")],
    );

    exchange(a.clone(), b.clone(), 20, 4).await;

    assert_eq!(contents(&a), contents(&b));
    let notes: Vec<String> = contents(&a).into_iter().map(|(_, _, n, _)| n).collect();
    assert_eq!(notes, vec!["fine", "needs food", "sheltered"]);
}

#[tokio::test]
async fn test_smallest_chunk_size_and_tiny_queue() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let local: Vec<Record> = (0..12)
        .map(|i| rec(&format!("a-{i}"), i, "notes, with \"quotes\"\nand a newline"))
        .collect();
    let a = store_with(&dir_a, &local);
    let b = store_with(&dir_b, &[rec("b-0", 1, "from b")]);

    exchange(a.clone(), b.clone(), 5, 1).await;

    assert_eq!(contents(&a), contents(&b));
    assert_eq!(b.list().unwrap().len(), 13);
}

#[tokio::test]
async fn test_empty_store_still_receives() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = store_with(&dir_a, &[]);
    let b = store_with(&dir_b, &[rec("y", 50, "sheltered")]);

    exchange(a.clone(), b.clone(), 20, 4).await;

    assert_eq!(a.list().unwrap().len(), 1);
    assert_eq!(contents(&a), contents(&b));
}

// ============================================================================
// Broken transfers
// ============================================================================

#[tokio::test]
async fn test_disconnect_mid_message_leaves_store_untouched() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, &[rec("x", 1, "local")]);
    let before = store.current_file_bytes().unwrap();

    let (end_a, mut end_b, control) = memory::pair(("phone-a", "phone-b"), 20, 8);
    let session = SyncSession::new(end_a.link, store.clone(), &SessionConfig::default()).unwrap();
    let mut events = session.subscribe();
    let task = tokio::spawn(session.run(end_a.events, CancellationToken::new()));

    let peer = CsvCodec.encode_file(&[rec("y", 2, "never arrives")]);
    assert!(end_b.link.try_send(&Frame::Start { len: peer.len() as u32 }.encode()));
    assert!(end_b
        .link
        .try_send(&Frame::Data(Bytes::copy_from_slice(&peer[..10])).encode()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    control.disconnect();

    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    let mut saw_disconnect = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SyncEvent::Merged { .. }));
        saw_disconnect |= matches!(event, SyncEvent::PeerDisconnected { .. });
    }
    assert!(saw_disconnect);
    assert_eq!(store.current_file_bytes().unwrap(), before);
}

#[tokio::test]
async fn test_restarted_message_replaces_partial_one() {
    let dir = TempDir::new().unwrap();
    let store = store_with(&dir, &[]);

    let (end_a, mut end_b, control) = memory::pair(("phone-a", "phone-b"), 20, 64);
    let session = SyncSession::new(end_a.link, store.clone(), &SessionConfig::default()).unwrap();
    let mut events = session.subscribe();
    let task = tokio::spawn(session.run(end_a.events, CancellationToken::new()));

    // Half a message, then the sender starts over.
    assert!(end_b.link.try_send(&[TAG_SOM, 0, 0, 0, 200]));
    assert!(end_b
        .link
        .try_send(&Frame::Data(Bytes::from_static(b"abandoned")).encode()));
    let message = Bytes::from(CsvCodec.encode_file(&[rec("z", 9, "second try")]));
    for chunk in tardigrade_core::sync::chunk_message(&message, 20).unwrap() {
        while !end_b.link.try_send(&chunk) {
            tokio::task::yield_now().await;
        }
    }

    let mut violations = 0;
    let report = timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                SyncEvent::ProtocolViolation { .. } => violations += 1,
                SyncEvent::Merged { report, .. } => return report,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(violations, 1);
    assert_eq!(report.added, 1);
    assert_eq!(store.list().unwrap()[0].notes, "second try");

    control.disconnect();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_loops_sync_a_discovered_pair() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = store_with(&dir_a, &[rec("x", 100, "from a")]);
    let b = store_with(&dir_b, &[rec("y", 100, "from b")]);

    let (peers_a_tx, peers_a_rx) = mpsc::channel(4);
    let (peers_b_tx, peers_b_rx) = mpsc::channel(4);
    let loop_a = DiscoveryLoop::new(
        ChannelDiscovery::new(peers_a_rx),
        Offline,
        NoopBackend,
        a.clone(),
        DiscoveryConfig::default(),
    );
    let loop_b = DiscoveryLoop::new(
        ChannelDiscovery::new(peers_b_rx),
        Offline,
        NoopBackend,
        b.clone(),
        DiscoveryConfig::default(),
    );
    let mut events_a = loop_a.subscribe();
    let mut events_b = loop_b.subscribe();

    let cancel = CancellationToken::new();
    let task_a = tokio::spawn(loop_a.run(cancel.clone()));
    let task_b = tokio::spawn(loop_b.run(cancel.clone()));

    let (end_a, end_b, _control) = memory::pair(("phone-a", "phone-b"), 20, 8);
    peers_a_tx
        .send(DiscoveredPeer { link: end_a.link, events: end_a.events })
        .await
        .unwrap();
    peers_b_tx
        .send(DiscoveredPeer { link: end_b.link, events: end_b.events })
        .await
        .unwrap();

    timeout(WAIT, next_merge(&mut events_a)).await.unwrap();
    timeout(WAIT, next_merge(&mut events_b)).await.unwrap();

    cancel.cancel();
    timeout(WAIT, task_a).await.unwrap().unwrap().unwrap();
    timeout(WAIT, task_b).await.unwrap().unwrap().unwrap();

    assert_eq!(contents(&a), contents(&b));
    assert_eq!(a.list().unwrap().len(), 2);
}
