//! Ingestion through the queue into the store, live tailing and replay

use std::time::Duration;

use rewind_core::{
    Attribute, EventEnvelope, IncrementalData, InteractionKind, SerializedNode, SessionId,
};
use rewind_live::TailExit;
use rewind_node::{NodeConfig, NodeError, RewindNode};
use rewind_queue::QueueError;
use rewind_replay::PlayerState;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

fn sid() -> SessionId {
    SessionId::from("S1")
}

fn snapshot(seq: u64, ts: i64) -> EventEnvelope {
    EventEnvelope::full_snapshot(
        sid(),
        seq,
        ts,
        SerializedNode::Document {
            id: 1,
            children: vec![SerializedNode::element(
                2,
                "button",
                vec![Attribute::new("class", "buy")],
                vec![],
            )],
        },
    )
}

fn click(seq: u64, ts: i64) -> EventEnvelope {
    EventEnvelope::interaction(sid(), seq, ts, InteractionKind::Click, 2)
}

fn scroll(seq: u64, ts: i64) -> EventEnvelope {
    EventEnvelope::incremental(
        sid(),
        seq,
        ts,
        IncrementalData::Scroll {
            id: 2,
            x: 0.0,
            y: 40.0,
        },
    )
}

fn body(events: &[EventEnvelope]) -> String {
    serde_json::to_string(events).unwrap()
}

async fn wait_for_events(node: &RewindNode, session_id: &SessionId, count: usize) {
    let store = node.store();
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(events) = store.read_all(session_id).await
                && events.len() >= count
            {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events never became visible");
}

#[tokio::test]
async fn test_ingested_batch_is_replayable() {
    let node = RewindNode::start(NodeConfig::testing()).await.unwrap();

    let receipt = node
        .ingest(&sid(), &body(&[snapshot(0, 0), click(1, 500), scroll(2, 600)]))
        .await
        .unwrap();
    assert_eq!(receipt.accepted, 3);
    assert_eq!(receipt.dropped, 0);

    wait_for_events(&node, &sid(), 3).await;
    let seqs: Vec<u64> = node
        .store()
        .read_all(&sid())
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);

    let player = node.player();
    player.load(sid()).await.unwrap();
    assert_eq!(player.snapshot().total_duration, 600);

    let feed = player.activity().await.unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].offset, 500);
    assert_eq!(feed[0].kind, InteractionKind::Click);
    assert_eq!(feed[0].description, "button.buy");

    player.close().await.unwrap();
    node.stop().await;
}

#[tokio::test]
async fn test_out_of_order_batches_converge() {
    let node = RewindNode::start(NodeConfig::testing()).await.unwrap();

    node.ingest(&sid(), &body(&[scroll(2, 600)])).await.unwrap();
    node.ingest(&sid(), &body(&[snapshot(0, 0)])).await.unwrap();
    node.ingest(&sid(), &body(&[click(1, 500), scroll(2, 600)]))
        .await
        .unwrap();

    wait_for_events(&node, &sid(), 3).await;
    let meta = node.store().session(&sid()).await.unwrap();
    assert_eq!(meta.event_count, 3);
    assert_eq!(meta.pending, 0);
    node.stop().await;
}

#[tokio::test]
async fn test_malformed_elements_are_dropped() {
    let node = RewindNode::start(NodeConfig::testing()).await.unwrap();

    let foreign = EventEnvelope::session_closed(SessionId::from("S2"), 1, 10);
    let raw = format!(
        "[{}, {{\"nope\": 1}}, {}]",
        serde_json::to_string(&snapshot(0, 0)).unwrap(),
        serde_json::to_string(&foreign).unwrap()
    );
    let receipt = node.ingest(&sid(), &raw).await.unwrap();
    assert_eq!(receipt.accepted, 1);
    assert_eq!(receipt.dropped, 2);

    let err = node.ingest(&sid(), "{\"events\": []}").await.unwrap_err();
    assert!(matches!(err, NodeError::MalformedBatch(_)));
    let err = node.ingest(&SessionId::from(""), "[]").await.unwrap_err();
    assert!(matches!(err, NodeError::MalformedBatch(_)));

    wait_for_events(&node, &sid(), 1).await;
    assert!(node.store().session(&SessionId::from("S2")).await.is_err());
    node.stop().await;
}

#[tokio::test]
async fn test_oversized_batch_is_rejected() {
    let mut config = NodeConfig::testing();
    config.queue.max_message_bytes = 16;
    let node = RewindNode::start(config).await.unwrap();

    let err = node
        .ingest(&sid(), &body(&[snapshot(0, 0), click(1, 500), scroll(2, 600)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NodeError::Queue(QueueError::PayloadTooLarge { max: 16, .. })
    ));

    node.stop().await;
    assert!(node.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_session_tailed_until_closed() {
    let node = RewindNode::start(NodeConfig::testing()).await.unwrap();
    node.ingest(&sid(), &body(&[snapshot(0, 0), click(1, 100)]))
        .await
        .unwrap();
    wait_for_events(&node, &sid(), 2).await;

    let player = node.player();
    player.load(sid()).await.unwrap();
    assert!(player.snapshot().is_live);
    let tail = node.tail(&player, sid());
    player.play(None).await.unwrap();

    node.ingest(
        &sid(),
        &body(&[scroll(2, 200), EventEnvelope::session_closed(sid(), 3, 250)]),
    )
    .await
    .unwrap();

    let mut snapshots = player.watch();
    timeout(
        Duration::from_secs(5),
        snapshots.wait_for(|s| !s.is_live && s.state == PlayerState::Ended),
    )
    .await
    .expect("player never ended")
    .unwrap();

    assert_eq!(player.snapshot().event_count, 4);
    assert_eq!(player.current_time(), 250);
    assert_eq!(tail.join().await.unwrap(), TailExit::Finalized);
    assert!(!node.store().session(&sid()).await.unwrap().is_live);

    player.close().await.unwrap();
    node.stop().await;
}

#[tokio::test]
async fn test_persistent_store_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = NodeConfig::testing()
        .with_data_dir(dir.path())
        .with_sync_on_write(false);

    {
        let node = RewindNode::start(config.clone()).await.unwrap();
        node.ingest(&sid(), &body(&[snapshot(0, 0), click(1, 500), scroll(2, 600)]))
            .await
            .unwrap();
        // Stopping drains the queue into the store
        node.stop().await;
        assert!(node.finalize_session(&sid()).await.unwrap());
    }

    let node = RewindNode::start(config).await.unwrap();
    let sessions = node.sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].event_count, 3);
    assert!(!sessions[0].is_live);

    let player = node.player();
    player.load(sid()).await.unwrap();
    assert!(!player.snapshot().is_live);
    assert_eq!(player.activity().await.unwrap().len(), 1);

    player.close().await.unwrap();
    node.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let node = RewindNode::start(NodeConfig::testing()).await.unwrap();
    assert_ok!(node.health_check().await);

    node.stop().await;
    node.stop().await;
    assert!(node.is_stopped());

    let err = assert_err!(node.ingest(&sid(), &body(&[snapshot(0, 0)])).await);
    assert!(matches!(err, NodeError::Stopped));
}
