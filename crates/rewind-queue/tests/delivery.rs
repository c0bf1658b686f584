//! End-to-end delivery behaviour of the ingestion queue

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rewind_core::{EventEnvelope, InteractionKind, SessionId};
use rewind_queue::{
    Delivery, HandlerError, IngestionQueue, MessageHandler, QueueConfig, QueueError,
    QueueMessage, Topic,
};
use tokio::sync::{Semaphore, mpsc};

/// Records deliveries; fails the first `fail_first` attempts
#[derive(Default)]
struct Recorder {
    deliveries: Mutex<Vec<(u32, Vec<u64>)>>,
    fail_first: u32,
    permanent: bool,
}

impl Recorder {
    fn failing(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Default::default()
        }
    }

    fn sequences(&self) -> Vec<u64> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, seqs)| seqs.clone())
            .collect()
    }

    fn attempts(&self) -> Vec<u32> {
        self.deliveries.lock().unwrap().iter().map(|(a, _)| *a).collect()
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let seqs = delivery
            .messages
            .iter()
            .flat_map(|m| match m {
                QueueMessage::PushEvents { envelopes, .. } => {
                    envelopes.iter().map(|e| e.sequence).collect::<Vec<_>>()
                }
                QueueMessage::HealthCheck { .. } => panic!("health check reached handler"),
            })
            .collect();
        self.deliveries.lock().unwrap().push((delivery.attempt, seqs));

        if delivery.attempt <= self.fail_first {
            if self.permanent {
                return Err(HandlerError::Permanent("rejected".into()));
            }
            return Err(HandlerError::Transient("store unavailable".into()));
        }
        Ok(())
    }
}

fn push(session: &SessionId, seq: u64) -> QueueMessage {
    QueueMessage::push_events(
        session.clone(),
        vec![EventEnvelope::interaction(
            session.clone(),
            seq,
            seq as i64,
            InteractionKind::Click,
            1,
        )],
    )
}

#[tokio::test]
async fn session_messages_arrive_in_order() {
    let recorder = Arc::new(Recorder::default());
    let queue = IngestionQueue::start(QueueConfig::testing(), recorder.clone());
    let session = SessionId::from("S1");

    for seq in 0..25 {
        queue.submit(push(&session, seq), session.as_str()).await.unwrap();
    }
    queue.shutdown().await;

    assert_eq!(recorder.sequences(), (0..25).collect::<Vec<_>>());
    let stats = queue.stats();
    assert_eq!(stats.submitted, 25);
    assert_eq!(stats.delivered, 25);
}

#[tokio::test]
async fn batched_topic_groups_messages() {
    let recorder = Arc::new(Recorder::default());
    let config = QueueConfig::testing()
        .with_partitions(1)
        .with_batching(5, Duration::from_millis(200));
    let queue = IngestionQueue::start(config, recorder.clone());
    let session = SessionId::from("S1");

    let batch = (0..5).map(|seq| push(&session, seq)).collect();
    queue.submit_batch(batch, session.as_str()).await.unwrap();
    queue.shutdown().await;

    let deliveries = recorder.deliveries.lock().unwrap().clone();
    assert_eq!(deliveries, vec![(1, vec![0, 1, 2, 3, 4])]);
}

#[tokio::test]
async fn unbatched_topic_delivers_one_at_a_time() {
    let recorder = Arc::new(Recorder::default());
    let queue = IngestionQueue::start(QueueConfig::testing().with_partitions(1), recorder.clone());
    let session = SessionId::from("S1");

    let batch = (0..3).map(|seq| push(&session, seq)).collect();
    queue
        .submit_batch_to(Topic::Unbatched, batch, session.as_str())
        .await
        .unwrap();
    queue.shutdown().await;

    let deliveries = recorder.deliveries.lock().unwrap().clone();
    assert_eq!(deliveries, vec![(1, vec![0]), (1, vec![1]), (1, vec![2])]);
}

#[tokio::test]
async fn failed_delivery_is_retried_with_incremented_attempt() {
    let recorder = Arc::new(Recorder::failing(2));
    let queue = IngestionQueue::start(QueueConfig::testing(), recorder.clone());
    let session = SessionId::from("S1");

    queue
        .submit_to(Topic::Unbatched, push(&session, 0), session.as_str())
        .await
        .unwrap();
    queue.shutdown().await;

    assert_eq!(recorder.attempts(), vec![1, 2, 3]);
    let stats = queue.stats();
    assert_eq!(stats.redelivered, 2);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn exhausted_delivery_is_dead_lettered() {
    let recorder = Arc::new(Recorder::failing(u32::MAX));
    let queue = IngestionQueue::start(
        QueueConfig::testing().with_max_delivery_attempts(3),
        recorder.clone(),
    );
    let session = SessionId::from("S1");

    queue
        .submit_to(Topic::Unbatched, push(&session, 0), session.as_str())
        .await
        .unwrap();
    queue.shutdown().await;

    assert_eq!(recorder.attempts(), vec![1, 2, 3]);
    assert_eq!(queue.stats().dead_lettered, 1);
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let recorder = Arc::new(Recorder {
        fail_first: u32::MAX,
        permanent: true,
        ..Default::default()
    });
    let queue = IngestionQueue::start(QueueConfig::testing(), recorder.clone());
    let session = SessionId::from("S1");

    queue
        .submit_to(Topic::Unbatched, push(&session, 0), session.as_str())
        .await
        .unwrap();
    queue.shutdown().await;

    assert_eq!(recorder.attempts(), vec![1]);
    assert_eq!(queue.stats().dead_lettered, 1);
}

#[tokio::test]
async fn oversized_batch_enqueues_nothing() {
    let recorder = Arc::new(Recorder::default());
    let queue = IngestionQueue::start(
        QueueConfig::testing().with_max_message_bytes(512),
        recorder.clone(),
    );
    let session = SessionId::from("S1");

    let huge = QueueMessage::push_events(
        session.clone(),
        (0..50)
            .map(|seq| EventEnvelope::session_closed(session.clone(), seq, 0))
            .collect(),
    );
    let batch = vec![push(&session, 0), huge, push(&session, 1)];

    let err = queue.submit_batch(batch, session.as_str()).await.unwrap_err();
    assert!(matches!(err, QueueError::PayloadTooLarge { max: 512, .. }));
    assert!(!err.is_transient());

    queue.shutdown().await;
    assert_eq!(queue.stats().submitted, 0);
    assert!(recorder.sequences().is_empty());
}

#[tokio::test]
async fn health_check_covers_both_topics() {
    let recorder = Arc::new(Recorder::default());
    let queue = IngestionQueue::start(QueueConfig::testing(), recorder.clone());

    queue.health_check().await.unwrap();
    assert_eq!(queue.stats().health_checks, 1);

    queue.shutdown().await;
    assert!(queue.is_closed().await);
    assert!(recorder.deliveries.lock().unwrap().is_empty());

    let err = queue.health_check().await.unwrap_err();
    assert!(matches!(err, QueueError::HealthCheck { topic: Topic::Unbatched, .. }));

    let session = SessionId::from("S1");
    let err = queue.submit(push(&session, 0), session.as_str()).await.unwrap_err();
    assert!(matches!(err, QueueError::Closed));
}

/// Blocks inside the handler until released
struct Gate {
    entered: mpsc::UnboundedSender<()>,
    release: Semaphore,
}

#[async_trait]
impl MessageHandler for Gate {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        let _ = self.entered.send(());
        let permit = self.release.acquire().await.unwrap();
        permit.forget();
        Ok(())
    }
}

#[tokio::test]
async fn full_partition_times_out() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Gate {
        entered: entered_tx,
        release: Semaphore::new(0),
    });
    let config = QueueConfig::testing()
        .with_partitions(1)
        .with_partition_capacity(1)
        .with_submit_timeout(Duration::from_millis(50));
    let queue = IngestionQueue::start(config, gate.clone());
    let session = SessionId::from("S1");

    // First message is taken by the consumer, second fills the partition
    queue
        .submit_to(Topic::Unbatched, push(&session, 0), session.as_str())
        .await
        .unwrap();
    entered_rx.recv().await.unwrap();
    queue
        .submit_to(Topic::Unbatched, push(&session, 1), session.as_str())
        .await
        .unwrap();

    let err = queue
        .submit_to(Topic::Unbatched, push(&session, 2), session.as_str())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Timeout { partition: 0, .. }));
    assert!(err.is_transient());

    gate.release.add_permits(10);
    queue.shutdown().await;
    assert_eq!(queue.stats().delivered, 2);
}
