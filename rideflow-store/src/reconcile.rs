use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info};

use rideflow_shared::{EventEnvelope, EventPublisher, PublishError};

/// Envelopes whose publish exhausted its retries after the state change
/// was already committed. Publish and persist are not one transaction, so
/// this queue is the explicit compensating path: nothing on it is ever
/// silently dropped.
#[derive(Default)]
pub struct ReconcileQueue {
    inner: Mutex<VecDeque<EventEnvelope>>,
}

impl ReconcileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, envelope: EventEnvelope) {
        self.lock().push_back(envelope);
    }

    fn pop(&self) -> Option<EventEnvelope> {
        self.lock().pop_front()
    }

    fn requeue(&self, envelope: EventEnvelope) {
        self.lock().push_front(envelope);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Publisher wrapper that turns retry exhaustion into enqueue-for-sweep
/// instead of an error, so callers can commit state first and rely on the
/// sweep for eventual delivery. Serialization failures still surface: no
/// amount of sweeping fixes an unencodable event.
pub struct ReliablePublisher {
    inner: Arc<dyn EventPublisher>,
    queue: Arc<ReconcileQueue>,
}

impl ReliablePublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, queue: Arc<ReconcileQueue>) -> Self {
        Self { inner, queue }
    }
}

#[async_trait]
impl EventPublisher for ReliablePublisher {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
        match self.inner.publish(event).await {
            Ok(()) => Ok(()),
            Err(PublishError::Failed {
                topic,
                attempts,
                reason,
            }) => {
                error!(
                    topic,
                    attempts,
                    reason,
                    trip_id = %event.trip_id,
                    "publish exhausted retries, parked for reconciliation"
                );
                self.queue.push(event.clone());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Drains the queue front-to-back until it is empty or a publish fails
/// again. Returns how many envelopes went out.
pub async fn sweep_once(queue: &ReconcileQueue, publisher: &dyn EventPublisher) -> usize {
    let mut published = 0;
    while let Some(envelope) = queue.pop() {
        match publisher.publish(&envelope).await {
            Ok(()) => published += 1,
            Err(e) => {
                error!(error = %e, trip_id = %envelope.trip_id, "reconciliation publish failed");
                queue.requeue(envelope);
                break;
            }
        }
    }
    published
}

/// Background reconciliation loop. `publisher` should be the raw broker
/// publisher, not a `ReliablePublisher`, or failures would loop straight
/// back onto the queue.
pub async fn run_reconcile_sweep(
    queue: Arc<ReconcileQueue>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if !queue.is_empty() {
                    let published = sweep_once(&queue, publisher.as_ref()).await;
                    if published > 0 {
                        info!(published, remaining = queue.len(), "reconciliation sweep");
                    }
                }
            }
            _ = shutdown.changed() => {
                // Final best-effort drain before the process exits.
                sweep_once(&queue, publisher.as_ref()).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use rideflow_shared::TripEventPayload;
    use uuid::Uuid;

    /// Fails the first `failures` publishes, then succeeds.
    struct FlakyPublisher {
        failures: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<EventEnvelope>>,
    }

    impl FlakyPublisher {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, event: &EventEnvelope) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PublishError::Failed {
                    topic: event.topic().to_string(),
                    attempts: 1,
                    reason: "broker unreachable".into(),
                });
            }
            self.delivered.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(
            Uuid::new_v4(),
            1,
            TripEventPayload::DriverAssigned {
                driver_id: "driver-1".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_exhausted_publish_parks_on_queue() {
        let inner = Arc::new(FlakyPublisher::new(1));
        let queue = Arc::new(ReconcileQueue::new());
        let reliable = ReliablePublisher::new(inner.clone(), queue.clone());

        reliable.publish(&envelope()).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(inner.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_republishes_parked_envelopes() {
        let inner = Arc::new(FlakyPublisher::new(1));
        let queue = Arc::new(ReconcileQueue::new());
        let reliable = ReliablePublisher::new(inner.clone(), queue.clone());

        let env = envelope();
        reliable.publish(&env).await.unwrap();

        let published = sweep_once(&queue, inner.as_ref()).await;
        assert_eq!(published, 1);
        assert!(queue.is_empty());

        let delivered = inner.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event_id, env.event_id);
    }

    #[tokio::test]
    async fn test_sweep_requeues_on_repeat_failure() {
        let inner = Arc::new(FlakyPublisher::new(2));
        let queue = Arc::new(ReconcileQueue::new());
        let reliable = ReliablePublisher::new(inner.clone(), queue.clone());

        reliable.publish(&envelope()).await.unwrap();

        assert_eq!(sweep_once(&queue, inner.as_ref()).await, 0);
        assert_eq!(queue.len(), 1);

        assert_eq!(sweep_once(&queue, inner.as_ref()).await, 1);
        assert!(queue.is_empty());
    }
}
