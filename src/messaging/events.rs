use std::sync::Mutex;
use tracing::warn;

use crate::messaging::publisher::RabbitMqPublisher;

/// Side-effect notifications raised by a membership update. Value-typed and
/// queued rather than dispatched inline, so a rolled-back update never
/// notifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEvent {
    /// A member's best score now exceeds the prior leaderboard record.
    LeaderboardRecord { leaderboard_id: i64, score_id: i64 },
    /// A member took over the #1 position with a positive total.
    LeaderboardTopPlayer { leaderboard_id: i64, user_id: i64 }
}

/// Events staged during a membership update, flushed only after the store
/// commit succeeds.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    events: Vec<RecordEvent>
}

impl DeferredEvents {
    pub fn new() -> DeferredEvents {
        DeferredEvents::default()
    }

    pub fn push(&mut self, event: RecordEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Delivers every staged event. Delivery is best-effort: failures are
    /// logged and do not fail the update that raised them.
    pub async fn flush(self, sink: &NotificationSink) {
        for event in self.events {
            sink.notify(&event).await;
        }
    }
}

/// Where notifications go. One variant per transport; `Disabled` swallows
/// everything for deployments without a broker.
pub enum NotificationSink {
    RabbitMq(RabbitMqPublisher),
    Buffer(BufferSink),
    Disabled
}

impl NotificationSink {
    pub async fn notify(&self, event: &RecordEvent) {
        match self {
            NotificationSink::RabbitMq(publisher) => {
                let result = match event {
                    RecordEvent::LeaderboardRecord {
                        leaderboard_id,
                        score_id
                    } => publisher.publish_leaderboard_record(*leaderboard_id, *score_id).await,
                    RecordEvent::LeaderboardTopPlayer {
                        leaderboard_id,
                        user_id
                    } => {
                        publisher
                            .publish_leaderboard_top_player(*leaderboard_id, *user_id)
                            .await
                    }
                };

                if let Err(e) = result {
                    warn!("Failed to publish notification: {}", e);
                }
            }
            NotificationSink::Buffer(buffer) => buffer.push(event.clone()),
            NotificationSink::Disabled => {}
        }
    }
}

/// Captures events in memory; used by the test-suite.
#[derive(Debug, Default)]
pub struct BufferSink {
    events: Mutex<Vec<RecordEvent>>
}

impl BufferSink {
    pub fn new() -> BufferSink {
        BufferSink::default()
    }

    fn push(&self, event: RecordEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    pub fn events(&self) -> Vec<RecordEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
