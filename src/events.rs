//! Consumer side of the pipeline.
//!
//! Readings fan out to [`ReadingSink`]s (the retention store and the window
//! buffer) and to any number of external subscribers through the [`EventBus`],
//! which also carries connection status changes.

use crate::source::types::{ConnectionStatus, Reading};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

const SUBSCRIBER_CAPACITY: usize = 10_000;

/// Something that takes every forwarded reading.
pub trait ReadingSink: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Accept one reading. A failure affects only this sink.
    fn accept(&mut self, reading: &Reading) -> Result<(), SinkError>;
}

/// A sink could not accept a reading.
#[derive(Debug, Error)]
#[error("{sink} rejected reading: {source}")]
pub struct SinkError {
    pub sink: &'static str,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl SinkError {
    pub fn new(sink: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            sink,
            source: Box::new(source),
        }
    }
}

/// Event delivered to external subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A reading was forwarded by the active producer.
    Reading(Reading),
    /// The live link changed state.
    Status(ConnectionStatus),
}

/// Fan-out of pipeline events to subscribers.
///
/// A subscriber that falls more than the channel capacity behind misses events;
/// a dropped receiver is forgotten on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (sender, receiver) = bounded(SUBSCRIBER_CAPACITY);
        self.lock().push(sender);
        receiver
    }

    pub fn publish(&self, event: PipelineEvent) {
        self.lock()
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!("subscriber lagging, event dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    pub fn publish_status(&self, status: ConnectionStatus) {
        self.publish(PipelineEvent::Status(status));
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<PipelineEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        let reading = Reading::new(1, 1200);
        bus.publish(PipelineEvent::Reading(reading));

        assert_eq!(first.try_recv().unwrap(), PipelineEvent::Reading(reading));
        assert_eq!(second.try_recv().unwrap(), PipelineEvent::Reading(reading));
    }

    #[test]
    fn test_dropped_subscribers_are_forgotten() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish_status(ConnectionStatus::disconnected("disconnected"));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(matches!(kept.try_recv(), Ok(PipelineEvent::Status(_))));
    }

    #[test]
    fn test_sink_error_names_the_sink() {
        let err = SinkError::new("retention store", std::io::Error::other("locked"));
        assert_eq!(err.to_string(), "retention store rejected reading: locked");
        assert!(err.source().is_some());
    }
}
