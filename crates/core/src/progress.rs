//! Pipeline progress events
//!
//! The lifecycle pipeline runs as a worker task and reports progress over
//! a bounded channel; the CLI drains the channel to drive a spinner, then
//! awaits the single final result. Warnings ride the same channel so the
//! consumer can buffer them and print after the spinner stops, keeping
//! them out of the live progress line.

use serde::Serialize;
use tokio::sync::mpsc;

/// Bounded event channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Progress events emitted by the lifecycle pipeline.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineEvent {
    /// A pipeline step started; drives the spinner message
    StepBegin { step: String },
    /// The step finished
    StepEnd { step: String },
    /// Informational message for the user
    Message { text: String },
    /// Recoverable surprise; rendered after the progress phase
    Warning { text: String },
}

/// Sending half of the pipeline event stream.
///
/// A disabled sender swallows events so library callers can run the
/// pipeline without a consumer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSender {
    /// A sender that discards all events.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a bounded channel and its sender.
    pub fn channel() -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    pub async fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver just means nobody is rendering progress.
            let _ = tx.send(event).await;
        }
    }

    pub async fn step_begin(&self, step: impl Into<String>) {
        self.send(PipelineEvent::StepBegin { step: step.into() }).await;
    }

    pub async fn step_end(&self, step: impl Into<String>) {
        self.send(PipelineEvent::StepEnd { step: step.into() }).await;
    }

    pub async fn message(&self, text: impl Into<String>) {
        self.send(PipelineEvent::Message { text: text.into() }).await;
    }

    pub async fn warning(&self, text: impl Into<String>) {
        self.send(PipelineEvent::Warning { text: text.into() }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = EventSender::channel();
        tx.step_begin("one").await;
        tx.warning("careful").await;
        tx.step_end("one").await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                PipelineEvent::StepBegin {
                    step: "one".to_string()
                },
                PipelineEvent::Warning {
                    text: "careful".to_string()
                },
                PipelineEvent::StepEnd {
                    step: "one".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn disabled_sender_swallows_events() {
        let tx = EventSender::disabled();
        tx.step_begin("ignored").await;
        tx.warning("ignored").await;
    }

    #[test]
    fn events_serialize_with_type_tags() {
        let json = serde_json::to_string(&PipelineEvent::Warning {
            text: "w".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"warning""#), "{json}");
    }
}
