//! Per-request event sink
//!
//! Wraps the request-scoped channel sender. Built fresh for every
//! invocation and never shared across concurrent sessions; a dropped
//! receiver means the caller went away, which is not an error for the
//! emitting side.

use tokio::sync::mpsc;
use tracing::trace;

use callpilot_core::TurnEvent;

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: TurnEvent) {
        trace!(kind = event.kind(), "emit");
        if self.tx.send(event).await.is_err() {
            trace!("event receiver dropped, caller gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpilot_core::SessionStatus;

    #[tokio::test]
    async fn test_emit_preserves_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new(tx);

        sink.emit(TurnEvent::Status {
            status: SessionStatus::Routing,
        })
        .await;
        sink.emit(TurnEvent::Status {
            status: SessionStatus::Collecting,
        })
        .await;

        assert!(matches!(
            rx.recv().await,
            Some(TurnEvent::Status {
                status: SessionStatus::Routing
            })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(TurnEvent::Status {
                status: SessionStatus::Collecting
            })
        ));
    }

    #[tokio::test]
    async fn test_emit_after_receiver_drop_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        drop(rx);
        sink.emit(TurnEvent::Status {
            status: SessionStatus::Routing,
        })
        .await;
    }
}
