//! Fan-out of push events to connected browser sessions.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use webhooks::{Push, PushEvent};

const SESSION_BUFFER: usize = 64;

/// One broadcast channel per session id. A session can have several open
/// streams (e.g. two tabs); all of them receive every event.
#[derive(Default)]
pub struct PushHub {
    sessions: DashMap<String, broadcast::Sender<PushEvent>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<PushEvent> {
        self.sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| broadcast::channel(SESSION_BUFFER).0)
            .subscribe()
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.sessions.get(session_id).is_some_and(|tx| tx.receiver_count() > 0)
    }
}

impl Push for PushHub {
    fn push(&self, session_id: &str, event: PushEvent) {
        let kind = event.kind();
        let undelivered = match self.sessions.get(session_id) {
            Some(tx) => tx.send(event).is_err(),
            None => {
                debug!(%session_id, kind, "no push connection for session");
                return;
            }
        };
        if undelivered {
            debug!(%session_id, kind, "push session closed");
            self.sessions.remove_if(session_id, |_, tx| tx.receiver_count() == 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_stream_of_a_session() {
        let hub = PushHub::new();
        let mut a = hub.subscribe("s1");
        let mut b = hub.subscribe("s1");
        let mut other = hub.subscribe("s2");

        hub.push("s1", PushEvent::TestWebhookDeleted { workflow_id: "7".into() });

        assert_eq!(a.recv().await.unwrap().kind(), "testWebhookDeleted");
        assert_eq!(b.recv().await.unwrap().kind(), "testWebhookDeleted");
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn closed_sessions_are_dropped() {
        let hub = PushHub::new();
        drop(hub.subscribe("s1"));
        hub.push("s1", PushEvent::TestWebhookDeleted { workflow_id: "7".into() });
        assert!(!hub.is_connected("s1"));
        assert!(hub.sessions.is_empty());
    }
}
