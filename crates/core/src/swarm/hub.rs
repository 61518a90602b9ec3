//! # Event Hub
//!
//! In-process delivery of workflow events to subscribers. Each project has a
//! `project:<id>` room backed by a tokio broadcast channel; only sessions
//! the [`SessionRegistry`] has authenticated may join one.

use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use super::events::{project_topic, EventSink, WorkflowEvent};
use super::sessions::{Identity, SessionRegistry};
use crate::config::WorkflowConfig;
use crate::state::ProjectId;

struct Room {
    tx: broadcast::Sender<WorkflowEvent>,
    members: HashSet<String>,
}

/// Topic-keyed broadcast rooms
pub struct EventHub {
    sessions: Arc<dyn SessionRegistry>,
    rooms: RwLock<HashMap<String, Room>>,
    capacity: usize,
}

impl EventHub {
    pub fn new(sessions: Arc<dyn SessionRegistry>, capacity: usize) -> Self {
        Self {
            sessions,
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Hub whose rooms buffer `event_buffer` events
    pub fn from_config(sessions: Arc<dyn SessionRegistry>, config: &WorkflowConfig) -> Self {
        Self::new(sessions, config.event_buffer)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe an authenticated session to a project's room.
    pub fn join(
        &self,
        session: &str,
        project_id: ProjectId,
    ) -> Result<broadcast::Receiver<WorkflowEvent>> {
        let Some(identity) = self.sessions.identity(session) else {
            bail!("Not authenticated");
        };

        let topic = project_topic(project_id);
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let room = rooms.entry(topic.clone()).or_insert_with(|| Room {
            tx: broadcast::channel(self.capacity).0,
            members: HashSet::new(),
        });
        room.members.insert(session.to_string());

        tracing::info!(session, user_id = %identity.user_id, %topic, "Joined project room");
        Ok(room.tx.subscribe())
    }

    /// Remove a session from one room. Returns true if it was a member.
    pub fn leave(&self, session: &str, project_id: ProjectId) -> bool {
        let topic = project_topic(project_id);
        let Ok(mut rooms) = self.rooms.write() else {
            return false;
        };

        let left = rooms
            .get_mut(&topic)
            .map(|room| room.members.remove(session))
            .unwrap_or(false);
        if rooms.get(&topic).is_some_and(|room| room.members.is_empty()) {
            rooms.remove(&topic);
        }
        left
    }

    /// Drop a session from every room and revoke it.
    pub fn disconnect(&self, session: &str) -> Option<Identity> {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.retain(|_, room| {
                room.members.remove(session);
                !room.members.is_empty()
            });
        }
        self.sessions.revoke(session)
    }

    /// Sessions currently in a project's room
    pub fn members(&self, project_id: ProjectId) -> Vec<String> {
        let topic = project_topic(project_id);
        let mut members: Vec<String> = self
            .rooms
            .read()
            .ok()
            .and_then(|rooms| rooms.get(&topic).map(|r| r.members.iter().cloned().collect()))
            .unwrap_or_default();
        members.sort();
        members
    }
}

impl EventSink for EventHub {
    fn publish(&self, topic: &str, event: &WorkflowEvent) {
        let Ok(rooms) = self.rooms.read() else {
            return;
        };

        match rooms.get(topic) {
            Some(room) => {
                if room.tx.send(event.clone()).is_err() {
                    tracing::debug!(topic, event = %event.event_type, "No listeners, event dropped");
                }
            }
            None => {
                tracing::debug!(topic, event = %event.event_type, "No room, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::WorkflowEventKind;
    use crate::swarm::sessions::{CredentialVerifier, InMemorySessionRegistry};
    use serde_json::json;

    fn hub() -> (EventHub, Arc<InMemorySessionRegistry>) {
        let verifier: Arc<dyn CredentialVerifier> =
            Arc::new(|token: &str| Ok::<_, anyhow::Error>(Identity::new(token)));
        let registry = Arc::new(InMemorySessionRegistry::new(verifier));
        (EventHub::new(registry.clone(), 16), registry)
    }

    fn event(kind: WorkflowEventKind) -> WorkflowEvent {
        WorkflowEvent::new(kind, json!({ "message": "hello" }))
    }

    #[test]
    fn test_join_requires_authentication() {
        let (hub, _) = hub();

        let err = hub.join("sid-1", 7).unwrap_err();
        assert_eq!(err.to_string(), "Not authenticated");
        assert!(hub.members(7).is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_room_members_only() {
        let (hub, registry) = hub();
        registry.authenticate("sid-1", "alice").unwrap();
        registry.authenticate("sid-2", "bob").unwrap();

        let mut rx_7 = hub.join("sid-1", 7).unwrap();
        let mut rx_8 = hub.join("sid-2", 8).unwrap();

        hub.publish("project:7", &event(WorkflowEventKind::SpecReady));

        let received = rx_7.recv().await.unwrap();
        assert_eq!(received.event_type, WorkflowEventKind::SpecReady);
        assert!(rx_8.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_capacity_from_config() {
        let verifier: Arc<dyn CredentialVerifier> =
            Arc::new(|token: &str| Ok::<_, anyhow::Error>(Identity::new(token)));
        let registry = Arc::new(InMemorySessionRegistry::new(verifier));
        let config = WorkflowConfig {
            event_buffer: 2,
            ..WorkflowConfig::default()
        };
        let hub = EventHub::from_config(registry.clone(), &config);
        assert_eq!(hub.capacity(), 2);

        registry.authenticate("sid-1", "alice").unwrap();
        let mut rx = hub.join("sid-1", 5).unwrap();
        for _ in 0..3 {
            hub.publish("project:5", &event(WorkflowEventKind::ProgressUpdate));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }

    #[test]
    fn test_publish_without_room_is_dropped() {
        let (hub, _) = hub();
        hub.publish("project:99", &event(WorkflowEventKind::WorkflowFailed));
    }

    #[test]
    fn test_leave_and_disconnect() {
        let (hub, registry) = hub();
        registry.authenticate("sid-1", "alice").unwrap();
        let _rx_a = hub.join("sid-1", 1).unwrap();
        let _rx_b = hub.join("sid-1", 2).unwrap();

        assert!(hub.leave("sid-1", 1));
        assert!(!hub.leave("sid-1", 1));
        assert!(hub.members(1).is_empty());
        assert_eq!(hub.members(2), vec!["sid-1".to_string()]);

        assert_eq!(hub.disconnect("sid-1"), Some(Identity::new("alice")));
        assert!(hub.members(2).is_empty());
        assert!(hub.join("sid-1", 2).is_err());
    }
}
