//! Push delivery and client-surface routing
//!
//! The engine outlives any single client surface. Live surfaces register
//! here; pushes route to the most-recently-focused one, and a navigation
//! target from a push that arrived with no surface attached is held until
//! the next attach and consumed exactly once.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::quota::QuotaSnapshot;

/// Push message payload. Anything that does not parse as this shape is
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "requireInteraction", default)]
    pub require_interaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl PushPayload {
    /// Navigation target carried in the payload's data, if any.
    pub fn navigation_target(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.get("url"))
            .and_then(|u| u.as_str())
            .map(String::from)
    }
}

/// Push subscription state: opaque endpoint plus client keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub failures: u32,
}

/// Events delivered to attached client surfaces.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// An incoming push message
    Push(PushPayload),
    /// A notification click routed to this surface
    Navigate(String),
    /// Storage usage crossed the high-water mark
    StorageWarning(QuotaSnapshot),
}

/// How a push was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to a live client surface
    Delivered,
    /// No surface attached; surfaced as a system-level alert
    Alerted,
    /// Malformed payload, dropped
    Dropped,
}

struct ClientSession {
    id: u64,
    sender: mpsc::UnboundedSender<ClientEvent>,
}

/// Routes pushes and clicks to attached client surfaces.
///
/// Sessions are kept in focus order: the last element is the
/// most-recently-focused surface.
pub struct NotificationDispatcher {
    clients: Vec<ClientSession>,
    pending_target: Option<String>,
    subscription: Option<SubscriptionRecord>,
    max_delivery_failures: u32,
}

impl NotificationDispatcher {
    pub fn new(max_delivery_failures: u32) -> Self {
        Self {
            clients: Vec::new(),
            pending_target: None,
            subscription: None,
            max_delivery_failures,
        }
    }

    /// Opt in to push delivery. Keys must be base64url.
    pub fn subscribe(
        &mut self,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<SubscriptionRecord> {
        decode_base64url(p256dh)
            .map_err(|e| Error::Other(format!("Invalid p256dh key: {}", e)))?;
        decode_base64url(auth).map_err(|e| Error::Other(format!("Invalid auth key: {}", e)))?;

        let record = SubscriptionRecord {
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
            created_at: Utc::now(),
            failures: 0,
        };
        self.subscription = Some(record.clone());
        Ok(record)
    }

    /// Opt out. Returns the record that was active, if any.
    pub fn unsubscribe(&mut self) -> Option<SubscriptionRecord> {
        self.subscription.take()
    }

    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        self.subscription.as_ref()
    }

    /// Attach a client surface. A pending navigation target is consumed
    /// here, exactly once.
    pub fn attach(&mut self, id: u64, sender: mpsc::UnboundedSender<ClientEvent>) {
        self.detach(id);

        if let Some(target) = self.pending_target.take()
            && sender.send(ClientEvent::Navigate(target)).is_err()
        {
            warn!("client {} went away before consuming pending target", id);
        }

        self.clients.push(ClientSession { id, sender });
    }

    /// Mark a surface as focused: it becomes the routing target.
    pub fn focus(&mut self, id: u64) {
        if let Some(pos) = self.clients.iter().position(|c| c.id == id) {
            let session = self.clients.remove(pos);
            self.clients.push(session);
        }
    }

    pub fn detach(&mut self, id: u64) {
        self.clients.retain(|c| c.id != id);
    }

    pub fn attached_clients(&self) -> usize {
        self.clients.len()
    }

    /// Deliver a raw push message.
    pub fn deliver(&mut self, raw: &[u8]) -> DeliveryOutcome {
        let payload: PushPayload = match serde_json::from_slice(raw) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("dropping malformed push payload: {}", err);
                self.record_delivery_failure();
                return DeliveryOutcome::Dropped;
            }
        };

        if self.send_focused(ClientEvent::Push(payload.clone())) {
            return DeliveryOutcome::Delivered;
        }

        // No live surface: system-level alert, and hold the navigation
        // target for the next attach.
        info!("push: {} — {}", payload.title, payload.body);
        if let Some(target) = payload.navigation_target() {
            self.pending_target = Some(target);
        }
        DeliveryOutcome::Alerted
    }

    /// Route a notification click.
    pub fn click(&mut self, target: Option<String>) {
        let Some(target) = target else { return };

        if !self.send_focused(ClientEvent::Navigate(target.clone())) {
            self.pending_target = Some(target);
        }
    }

    /// Warn every attached surface about storage pressure.
    pub fn broadcast_storage_warning(&mut self, snapshot: QuotaSnapshot) {
        self.clients
            .retain(|c| c.sender.send(ClientEvent::StorageWarning(snapshot)).is_ok());
    }

    /// Send to the most-recently-focused live surface, pruning dead ones.
    fn send_focused(&mut self, event: ClientEvent) -> bool {
        while let Some(session) = self.clients.last() {
            if session.sender.send(event.clone()).is_ok() {
                return true;
            }
            debug!("pruning dead client surface {}", session.id);
            self.clients.pop();
        }
        false
    }

    fn record_delivery_failure(&mut self) {
        let Some(subscription) = self.subscription.as_mut() else {
            return;
        };
        subscription.failures += 1;
        if subscription.failures >= self.max_delivery_failures {
            warn!(
                "dropping push subscription after {} failed deliveries",
                subscription.failures
            );
            self.subscription = None;
        }
    }
}

/// Decode base64url (URL-safe base64, with or without padding)
fn decode_base64url(input: &str) -> std::result::Result<Vec<u8>, String> {
    use base64::{Engine as _, engine::general_purpose};

    general_purpose::URL_SAFE_NO_PAD
        .decode(input)
        .or_else(|_| general_purpose::URL_SAFE.decode(input))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_json(title: &str, url: Option<&str>) -> Vec<u8> {
        let mut value = serde_json::json!({
            "title": title,
            "body": "You have a new streak!",
            "requireInteraction": true,
        });
        if let Some(url) = url {
            value["data"] = serde_json::json!({"url": url});
        }
        value.to_string().into_bytes()
    }

    fn attach_client(
        dispatcher: &mut NotificationDispatcher,
        id: u64,
    ) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.attach(id, tx);
        rx
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        let mut dispatcher = NotificationDispatcher::new(3);
        assert_eq!(dispatcher.deliver(b"not json"), DeliveryOutcome::Dropped);
        assert_eq!(
            dispatcher.deliver(b"{\"no_title\": true}"),
            DeliveryOutcome::Dropped
        );
    }

    #[test]
    fn test_delivers_to_focused_client() {
        let mut dispatcher = NotificationDispatcher::new(3);
        let mut rx_a = attach_client(&mut dispatcher, 1);
        let mut rx_b = attach_client(&mut dispatcher, 2);

        dispatcher.focus(1);
        let outcome = dispatcher.deliver(&payload_json("Streak", None));
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        match rx_a.try_recv().unwrap() {
            ClientEvent::Push(p) => assert_eq!(p.title, "Streak"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_no_client_alerts_and_stashes_target() {
        let mut dispatcher = NotificationDispatcher::new(3);

        let outcome = dispatcher.deliver(&payload_json("Streak", Some("/lessons/7")));
        assert_eq!(outcome, DeliveryOutcome::Alerted);

        // First attach consumes the target
        let mut rx = attach_client(&mut dispatcher, 1);
        match rx.try_recv().unwrap() {
            ClientEvent::Navigate(url) => assert_eq!(url, "/lessons/7"),
            other => panic!("unexpected event: {:?}", other),
        }

        // A second attach gets nothing: consumed exactly once
        let mut rx2 = attach_client(&mut dispatcher, 2);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_click_routes_to_focused_else_stashes() {
        let mut dispatcher = NotificationDispatcher::new(3);
        dispatcher.click(Some("/review".to_string()));

        let mut rx = attach_client(&mut dispatcher, 1);
        match rx.try_recv().unwrap() {
            ClientEvent::Navigate(url) => assert_eq!(url, "/review"),
            other => panic!("unexpected event: {:?}", other),
        }

        dispatcher.click(Some("/next".to_string()));
        match rx.try_recv().unwrap() {
            ClientEvent::Navigate(url) => assert_eq!(url, "/next"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_dead_client_is_pruned_and_next_used() {
        let mut dispatcher = NotificationDispatcher::new(3);
        let mut rx_a = attach_client(&mut dispatcher, 1);
        let rx_b = attach_client(&mut dispatcher, 2);
        drop(rx_b);

        // Most-recently-attached client is dead; falls back to the other
        let outcome = dispatcher.deliver(&payload_json("Streak", None));
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert!(matches!(rx_a.try_recv().unwrap(), ClientEvent::Push(_)));
        assert_eq!(dispatcher.attached_clients(), 1);
    }

    #[test]
    fn test_subscribe_validates_keys() {
        let mut dispatcher = NotificationDispatcher::new(3);

        let record = dispatcher
            .subscribe("https://push.example.com/abc", "BElkZWtrZXk", "YXV0aA")
            .unwrap();
        assert_eq!(record.failures, 0);
        assert!(dispatcher.subscription().is_some());

        assert!(
            dispatcher
                .subscribe("https://push.example.com/abc", "not base64!!", "YXV0aA")
                .is_err()
        );
    }

    #[test]
    fn test_unsubscribe() {
        let mut dispatcher = NotificationDispatcher::new(3);
        dispatcher
            .subscribe("https://push.example.com/abc", "a2V5", "YXV0aA")
            .unwrap();

        assert!(dispatcher.unsubscribe().is_some());
        assert!(dispatcher.subscription().is_none());
        assert!(dispatcher.unsubscribe().is_none());
    }

    #[test]
    fn test_failures_past_threshold_drop_subscription() {
        let mut dispatcher = NotificationDispatcher::new(2);
        dispatcher
            .subscribe("https://push.example.com/abc", "a2V5", "YXV0aA")
            .unwrap();

        dispatcher.deliver(b"garbage");
        assert!(dispatcher.subscription().is_some());

        dispatcher.deliver(b"garbage");
        assert!(dispatcher.subscription().is_none());
    }

    #[test]
    fn test_payload_parsing() {
        let raw = br#"{"title":"T","body":"B","image":"/i.png","tag":"streak","data":{"url":"/x"}}"#;
        let payload: PushPayload = serde_json::from_slice(raw).unwrap();
        assert_eq!(payload.image.as_deref(), Some("/i.png"));
        assert_eq!(payload.tag.as_deref(), Some("streak"));
        assert!(!payload.require_interaction);
        assert_eq!(payload.navigation_target().as_deref(), Some("/x"));
    }
}
