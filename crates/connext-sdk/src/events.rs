//! Inbound event queue and outbound notifications.
//!
//! The UI and the chain watcher only ever produce [`SdkEvent`]s; the SDK is
//! the single consumer. Hosts observe results through [`SdkNotification`].

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkEvent {
    LoginSubmitted { email: String },
    WithdrawSubmitted { recipient: String, amount: String },
    NewBlock(u64),
    /// The user dismissed the overlay.
    Closed,
}

/// Serializes as `{"type": "DEPOSIT_SUCCESS", ...}` for JS hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum SdkNotification {
    LoginSuccess { public_identifier: Option<String> },
    DepositSuccess,
    DepositFailure { reason: String },
    WithdrawSuccess { result: Value },
    WithdrawFailure { reason: String },
}

/// Producer half of the inbound queue. Cheap to clone; sending after the
/// SDK is dropped is a no-op.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SdkEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SdkEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: SdkEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = ?e.0, "sdk gone, event dropped");
        }
    }

    pub fn login(&self, email: impl Into<String>) {
        self.send(SdkEvent::LoginSubmitted {
            email: email.into(),
        });
    }

    pub fn withdraw(&self, recipient: impl Into<String>, amount: impl Into<String>) {
        self.send(SdkEvent::WithdrawSubmitted {
            recipient: recipient.into(),
            amount: amount.into(),
        });
    }

    pub fn new_block(&self, block: u64) {
        self.send(SdkEvent::NewBlock(block));
    }

    pub fn close(&self) {
        self.send(SdkEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_serialize_with_a_type_tag() {
        let login = SdkNotification::LoginSuccess {
            public_identifier: Some("indra123".to_owned()),
        };
        assert_eq!(
            serde_json::to_value(&login).expect("encode"),
            serde_json::json!({ "type": "LOGIN_SUCCESS", "publicIdentifier": "indra123" })
        );
        assert_eq!(
            serde_json::to_value(SdkNotification::DepositSuccess).expect("encode"),
            serde_json::json!({ "type": "DEPOSIT_SUCCESS" })
        );
    }

    #[test]
    fn sending_after_the_receiver_is_gone_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        EventSender::new(tx).new_block(7);
    }
}
