use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::FlowStage;
use crate::transport::MessageHandler;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed request for method: {method}")]
    Protocol { method: String },
    #[error("{0}")]
    Remote(String),
    #[error("state error: {0}")]
    State(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request {method} timed out after {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },
    #[error("request {method} cancelled before a response arrived")]
    Cancelled { method: String },
}

/// Raw postMessage primitive scoped to one iframe and its origin.
#[async_trait(?Send)]
pub trait FrameTransport {
    fn target_origin(&self) -> &str;
    fn is_rendered(&self) -> bool;
    /// Inserts the frame if needed and resolves once it reports initialized.
    async fn render(&self) -> Result<(), PortError>;
    fn post(&self, payload: &str) -> Result<(), PortError>;
    fn on_message(&self, handler: MessageHandler);
    /// Detaches the frame element and the message listener.
    fn remove(&self) -> Result<(), PortError>;
}

#[async_trait(?Send)]
pub trait ClockPort {
    fn now_ms(&self) -> Result<u64, PortError>;
    async fn sleep_ms(&self, ms: u64);
}

#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), PortError>;
    async fn remove(&self, key: &str) -> Result<(), PortError>;
}

pub type BlockNotifier = Arc<dyn Fn(u64) + Send + Sync>;

#[async_trait(?Send)]
pub trait ChainPort {
    async fn token_balance(&self, owner: Address, asset_id: Address) -> Result<U256, PortError>;
    async fn native_balance(&self, owner: Address) -> Result<U256, PortError>;
    fn watch_blocks(&self, notifier: BlockNotifier) -> Result<(), PortError>;
    fn unwatch_blocks(&self) -> Result<(), PortError>;

    /// Sources without push notifications return how often their head
    /// should be polled; the event loop then calls [`Self::poll_head`].
    fn poll_interval_ms(&self) -> Option<u64> {
        None
    }

    /// Checks the head once and notifies the watcher if it advanced.
    async fn poll_head(&self) -> Result<(), PortError> {
        Ok(())
    }
}

#[async_trait(?Send)]
pub trait ChannelPort {
    async fn request_deposit_rights(&self, asset_id: Address) -> Result<(), PortError>;
    async fn rescind_deposit_rights(&self, asset_id: Address) -> Result<(), PortError>;
    fn multisig_address(&self) -> Option<Address>;
}

/// A channel provider handed in by the host page instead of the iframe.
#[async_trait(?Send)]
pub trait ChannelRpc {
    async fn enable(&self) -> Result<(), PortError>;
    async fn send(&self, method: &str, params: Value) -> Result<Value, PortError>;
    async fn close(&self) -> Result<(), PortError>;
}

/// Magic-link authentication provider.
#[async_trait(?Send)]
pub trait AuthPort {
    async fn is_logged_in(&self) -> Result<bool, PortError>;
    async fn login_with_email(&self, email: &str) -> Result<(), PortError>;
    async fn accounts(&self) -> Result<Vec<Address>, PortError>;
    async fn personal_sign(&self, message: &str, account: Address) -> Result<String, PortError>;
}

/// Overlay UI. Implementations render; user input comes back through the
/// SDK event queue.
pub trait UiPort {
    fn mount(&self) -> Result<(), PortError>;
    fn unmount(&self) -> Result<(), PortError>;
    fn show_login(&self);
    fn show_deposit(&self, deposit_address: Address);
    fn show_withdraw(&self);
    fn set_login_stage(&self, stage: FlowStage);
    fn set_deposit_stage(&self, stage: FlowStage);
    fn set_withdraw_stage(&self, stage: FlowStage);
}
