pub mod auth;
pub mod chain;
pub mod clock;
pub mod config;
pub mod loopback;
pub mod store;
pub mod ui;
pub mod wallet;

#[cfg(target_arch = "wasm32")]
pub mod dom;
#[cfg(target_arch = "wasm32")]
pub mod iframe;
#[cfg(target_arch = "wasm32")]
pub mod overlay;

pub use auth::{account_for, DeterministicAuth};
pub use chain::{RpcChainAdapter, ScriptedChain};
pub use clock::SystemClockAdapter;
pub use config::SdkConfig;
pub use loopback::{LoopbackTransport, Responder};
pub use store::MemoryStore;
pub use ui::{HeadlessUi, Screen};
pub use wallet::ScriptedWallet;

#[cfg(target_arch = "wasm32")]
pub use iframe::IframeTransport;
#[cfg(target_arch = "wasm32")]
pub use overlay::{OverlayUi, UiCallbacks};
#[cfg(target_arch = "wasm32")]
pub use store::LocalStorageStore;
