//! Browser assembly: the wallet iframe, the DOM overlay, `localStorage` and
//! a JSON-RPC chain reader, all wired to one inbound event queue.

use std::sync::Arc;

use connext_sdk_adapters::{
    IframeTransport, LocalStorageStore, OverlayUi, RpcChainAdapter, SdkConfig, SystemClockAdapter,
    UiCallbacks,
};
use connext_sdk_core::AuthPort;

use crate::error::SdkError;
use crate::events::EventSender;
use crate::sdk::ConnextSdk;

pub type BrowserSdk<A> = ConnextSdk<
    IframeTransport,
    A,
    RpcChainAdapter,
    LocalStorageStore,
    SystemClockAdapter,
    OverlayUi,
>;

/// Overlay buttons feeding the SDK's inbound queue.
pub fn overlay_callbacks(events: EventSender) -> UiCallbacks {
    let login = events.clone();
    let withdraw = events.clone();
    UiCallbacks {
        login: Arc::new(move |email: String| login.login(email)),
        withdraw: Arc::new(move |recipient: String, amount: String| {
            withdraw.withdraw(recipient, amount)
        }),
        close: Arc::new(move || events.close()),
    }
}

/// Builds the SDK for a host page. `auth` is the host's magic-link provider
/// behind [`AuthPort`]; `config.eth_provider_url` must be set so deposits
/// can be watched.
pub fn browser_sdk<A: AuthPort>(config: SdkConfig, auth: A) -> Result<BrowserSdk<A>, SdkError> {
    let transport = IframeTransport::new(&config.iframe_src, &config.iframe_id)?;
    let chain = RpcChainAdapter::from_config(&config)?;
    let overlay_id = config.overlay_id.clone();
    let style_id = config.style_id.clone();
    ConnextSdk::new_with_ui(
        config,
        transport,
        auth,
        chain,
        LocalStorageStore,
        SystemClockAdapter,
        move |events| OverlayUi::new(&overlay_id, &style_id, overlay_callbacks(events)),
    )
}
