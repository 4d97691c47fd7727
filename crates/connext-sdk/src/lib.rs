//! Connext browser SDK: embeds the wallet iframe, watches deposits and runs
//! the login and withdraw flows for a host page.

#[cfg(target_arch = "wasm32")]
pub mod browser;
pub mod error;
pub mod events;
pub mod sdk;

#[cfg(target_arch = "wasm32")]
pub use browser::{browser_sdk, overlay_callbacks, BrowserSdk};
pub use error::SdkError;
pub use events::{EventSender, SdkEvent, SdkNotification};
pub use sdk::{ConnextSdk, AUTHENTICATION_MESSAGE};

/// Version plus the commit and time it was built from.
pub fn build_info() -> String {
    format!(
        "{} ({} built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIME")
    )
}

/// Routes `tracing` output to the browser console.
#[cfg(target_arch = "wasm32")]
pub fn init_browser_logging() {
    tracing_wasm::set_as_global_default();
}

/// Drives the SDK's event queue on the browser's microtask loop.
#[cfg(target_arch = "wasm32")]
pub fn spawn_event_loop<T, A, B, S, C, U>(sdk: std::rc::Rc<ConnextSdk<T, A, B, S, C, U>>)
where
    T: connext_sdk_core::FrameTransport + 'static,
    A: connext_sdk_core::AuthPort + 'static,
    B: connext_sdk_core::ChainPort + 'static,
    S: connext_sdk_core::KeyValueStore + 'static,
    C: connext_sdk_core::ClockPort + 'static,
    U: connext_sdk_core::UiPort + 'static,
{
    wasm_bindgen_futures::spawn_local(async move { sdk.run().await });
}
