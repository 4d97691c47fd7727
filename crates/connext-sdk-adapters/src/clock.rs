use async_trait::async_trait;

use connext_sdk_core::{ClockPort, PortError};

#[derive(Debug, Clone, Default)]
pub struct SystemClockAdapter;

#[async_trait(?Send)]
impl ClockPort for SystemClockAdapter {
    fn now_ms(&self) -> Result<u64, PortError> {
        let now = web_time::SystemTime::now()
            .duration_since(web_time::UNIX_EPOCH)
            .map_err(|e| PortError::Transport(format!("time error: {e}")))?;
        Ok(now.as_millis() as u64)
    }

    async fn sleep_ms(&self, ms: u64) {
        #[cfg(not(target_arch = "wasm32"))]
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;

        #[cfg(target_arch = "wasm32")]
        browser_sleep(ms).await;
    }
}

#[cfg(target_arch = "wasm32")]
async fn browser_sleep(ms: u64) {
    let delay = i32::try_from(ms).unwrap_or(i32::MAX);
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let scheduled = web_sys::window().map(|w| {
            w.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, delay)
        });
        if !matches!(scheduled, Some(Ok(_))) {
            tracing::warn!("setTimeout unavailable, sleep resolves immediately");
            let _ = resolve.call0(&wasm_bindgen::JsValue::UNDEFINED);
        }
    });
    let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
}
