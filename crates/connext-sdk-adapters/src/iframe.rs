//! The wallet iframe in a real page: one hidden `<iframe>` plus a `message`
//! listener on the host window filtered by [`OriginGate`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

use connext_sdk_core::{FrameTransport, MessageHandler, OriginGate, PortError};

use crate::dom;

type Listener = Closure<dyn FnMut(web_sys::MessageEvent)>;

pub struct IframeTransport {
    src: String,
    iframe_id: String,
    gate: Arc<OriginGate>,
    listener: Mutex<Option<Listener>>,
}

impl std::fmt::Debug for IframeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IframeTransport")
            .field("src", &self.src)
            .field("iframe_id", &self.iframe_id)
            .finish()
    }
}

impl IframeTransport {
    pub fn new(src: &str, iframe_id: &str) -> Result<Self, PortError> {
        Ok(Self {
            src: src.to_owned(),
            iframe_id: iframe_id.to_owned(),
            gate: Arc::new(OriginGate::new(src)?),
            listener: Mutex::new(None),
        })
    }

    fn frame(&self) -> Option<web_sys::HtmlIFrameElement> {
        dom::element_by_id(&self.iframe_id)?.dyn_into().ok()
    }

    fn attach_listener(&self) -> Result<(), PortError> {
        let mut slot = self
            .listener
            .lock()
            .map_err(|e| PortError::Transport(format!("iframe listener lock poisoned: {e}")))?;
        if slot.is_some() {
            return Ok(());
        }
        let gate = Arc::clone(&self.gate);
        let listener = Listener::new(move |event: web_sys::MessageEvent| {
            let data = event.data();
            let raw = match data.as_string() {
                Some(raw) => raw,
                None => js_sys::JSON::stringify(&data)
                    .ok()
                    .and_then(|s| s.as_string())
                    .unwrap_or_default(),
            };
            gate.accept(&event.origin(), &raw);
        });
        dom::window()?
            .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
            .map_err(|e| PortError::Transport(format!("register message listener failed: {e:?}")))?;
        *slot = Some(listener);
        Ok(())
    }

    fn detach_listener(&self) -> Result<(), PortError> {
        let listener = self
            .listener
            .lock()
            .map_err(|e| PortError::Transport(format!("iframe listener lock poisoned: {e}")))?
            .take();
        if let Some(listener) = listener {
            dom::window()?
                .remove_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
                .map_err(|e| {
                    PortError::Transport(format!("remove message listener failed: {e:?}"))
                })?;
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl FrameTransport for IframeTransport {
    fn target_origin(&self) -> &str {
        self.gate.origin()
    }

    fn is_rendered(&self) -> bool {
        self.frame().is_some()
    }

    async fn render(&self) -> Result<(), PortError> {
        self.attach_listener()?;
        let initialized = self.gate.initialized()?;
        let (frame, created) = dom::render_element("iframe", &self.iframe_id, None)?;
        if !created {
            // Already in the page, so its init marker has come and gone.
            debug!(id = %self.iframe_id, "adopting existing iframe");
            return Ok(());
        }
        dom::set_attr(&frame, "src", &self.src)?;
        dom::set_attr(&frame, "style", "width:0;height:0;border:none;")?;
        debug!(id = %self.iframe_id, src = %self.src, "iframe inserted");
        initialized
            .await
            .map_err(|_| PortError::Transport("iframe removed before initializing".to_owned()))?;
        info!(origin = %self.gate.origin(), "iframe initialized");
        Ok(())
    }

    fn post(&self, payload: &str) -> Result<(), PortError> {
        let target = self
            .frame()
            .and_then(|f| f.content_window())
            .ok_or_else(|| {
                PortError::Transport("iframe content window is not available".to_owned())
            })?;
        target
            .post_message(&JsValue::from_str(payload), self.gate.origin())
            .map_err(|e| PortError::Transport(format!("postMessage failed: {e:?}")))
    }

    fn on_message(&self, handler: MessageHandler) {
        self.gate.set_handler(handler);
    }

    fn remove(&self) -> Result<(), PortError> {
        self.detach_listener()?;
        dom::remove_element(&self.iframe_id);
        self.gate.reset();
        Ok(())
    }
}
