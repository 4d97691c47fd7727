//! In-process stand-in for the wallet iframe.
//!
//! Everything posted is recorded, and an optional responder plays the part
//! of the iframe app by producing raw replies. Replies go through the same
//! [`OriginGate`] a browser transport uses, so origin filtering and the init
//! marker behave identically.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use connext_sdk_core::wire::{EVENT_PREFIX, IFRAME_INITIALIZED_EVENT};
use connext_sdk_core::{FrameTransport, JsonRpcRequest, MessageHandler, OriginGate, PortError};

/// Produces the raw messages the frame sends back for one request.
pub type Responder = Arc<dyn Fn(&JsonRpcRequest) -> Vec<String> + Send + Sync>;

#[derive(Clone)]
pub struct LoopbackTransport {
    gate: Arc<OriginGate>,
    state: Arc<Mutex<LoopbackState>>,
}

#[derive(Default)]
struct LoopbackState {
    rendered: bool,
    auto_initialize: bool,
    posted: Vec<String>,
    responder: Option<Responder>,
    render_count: usize,
    remove_count: usize,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("origin", &self.gate.origin())
            .field("rendered", &self.is_rendered())
            .finish()
    }
}

impl LoopbackTransport {
    /// Frame that reports itself initialized as soon as it is rendered.
    pub fn new(iframe_src: &str) -> Result<Self, PortError> {
        Ok(Self {
            gate: Arc::new(OriginGate::new(iframe_src)?),
            state: Arc::new(Mutex::new(LoopbackState {
                auto_initialize: true,
                ..LoopbackState::default()
            })),
        })
    }

    /// Frame that stays silent until [`Self::signal_initialized`].
    pub fn manual(iframe_src: &str) -> Result<Self, PortError> {
        let transport = Self::new(iframe_src)?;
        transport.lock()?.auto_initialize = false;
        Ok(transport)
    }

    pub fn with_responder(self, responder: Responder) -> Result<Self, PortError> {
        self.lock()?.responder = Some(responder);
        Ok(self)
    }

    pub fn set_responder(&self, responder: Option<Responder>) -> Result<(), PortError> {
        self.lock()?.responder = responder;
        Ok(())
    }

    pub fn origin(&self) -> &str {
        self.gate.origin()
    }

    /// Delivers a message as if `origin` had posted it to the host window.
    pub fn deliver(&self, origin: &str, data: &str) -> bool {
        self.gate.accept(origin, data)
    }

    /// Delivers a message from the frame's own origin.
    pub fn deliver_from_frame(&self, data: &str) -> bool {
        self.gate.accept(self.gate.origin(), data)
    }

    pub fn signal_initialized(&self) -> bool {
        self.deliver_from_frame(&format!("{EVENT_PREFIX}{IFRAME_INITIALIZED_EVENT}"))
    }

    pub fn posted(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|g| g.posted.clone())
            .unwrap_or_default()
    }

    pub fn posted_requests(&self) -> Vec<JsonRpcRequest> {
        self.posted()
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub fn render_count(&self) -> usize {
        self.state.lock().map(|g| g.render_count).unwrap_or(0)
    }

    pub fn remove_count(&self) -> usize {
        self.state.lock().map(|g| g.remove_count).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LoopbackState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("loopback lock poisoned: {e}")))
    }
}

#[async_trait(?Send)]
impl FrameTransport for LoopbackTransport {
    fn target_origin(&self) -> &str {
        self.gate.origin()
    }

    fn is_rendered(&self) -> bool {
        self.state.lock().map(|g| g.rendered).unwrap_or(false)
    }

    async fn render(&self) -> Result<(), PortError> {
        let auto_initialize = {
            let mut g = self.lock()?;
            if g.rendered && self.gate.is_initialized() {
                return Ok(());
            }
            if !g.rendered {
                g.rendered = true;
                g.render_count += 1;
            }
            g.auto_initialize
        };
        let initialized = self.gate.initialized()?;
        if auto_initialize {
            self.signal_initialized();
        }
        initialized
            .await
            .map_err(|_| PortError::Transport("iframe removed before initializing".to_owned()))
    }

    fn post(&self, payload: &str) -> Result<(), PortError> {
        let responder = {
            let mut g = self.lock()?;
            if !g.rendered {
                return Err(PortError::Transport(
                    "iframe content window is not available".to_owned(),
                ));
            }
            g.posted.push(payload.to_owned());
            g.responder.clone()
        };
        if let Some(responder) = responder {
            if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(payload) {
                for reply in responder(&request) {
                    self.deliver_from_frame(&reply);
                }
            }
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) {
        self.gate.set_handler(handler);
    }

    fn remove(&self) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if g.rendered {
            g.rendered = false;
            g.remove_count += 1;
        }
        self.gate.reset();
        Ok(())
    }
}
