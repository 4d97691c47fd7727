//! DOM overlay with the login, deposit and withdraw screens.

use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use tracing::warn;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;

use connext_sdk_core::{FlowStage, PortError, UiPort};

use crate::dom;

/// Where user input goes. The SDK wires these to its event queue.
#[derive(Clone)]
pub struct UiCallbacks {
    pub login: Arc<dyn Fn(String) + Send + Sync>,
    pub withdraw: Arc<dyn Fn(String, String) + Send + Sync>,
    pub close: Arc<dyn Fn() + Send + Sync>,
}

const STYLE: &str = "\
#connext-overlay{position:fixed;inset:0;display:none;align-items:center;justify-content:center;background:rgba(0,0,0,.4);z-index:9999;font-family:sans-serif}\
#connext-overlay[data-open=true]{display:flex}\
#connext-overlay .card{background:#fff;border-radius:8px;padding:24px;min-width:320px}\
#connext-overlay .stage{margin-top:12px;font-size:.9em;color:#555}";

pub struct OverlayUi {
    overlay_id: String,
    style_id: String,
    callbacks: UiCallbacks,
    handlers: Mutex<Vec<Closure<dyn FnMut(web_sys::Event)>>>,
}

impl std::fmt::Debug for OverlayUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayUi")
            .field("overlay_id", &self.overlay_id)
            .finish()
    }
}

impl OverlayUi {
    pub fn new(overlay_id: &str, style_id: &str, callbacks: UiCallbacks) -> Self {
        Self {
            overlay_id: overlay_id.to_owned(),
            style_id: style_id.to_owned(),
            callbacks,
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn overlay(&self) -> Option<web_sys::Element> {
        dom::element_by_id(&self.overlay_id)
    }

    fn show(&self, html: &str) -> Result<(), PortError> {
        let overlay = self
            .overlay()
            .ok_or_else(|| PortError::State("overlay is not mounted".to_owned()))?;
        overlay.set_inner_html(&format!(
            "<div class=\"card\">{html}<div class=\"stage\" data-role=\"stage\"></div>\
             <button data-role=\"close\">Close</button></div>"
        ));
        dom::set_attr(&overlay, "data-open", "true")?;
        self.bind("close", {
            let close = Arc::clone(&self.callbacks.close);
            move |_| close()
        })
    }

    fn bind(
        &self,
        role: &str,
        action: impl Fn(&web_sys::Element) + 'static,
    ) -> Result<(), PortError> {
        let Some(overlay) = self.overlay() else {
            return Ok(());
        };
        let target = overlay
            .query_selector(&format!("[data-role=\"{role}\"]"))
            .map_err(|e| PortError::Transport(format!("query {role} failed: {e:?}")))?
            .ok_or_else(|| PortError::Transport(format!("overlay has no {role} control")))?;
        let root = overlay.clone();
        let handler = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
            event.prevent_default();
            action(&root);
        });
        target
            .add_event_listener_with_callback("click", handler.as_ref().unchecked_ref())
            .map_err(|e| PortError::Transport(format!("bind {role} failed: {e:?}")))?;
        self.handlers
            .lock()
            .map_err(|e| PortError::Transport(format!("overlay lock poisoned: {e}")))?
            .push(handler);
        Ok(())
    }

    fn set_stage(&self, flow: &str, stage: FlowStage) {
        let text = match stage {
            FlowStage::Idle => String::new(),
            FlowStage::Pending => format!("{flow} pending..."),
            FlowStage::Success => format!("{flow} succeeded"),
            FlowStage::Failure => format!("{flow} failed"),
        };
        let node = self
            .overlay()
            .and_then(|o| o.query_selector("[data-role=\"stage\"]").ok().flatten());
        match node {
            Some(node) => node.set_text_content(Some(&text)),
            None => warn!(flow, ?stage, "no stage element to update"),
        }
    }

    fn show_or_warn(&self, screen: &str, html: &str) {
        if let Err(e) = self.show(html) {
            warn!(screen, "overlay render failed: {e}");
        }
    }
}

fn input_value(root: &web_sys::Element, name: &str) -> String {
    root.query_selector(&format!("input[name=\"{name}\"]"))
        .ok()
        .flatten()
        .and_then(|el| el.dyn_into::<web_sys::HtmlInputElement>().ok())
        .map(|input| input.value())
        .unwrap_or_default()
}

impl UiPort for OverlayUi {
    fn mount(&self) -> Result<(), PortError> {
        let (style, created) = dom::render_element("style", &self.style_id, None)?;
        if created {
            style.set_text_content(Some(STYLE));
        }
        dom::render_element("div", &self.overlay_id, None)?;
        Ok(())
    }

    fn unmount(&self) -> Result<(), PortError> {
        dom::remove_element(&self.overlay_id);
        dom::remove_element(&self.style_id);
        self.handlers
            .lock()
            .map_err(|e| PortError::Transport(format!("overlay lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    fn show_login(&self) {
        self.show_or_warn(
            "login",
            "<h3>Login</h3><input name=\"email\" type=\"email\" placeholder=\"Email\">\
             <button data-role=\"login\">Continue</button>",
        );
        let login = Arc::clone(&self.callbacks.login);
        if let Err(e) = self.bind("login", move |root| login(input_value(root, "email"))) {
            warn!("login binding failed: {e}");
        }
    }

    fn show_deposit(&self, deposit_address: Address) {
        self.show_or_warn(
            "deposit",
            &format!("<h3>Deposit</h3><p>Send funds to</p><code>{deposit_address}</code>"),
        );
    }

    fn show_withdraw(&self) {
        self.show_or_warn(
            "withdraw",
            "<h3>Withdraw</h3><input name=\"recipient\" placeholder=\"Recipient\">\
             <input name=\"amount\" placeholder=\"Amount\">\
             <button data-role=\"withdraw\">Withdraw</button>",
        );
        let withdraw = Arc::clone(&self.callbacks.withdraw);
        if let Err(e) = self.bind("withdraw", move |root| {
            withdraw(input_value(root, "recipient"), input_value(root, "amount"))
        }) {
            warn!("withdraw binding failed: {e}");
        }
    }

    fn set_login_stage(&self, stage: FlowStage) {
        self.set_stage("login", stage);
    }

    fn set_deposit_stage(&self, stage: FlowStage) {
        self.set_stage("deposit", stage);
    }

    fn set_withdraw_stage(&self, stage: FlowStage) {
        self.set_stage("withdraw", stage);
    }
}
