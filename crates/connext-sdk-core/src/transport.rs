use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use url::Url;

use crate::ports::PortError;
use crate::wire::{EVENT_PREFIX, IFRAME_INITIALIZED_EVENT};

pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Serialized origin (`scheme://host[:port]`) of an iframe src.
pub fn origin_of(src: &str) -> Result<String, PortError> {
    let url = Url::parse(src)
        .map_err(|e| PortError::Transport(format!("malformed iframe src {src:?}: {e}")))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(PortError::Transport(format!(
            "iframe src {src:?} has an opaque origin"
        )));
    }
    Ok(origin.ascii_serialization())
}

/// Receiving half shared by every transport: drops messages from foreign
/// origins, latches the init marker and hands everything else to the
/// registered handler.
#[derive(Debug)]
pub struct OriginGate {
    origin: String,
    inner: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    handler: Option<MessageHandler>,
    initialized: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl std::fmt::Debug for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateState")
            .field("handler", &self.handler.is_some())
            .field("initialized", &self.initialized)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

impl OriginGate {
    pub fn new(iframe_src: &str) -> Result<Self, PortError> {
        Ok(Self {
            origin: origin_of(iframe_src)?,
            inner: Mutex::new(GateState::default()),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_handler(&self, handler: MessageHandler) {
        if let Ok(mut g) = self.inner.lock() {
            g.handler = Some(handler);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().map(|g| g.initialized).unwrap_or(false)
    }

    /// Resolves once the frame has sent its init marker. Already-initialized
    /// gates resolve immediately.
    pub fn initialized(&self) -> Result<oneshot::Receiver<()>, PortError> {
        let (tx, rx) = oneshot::channel();
        let mut g = self
            .inner
            .lock()
            .map_err(|e| PortError::Transport(format!("origin gate lock poisoned: {e}")))?;
        if g.initialized {
            let _ = tx.send(());
        } else {
            g.waiters.push(tx);
        }
        Ok(rx)
    }

    /// Forgets the handler and init state so the frame can be rendered again.
    pub fn reset(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.handler = None;
            g.initialized = false;
            g.waiters.clear();
        }
    }

    /// Returns whether the message was accepted. Foreign origins are dropped
    /// without logging; host pages carry plenty of unrelated traffic.
    pub fn accept(&self, origin: &str, data: &str) -> bool {
        if origin != self.origin {
            return false;
        }
        let handler = {
            let Ok(mut g) = self.inner.lock() else {
                return false;
            };
            if data.strip_prefix(EVENT_PREFIX) == Some(IFRAME_INITIALIZED_EVENT) {
                g.initialized = true;
                for waiter in g.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
            g.handler.clone()
        };
        if let Some(handler) = handler {
            handler(data);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn origin_strips_path_and_keeps_port() {
        assert_eq!(
            origin_of("http://localhost:3030/wallet?x=1").expect("origin"),
            "http://localhost:3030"
        );
        assert_eq!(
            origin_of("https://wallet.connext.network/").expect("origin"),
            "https://wallet.connext.network"
        );
    }

    #[test]
    fn malformed_src_is_a_transport_error() {
        assert!(matches!(origin_of("not a url"), Err(PortError::Transport(_))));
        assert!(matches!(origin_of("data:text/html,hi"), Err(PortError::Transport(_))));
    }

    #[test]
    fn foreign_origin_never_reaches_handler() {
        let gate = OriginGate::new("http://localhost:3030").expect("gate");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        gate.set_handler(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!gate.accept("http://evil.example", r#"{"id":1,"result":true}"#));
        assert!(!gate.accept("http://evil.example", "event:iframe-initialized"));
        assert!(!gate.is_initialized());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(gate.accept("http://localhost:3030", r#"{"id":1,"result":true}"#));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn init_marker_releases_waiters() {
        let gate = OriginGate::new("http://localhost:3030").expect("gate");
        let mut rx = gate.initialized().expect("waiter");
        assert!(rx.try_recv().is_err());
        gate.accept("http://localhost:3030", "event:iframe-initialized");
        assert!(rx.try_recv().is_ok());
        assert!(gate.initialized().expect("waiter").try_recv().is_ok());

        gate.reset();
        assert!(!gate.is_initialized());
    }
}
