use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{select, Either};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::TimestampMs;
use crate::ports::{ClockPort, FrameTransport, PortError};
use crate::transport::MessageHandler;
use crate::wire::{
    decode_inbound, methods, payload_id, random_tie_breaker, subscription_key, Inbound,
    JsonRpcRequest, ResponseBody, IFRAME_INITIALIZED_EVENT,
};

pub type EventListener = Arc<dyn Fn(Value) + Send + Sync>;
/// Receives the name of every `event:<name>` marker other than the init one.
pub type LifecycleListener = Arc<dyn Fn(&str) + Send + Sync>;

pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// One in-flight request. Settled at most once: the responder is consumed
/// by whichever of response, cancellation or close gets to it first.
pub struct PendingCall {
    pub id: u64,
    pub method: String,
    pub params: Value,
    pub created_at: TimestampMs,
    responder: oneshot::Sender<Result<Value, PortError>>,
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl PendingCall {
    fn settle(self, outcome: Result<Value, PortError>) {
        if self.responder.send(outcome).is_err() {
            debug!(id = self.id, method = %self.method, "caller dropped before settlement");
        }
    }
}

struct Subscription {
    event: String,
    listener: EventListener,
    once: bool,
}

#[derive(Default)]
struct RpcState {
    connected: bool,
    listening: bool,
    pending: HashMap<u64, PendingCall>,
    subscriptions: HashMap<String, Subscription>,
    lifecycle: Vec<LifecycleListener>,
}

/// Method-call abstraction over a [`FrameTransport`] with id correlation and
/// server-pushed subscriptions.
pub struct RpcConnection<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    transport: T,
    clock: C,
    close_timeout_ms: u64,
    state: Arc<Mutex<RpcState>>,
}

impl<T, C> RpcConnection<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            state: Arc::new(Mutex::new(RpcState::default())),
        }
    }

    pub fn with_close_timeout_ms(mut self, ms: u64) -> Self {
        self.close_timeout_ms = ms;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().map(|g| g.connected).unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|g| g.pending.len()).unwrap_or(0)
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().map(|g| g.subscriptions.len()).unwrap_or(0)
    }

    /// Ids and methods of requests still waiting for an answer.
    pub fn pending_calls(&self) -> Vec<(u64, String)> {
        self.state
            .lock()
            .map(|g| {
                g.pending
                    .values()
                    .map(|c| (c.id, c.method.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn on_event(&self, listener: LifecycleListener) -> Result<(), PortError> {
        self.lock()?.lifecycle.push(listener);
        Ok(())
    }

    /// Attaches the message handler, renders the frame and waits for its
    /// init marker.
    pub async fn open(&self) -> Result<(), PortError> {
        let attach = {
            let mut g = self.lock()?;
            !std::mem::replace(&mut g.listening, true)
        };
        if attach {
            let state = Arc::clone(&self.state);
            let handler: MessageHandler = Arc::new(move |raw: &str| handle_inbound(&state, raw));
            self.transport.on_message(handler);
        }

        if let Err(e) = self.transport.render().await {
            self.lock()?.listening = false;
            return Err(e);
        }
        self.lock()?.connected = true;
        info!(origin = %self.transport.target_origin(), "iframe connection open");
        Ok(())
    }

    /// Releases subscriptions, removes the frame and fails every call still
    /// waiting. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), PortError> {
        let (connected, has_subscriptions) = {
            let g = self.lock()?;
            (g.connected, !g.subscriptions.is_empty())
        };
        if connected && has_subscriptions {
            if let Err(e) = self.unsubscribe_all_within(self.close_timeout_ms).await {
                warn!("releasing subscriptions on close failed: {e}");
            }
        }

        let abandoned = {
            let mut g = self.lock()?;
            g.connected = false;
            g.listening = false;
            g.subscriptions.clear();
            std::mem::take(&mut g.pending)
        };
        for (_, call) in abandoned {
            let method = call.method.clone();
            call.settle(Err(PortError::Cancelled { method }));
        }

        self.transport.remove()?;
        if connected {
            info!("iframe connection closed");
        }
        Ok(())
    }

    /// Issues a request and waits for the response carrying the same id.
    /// No deadline is applied; see [`Self::send_with_deadline`].
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, PortError> {
        let (_, rx) = self.begin_call(method, params)?;
        await_settlement(method, rx).await
    }

    /// Like [`Self::send`] but gives up after `deadline_ms`, removing the
    /// pending entry so a late response is dropped.
    pub async fn send_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline_ms: u64,
    ) -> Result<Value, PortError> {
        let (id, rx) = self.begin_call(method, params)?;
        match select(rx, self.clock.sleep_ms(deadline_ms)).await {
            Either::Left((settled, _)) => flatten_settlement(method, settled),
            Either::Right(((), _)) => {
                self.lock()?.pending.remove(&id);
                warn!(id, method, deadline_ms, "request timed out");
                Err(PortError::Timeout {
                    method: method.to_owned(),
                    after_ms: deadline_ms,
                })
            }
        }
    }

    /// Fails one outstanding call. Returns false if it already settled.
    pub fn cancel(&self, id: u64) -> Result<bool, PortError> {
        let call = self.lock()?.pending.remove(&id);
        Ok(match call {
            Some(call) => {
                let method = call.method.clone();
                call.settle(Err(PortError::Cancelled { method }));
                true
            }
            None => false,
        })
    }

    /// Subscribes to a wallet event; every push for the returned
    /// subscription id reaches `listener`.
    pub async fn subscribe(&self, event: &str, listener: EventListener) -> Result<String, PortError> {
        self.subscribe_inner(event, listener, false).await
    }

    /// Like [`Self::subscribe`] but the listener is dropped after the first push.
    pub async fn subscribe_once(
        &self,
        event: &str,
        listener: EventListener,
    ) -> Result<String, PortError> {
        self.subscribe_inner(event, listener, true).await
    }

    /// Releases every subscription in a single round trip.
    pub async fn unsubscribe_all(&self) -> Result<(), PortError> {
        let result = self
            .send(methods::UNSUBSCRIBE, serde_json::json!({}))
            .await;
        self.lock()?.subscriptions.clear();
        result.map(|_| ())
    }

    async fn unsubscribe_all_within(&self, deadline_ms: u64) -> Result<(), PortError> {
        let result = self
            .send_with_deadline(methods::UNSUBSCRIBE, serde_json::json!({}), deadline_ms)
            .await;
        self.lock()?.subscriptions.clear();
        result.map(|_| ())
    }

    async fn subscribe_inner(
        &self,
        event: &str,
        listener: EventListener,
        once: bool,
    ) -> Result<String, PortError> {
        let result = self
            .send(methods::SUBSCRIBE, serde_json::json!({ "event": event }))
            .await?;
        let key = subscription_key(&result).ok_or_else(|| PortError::Protocol {
            method: methods::SUBSCRIBE.to_owned(),
        })?;
        self.lock()?.subscriptions.insert(
            key.clone(),
            Subscription {
                event: event.to_owned(),
                listener,
                once,
            },
        );
        debug!(event, subscription = %key, once, "subscribed");
        Ok(key)
    }

    /// Validates, registers the listener and posts. The listener goes in
    /// before the write so a synchronous answer cannot be missed.
    fn begin_call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, PortError>>), PortError> {
        if method.trim().is_empty() {
            return Err(PortError::Protocol {
                method: method.to_owned(),
            });
        }
        if !self.transport.is_rendered() {
            return Err(PortError::Transport("iframe is not rendered".to_owned()));
        }
        let now = self.clock.now_ms()?;

        let (tx, rx) = oneshot::channel();
        let request = {
            let mut g = self.lock()?;
            if !g.connected {
                return Err(PortError::Transport(format!(
                    "connection not open, refusing to send {method}"
                )));
            }
            let mut id = payload_id(now, random_tie_breaker());
            while g.pending.contains_key(&id) {
                id = id.wrapping_add(1);
            }
            let request = JsonRpcRequest::new(id, method, params);
            g.pending.insert(
                id,
                PendingCall {
                    id,
                    method: request.method.clone(),
                    params: request.params.clone(),
                    created_at: TimestampMs(now),
                    responder: tx,
                },
            );
            request
        };

        let posted = request
            .encode()
            .and_then(|payload| self.transport.post(&payload));
        if let Err(e) = posted {
            self.lock()?.pending.remove(&request.id);
            return Err(e);
        }
        debug!(id = request.id, method, "request posted");
        Ok((request.id, rx))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RpcState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("rpc state lock poisoned: {e}")))
    }
}

async fn await_settlement(
    method: &str,
    rx: oneshot::Receiver<Result<Value, PortError>>,
) -> Result<Value, PortError> {
    flatten_settlement(method, rx.await)
}

fn flatten_settlement(
    method: &str,
    settled: Result<Result<Value, PortError>, oneshot::error::RecvError>,
) -> Result<Value, PortError> {
    settled.unwrap_or_else(|_| {
        Err(PortError::Cancelled {
            method: method.to_owned(),
        })
    })
}

fn handle_inbound(state: &Mutex<RpcState>, raw: &str) {
    match decode_inbound(raw) {
        None => debug!("dropping unrecognized frame message"),
        Some(Inbound::Event(name)) => {
            debug!(event = %name, "frame event");
            if name == IFRAME_INITIALIZED_EVENT {
                return;
            }
            let listeners = state
                .lock()
                .map(|g| g.lifecycle.clone())
                .unwrap_or_default();
            for listener in listeners {
                listener(&name);
            }
        }
        Some(Inbound::Response { id, body }) => {
            let call = state.lock().ok().and_then(|mut g| g.pending.remove(&id));
            let Some(call) = call else {
                debug!(id, "response for unknown or settled id");
                return;
            };
            let outcome = match body {
                ResponseBody::Result(value) => Ok(value),
                ResponseBody::Error(message) => Err(PortError::Remote(message)),
                ResponseBody::Malformed => Err(PortError::Protocol {
                    method: call.method.clone(),
                }),
            };
            debug!(id, method = %call.method, ok = outcome.is_ok(), "response settled");
            call.settle(outcome);
        }
        Some(Inbound::Push { subscription, data }) => {
            let target = state.lock().ok().and_then(|mut g| {
                let sub = g.subscriptions.get(&subscription)?;
                let target = (Arc::clone(&sub.listener), sub.event.clone());
                if sub.once {
                    g.subscriptions.remove(&subscription);
                }
                Some(target)
            });
            match target {
                Some((listener, event)) => {
                    debug!(%subscription, %event, "subscription push");
                    listener(data);
                }
                None => debug!(%subscription, "push for unknown subscription"),
            }
        }
    }
}
