//! Cross-frame wire format.
//!
//! Requests and responses travel as stringified JSON over postMessage. The
//! iframe additionally sends bare `event:<name>` strings, which are not JSON
//! and must be recognised before any parse is attempted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ports::PortError;

pub const JSONRPC_VERSION: &str = "2.0";
pub const EVENT_PREFIX: &str = "event:";
pub const IFRAME_INITIALIZED_EVENT: &str = "iframe-initialized";
pub const SUBSCRIPTION_METHOD: &str = "chan_subscription";

pub mod methods {
    pub const AUTHENTICATE: &str = "connext_authenticate";
    pub const PUBLIC_IDENTIFIER: &str = "connext_publicIdentifier";
    pub const DEPOSIT: &str = "connext_deposit";
    pub const WITHDRAW: &str = "connext_withdraw";
    pub const BALANCE: &str = "connext_balance";
    pub const TRANSFER: &str = "connext_transfer";
    pub const TRANSACTION_HISTORY: &str = "connext_getTransactionHistory";
    pub const SUBSCRIBE: &str = "chan_subscribe";
    pub const UNSUBSCRIBE: &str = "chan_unsubscribe";
    pub const RESCIND_DEPOSIT_RIGHTS: &str = "chan_rescindDepositRights";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params: if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            },
        }
    }

    pub fn encode(&self) -> Result<String, PortError> {
        serde_json::to_string(self)
            .map_err(|e| PortError::Validation(format!("request serialization failed: {e}")))
    }
}

/// What a response carries once matched to its call.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(String),
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(String),
    Response { id: u64, body: ResponseBody },
    Push { subscription: String, data: Value },
}

/// Classifies one raw message from the frame. Anything that is neither an
/// event marker, a subscription push nor an id-carrying response is `None`.
pub fn decode_inbound(raw: &str) -> Option<Inbound> {
    if let Some(name) = raw.strip_prefix(EVENT_PREFIX) {
        return Some(Inbound::Event(name.to_owned()));
    }
    let payload: Value = serde_json::from_str(raw).ok()?;
    let obj = payload.as_object()?;

    if obj.get("method").and_then(Value::as_str) == Some(SUBSCRIPTION_METHOD) {
        let params = obj.get("params")?;
        let subscription = subscription_key(params.get("subscription")?)?;
        let data = params.get("data").cloned().unwrap_or(Value::Null);
        return Some(Inbound::Push { subscription, data });
    }

    let id = correlation_id(obj.get("id")?)?;
    let body = if let Some(result) = obj.get("result") {
        ResponseBody::Result(result.clone())
    } else if let Some(message) = obj
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        ResponseBody::Error(message.to_owned())
    } else {
        ResponseBody::Malformed
    };
    Some(Inbound::Response { id, body })
}

/// Subscription ids come back either as strings or numbers.
pub fn subscription_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn correlation_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Millisecond timestamp scaled by 1000 plus a random tie-breaker. Stays
/// below 2^53 until well past year 2200, so the iframe's JS side reads it
/// back exactly.
pub fn payload_id(now_ms: u64, tie_breaker: u16) -> u64 {
    now_ms
        .saturating_mul(1_000)
        .saturating_add(u64::from(tie_breaker % 1_000))
}

/// Uniform in `0..1000`. Draws at or above the largest multiple of 1000
/// below 2^16 are redrawn so the reduction carries no bias.
pub fn random_tie_breaker() -> u16 {
    const LIMIT: u16 = 64_000;
    loop {
        let mut buf = [0u8; 2];
        if let Err(e) = getrandom::getrandom(&mut buf) {
            tracing::warn!("entropy source unavailable, using zero tie-breaker: {e}");
            return 0;
        }
        let draw = u16::from_le_bytes(buf);
        if draw < LIMIT {
            return draw % 1_000;
        }
    }
}
