use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use serde_json::Value;

use connext_sdk_core::{methods, ConnextTransaction, JsonRpcRequest};

use crate::loopback::Responder;

/// Deterministic wallet app that answers the iframe protocol in-process.
#[derive(Debug, Clone)]
pub struct ScriptedWallet {
    state: Arc<Mutex<WalletState>>,
}

#[derive(Debug)]
struct WalletState {
    authenticated: bool,
    public_identifier: String,
    multisig_address: Address,
    signer_address: Address,
    balance: U256,
    history: Vec<ConnextTransaction>,
    next_subscription: u64,
    failures: HashMap<String, String>,
    silent: Vec<String>,
    calls: Vec<String>,
}

impl Default for ScriptedWallet {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(WalletState {
                authenticated: false,
                public_identifier: "indra6LkSoBv5QiAuMBcZ1bKRT8eFnjmhHYpL3LpyNgNHbTUUwyCmR"
                    .to_owned(),
                multisig_address: Address::repeat_byte(0x4d),
                signer_address: Address::repeat_byte(0x51),
                balance: U256::ZERO,
                history: Vec::new(),
                next_subscription: 1,
                failures: HashMap::new(),
                silent: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }
}

impl ScriptedWallet {
    pub fn responder(&self) -> Responder {
        let wallet = self.clone();
        Arc::new(move |request: &JsonRpcRequest| wallet.answer(request))
    }

    pub fn multisig_address(&self) -> Address {
        self.state
            .lock()
            .map(|g| g.multisig_address)
            .unwrap_or(Address::ZERO)
    }

    pub fn set_balance(&self, balance: U256) {
        if let Ok(mut g) = self.state.lock() {
            g.balance = balance;
        }
    }

    /// Makes every call to `method` answer with an error message.
    pub fn fail_method(&self, method: &str, message: &str) {
        if let Ok(mut g) = self.state.lock() {
            g.failures.insert(method.to_owned(), message.to_owned());
        }
    }

    /// Makes `method` go unanswered.
    pub fn ignore_method(&self, method: &str) {
        if let Ok(mut g) = self.state.lock() {
            g.silent.push(method.to_owned());
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|g| g.calls.clone())
            .unwrap_or_default()
    }

    pub fn answer(&self, request: &JsonRpcRequest) -> Vec<String> {
        let Ok(mut g) = self.state.lock() else {
            return Vec::new();
        };
        g.calls.push(request.method.clone());
        if g.silent.contains(&request.method) {
            return Vec::new();
        }
        let outcome = match g.failures.get(&request.method) {
            Some(message) => Err(message.clone()),
            None => g.handle(request),
        };
        let reply = match outcome {
            Ok(result) => serde_json::json!({ "id": request.id, "result": result }),
            Err(message) => serde_json::json!({ "id": request.id, "error": { "message": message } }),
        };
        vec![reply.to_string()]
    }
}

impl WalletState {
    fn handle(&mut self, request: &JsonRpcRequest) -> Result<Value, String> {
        let params = &request.params;
        if request.method == methods::AUTHENTICATE {
            let signature = params.get("signature").and_then(Value::as_str).unwrap_or_default();
            if signature.is_empty() {
                return Err("missing authentication signature".to_owned());
            }
            self.authenticated = true;
            return Ok(serde_json::json!({
                "publicIdentifier": self.public_identifier,
                "multisigAddress": self.multisig_address,
                "signerAddress": self.signer_address,
            }));
        }
        if !self.authenticated {
            return Err("Channel provider not initialized within iframe app - ensure that connext_authenticate is called before any other commands".to_owned());
        }

        match request.method.as_str() {
            methods::PUBLIC_IDENTIFIER => Ok(Value::String(self.public_identifier.clone())),
            methods::DEPOSIT => Ok(serde_json::json!({ "multisigAddress": self.multisig_address })),
            methods::RESCIND_DEPOSIT_RIGHTS => Ok(serde_json::json!({})),
            methods::BALANCE => Ok(serde_json::json!({ "balance": self.balance.to_string() })),
            methods::WITHDRAW | methods::TRANSFER => {
                let amount = params
                    .get("amount")
                    .and_then(Value::as_str)
                    .and_then(|raw| raw.parse::<U256>().ok())
                    .ok_or_else(|| "invalid amount".to_owned())?;
                let recipient = params
                    .get("recipient")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "missing recipient".to_owned())?
                    .to_owned();
                self.balance = self
                    .balance
                    .checked_sub(amount)
                    .ok_or_else(|| "insufficient funds".to_owned())?;
                self.history.push(ConnextTransaction {
                    recipient,
                    amount: amount.to_string(),
                    timestamp: format!("{}", request.id / 1_000),
                });
                if request.method == methods::TRANSFER {
                    Ok(serde_json::json!({}))
                } else {
                    Ok(serde_json::json!({ "transactionHash": format!("0x{:064x}", request.id) }))
                }
            }
            methods::TRANSACTION_HISTORY => {
                serde_json::to_value(&self.history).map_err(|e| e.to_string())
            }
            methods::SUBSCRIBE => {
                let id = self.next_subscription;
                self.next_subscription += 1;
                Ok(Value::String(format!("0x{id:x}")))
            }
            methods::UNSUBSCRIBE => Ok(Value::Bool(true)),
            other => Err(format!("unknown method {other}")),
        }
    }
}
