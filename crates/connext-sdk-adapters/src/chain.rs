use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alloy::primitives::{hex, Address, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::debug;

use connext_sdk_core::{BlockNotifier, ChainPort, PortError};

use crate::config::SdkConfig;

/// In-memory chain with settable balances and manually mined blocks.
#[derive(Clone, Default)]
pub struct ScriptedChain {
    state: Arc<Mutex<ChainState>>,
}

#[derive(Default)]
struct ChainState {
    block: u64,
    tokens: HashMap<(Address, Address), U256>,
    native: HashMap<Address, U256>,
    notifier: Option<BlockNotifier>,
    watch_calls: usize,
    unwatch_calls: usize,
    read_failure: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl std::fmt::Debug for ScriptedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedChain")
            .field("block", &self.block_number())
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl ScriptedChain {
    pub fn set_token_balance(&self, owner: Address, asset_id: Address, amount: U256) {
        if let Ok(mut g) = self.state.lock() {
            g.tokens.insert((owner, asset_id), amount);
        }
    }

    pub fn set_native_balance(&self, owner: Address, amount: U256) {
        if let Ok(mut g) = self.state.lock() {
            g.native.insert(owner, amount);
        }
    }

    /// Makes balance reads fail until cleared with `None`.
    pub fn fail_reads(&self, message: Option<&str>) {
        if let Ok(mut g) = self.state.lock() {
            g.read_failure = message.map(str::to_owned);
        }
    }

    /// Advances one block and notifies the watcher, if any. Returns whether
    /// someone was listening.
    pub fn mine_block(&self) -> bool {
        let (block, notifier) = {
            let Ok(mut g) = self.state.lock() else {
                return false;
            };
            g.block += 1;
            (g.block, g.notifier.clone())
        };
        match notifier {
            Some(notify) => {
                notify(block);
                true
            }
            None => false,
        }
    }

    /// Turns the chain into a polled source: every head poll mines a block.
    pub fn poll_every(&self, interval_ms: Option<u64>) {
        if let Ok(mut g) = self.state.lock() {
            g.poll_interval_ms = interval_ms;
        }
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().map(|g| g.block).unwrap_or(0)
    }

    pub fn is_watching(&self) -> bool {
        self.state
            .lock()
            .map(|g| g.notifier.is_some())
            .unwrap_or(false)
    }

    pub fn watch_calls(&self) -> usize {
        self.state.lock().map(|g| g.watch_calls).unwrap_or(0)
    }

    pub fn unwatch_calls(&self) -> usize {
        self.state.lock().map(|g| g.unwatch_calls).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("chain lock poisoned: {e}")))
    }

    fn check_reads(g: &ChainState) -> Result<(), PortError> {
        match &g.read_failure {
            Some(message) => Err(PortError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl ChainPort for ScriptedChain {
    async fn token_balance(&self, owner: Address, asset_id: Address) -> Result<U256, PortError> {
        let g = self.lock()?;
        Self::check_reads(&g)?;
        Ok(g.tokens.get(&(owner, asset_id)).copied().unwrap_or_default())
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, PortError> {
        let g = self.lock()?;
        Self::check_reads(&g)?;
        Ok(g.native.get(&owner).copied().unwrap_or_default())
    }

    fn watch_blocks(&self, notifier: BlockNotifier) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.notifier = Some(notifier);
        g.watch_calls += 1;
        Ok(())
    }

    fn unwatch_blocks(&self) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.notifier = None;
        g.unwatch_calls += 1;
        Ok(())
    }

    fn poll_interval_ms(&self) -> Option<u64> {
        self.state.lock().ok().and_then(|g| g.poll_interval_ms)
    }

    async fn poll_head(&self) -> Result<(), PortError> {
        self.mine_block();
        Ok(())
    }
}

alloy::sol! {
    function balanceOf(address owner) external view returns (uint256 balance);
}

/// Reads balances from an Ethereum JSON-RPC endpoint. HTTP has no push
/// channel for new heads, so the SDK event loop polls [`Self::poll`] every
/// `poll_interval_ms` and the watcher hears about each new block number.
#[derive(Debug, Clone)]
pub struct RpcChainAdapter {
    url: String,
    client: reqwest::Client,
    poll_interval_ms: u64,
    watch: Arc<Mutex<RpcWatch>>,
}

#[derive(Default)]
struct RpcWatch {
    notifier: Option<BlockNotifier>,
    last_block: Option<u64>,
}

impl std::fmt::Debug for RpcWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcWatch")
            .field("watching", &self.notifier.is_some())
            .field("last_block", &self.last_block)
            .finish()
    }
}

impl RpcChainAdapter {
    /// `timeout_ms` bounds each request natively; browser fetches carry no
    /// client-side timeout.
    pub fn new(url: &str, timeout_ms: u64, poll_interval_ms: u64) -> Result<Self, PortError> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(std::time::Duration::from_millis(timeout_ms));
        #[cfg(target_arch = "wasm32")]
        let _ = timeout_ms;
        let client = builder
            .build()
            .map_err(|e| PortError::Transport(format!("failed to build eth rpc client: {e}")))?;
        Ok(Self {
            url: url.to_owned(),
            client,
            poll_interval_ms,
            watch: Arc::new(Mutex::new(RpcWatch::default())),
        })
    }

    pub fn from_config(config: &SdkConfig) -> Result<Self, PortError> {
        let url = config.eth_provider_url.as_deref().ok_or_else(|| {
            PortError::Validation("eth provider url is not configured".to_owned())
        })?;
        Self::new(url, config.eth_timeout_ms, config.block_poll_interval_ms)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .map(|g| g.notifier.is_some())
            .unwrap_or(false)
    }

    /// Fetches the head block and notifies the watcher when it advanced.
    /// Nothing is fetched while no watcher is attached.
    pub async fn poll(&self) -> Result<Option<u64>, PortError> {
        if !self.is_watching() {
            return Ok(None);
        }
        let head = self.block_number().await?;
        let notifier = {
            let mut g = self.lock()?;
            let advanced = g.last_block.map_or(true, |last| head > last);
            g.last_block = Some(head);
            if advanced {
                g.notifier.clone()
            } else {
                None
            }
        };
        Ok(notifier.map(|notify| {
            debug!(block = head, "new head");
            notify(head);
            head
        }))
    }

    pub async fn block_number(&self) -> Result<u64, PortError> {
        let result = self.call("eth_blockNumber", serde_json::json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| PortError::Transport("eth_blockNumber must return hex".to_owned()))?;
        u64::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| PortError::Validation(format!("invalid block number {raw}: {e}")))
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, PortError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PortError::Transport(format!("eth rpc {method} failed: {e}")))?;
        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PortError::Transport(format!("eth rpc json decode failed: {e}")))?;
        if !status.is_success() {
            return Err(PortError::Transport(format!(
                "eth rpc status {status}: {body}"
            )));
        }
        if let Some(err) = body.get("error") {
            return Err(PortError::Remote(format!("eth rpc {method} error: {err}")));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| PortError::Protocol {
                method: method.to_owned(),
            })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RpcWatch>, PortError> {
        self.watch
            .lock()
            .map_err(|e| PortError::Transport(format!("eth rpc watch lock poisoned: {e}")))
    }
}

fn parse_quantity(method: &str, value: &serde_json::Value) -> Result<U256, PortError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PortError::Transport(format!("{method} must return hex")))?;
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| PortError::Validation(format!("invalid {method} quantity {raw}: {e}")))
}

/// Decodes an `eth_call` answer to `balanceOf`. A bare `0x` means there is
/// no contract at the asset address and reads as zero.
fn decode_balance_of(value: &serde_json::Value) -> Result<U256, PortError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PortError::Transport("eth_call must return hex".to_owned()))?;
    let data = hex::decode(raw)
        .map_err(|e| PortError::Validation(format!("invalid eth_call data {raw}: {e}")))?;
    if data.is_empty() {
        return Ok(U256::ZERO);
    }
    balanceOfCall::abi_decode_returns(&data, true)
        .map(|ret| ret.balance)
        .map_err(|e| PortError::Validation(format!("invalid balanceOf return {raw}: {e}")))
}

#[async_trait(?Send)]
impl ChainPort for RpcChainAdapter {
    async fn token_balance(&self, owner: Address, asset_id: Address) -> Result<U256, PortError> {
        if asset_id == Address::ZERO {
            return self.native_balance(owner).await;
        }
        let call = serde_json::json!({
            "to": asset_id,
            "data": hex::encode_prefixed(balanceOfCall { owner }.abi_encode()),
        });
        let result = self
            .call("eth_call", serde_json::json!([call, "latest"]))
            .await?;
        decode_balance_of(&result)
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, PortError> {
        let result = self
            .call("eth_getBalance", serde_json::json!([owner, "latest"]))
            .await?;
        parse_quantity("eth_getBalance", &result)
    }

    fn watch_blocks(&self, notifier: BlockNotifier) -> Result<(), PortError> {
        self.lock()?.notifier = Some(notifier);
        Ok(())
    }

    fn unwatch_blocks(&self) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.notifier = None;
        g.last_block = None;
        Ok(())
    }

    fn poll_interval_ms(&self) -> Option<u64> {
        Some(self.poll_interval_ms)
    }

    async fn poll_head(&self) -> Result<(), PortError> {
        self.poll().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_decode_from_hex() {
        let v = serde_json::json!("0x0de0b6b3a7640000");
        assert_eq!(
            parse_quantity("eth_getBalance", &v).expect("quantity"),
            U256::from(1_000_000_000_000_000_000u64)
        );
        assert_eq!(
            parse_quantity("eth_call", &serde_json::json!("0x")).expect("empty"),
            U256::ZERO
        );
    }

    #[test]
    fn balance_of_is_abi_encoded() {
        let owner = Address::repeat_byte(0x4d);
        let data = balanceOfCall { owner }.abi_encode();
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&data[16..], owner.as_slice());
    }

    #[test]
    fn balance_of_answers_decode() {
        let word = format!("0x{:064x}", 1_500u64);
        assert_eq!(
            decode_balance_of(&serde_json::json!(word)).expect("balance"),
            U256::from(1_500u64)
        );
        assert_eq!(
            decode_balance_of(&serde_json::json!("0x")).expect("no contract"),
            U256::ZERO
        );
        assert!(decode_balance_of(&serde_json::json!("0x1234")).is_err());
    }
}
