#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use connext_sdk::{ConnextSdk, SdkNotification};
use connext_sdk_adapters::{
    DeterministicAuth, HeadlessUi, LoopbackTransport, MemoryStore, ScriptedChain, ScriptedWallet,
    SdkConfig,
};
use connext_sdk_core::{ClockPort, PortError};

/// Shared-state clock: clones tick together, and sleeps end after a few
/// scheduler turns so deadlines fire once nothing else is queued.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<AtomicU64>,
    turns: Arc<AtomicU64>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self {
            now: Arc::new(AtomicU64::new(0)),
            turns: Arc::new(AtomicU64::new(3)),
        }
    }
}

impl TestClock {
    /// How many scheduler turns a sleep lasts.
    pub fn set_turns(&self, turns: u64) {
        self.turns.store(turns, Ordering::SeqCst);
    }
}

#[async_trait(?Send)]
impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + 1_739_750_400_000)
    }

    async fn sleep_ms(&self, _ms: u64) {
        for _ in 0..self.turns.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

pub type TestSdk = ConnextSdk<
    LoopbackTransport,
    DeterministicAuth,
    ScriptedChain,
    MemoryStore,
    TestClock,
    HeadlessUi,
>;

pub struct Harness {
    pub sdk: TestSdk,
    pub wallet: ScriptedWallet,
    pub transport: LoopbackTransport,
    pub chain: ScriptedChain,
    pub store: MemoryStore,
    pub auth: DeterministicAuth,
    pub ui: HeadlessUi,
    pub clock: TestClock,
    pub notifications: broadcast::Receiver<SdkNotification>,
}

pub fn harness() -> Harness {
    harness_with(DeterministicAuth::default(), MemoryStore::default())
}

pub fn harness_with(auth: DeterministicAuth, store: MemoryStore) -> Harness {
    let config = SdkConfig::default();
    let wallet = ScriptedWallet::default();
    let transport = LoopbackTransport::new(&config.iframe_src)
        .expect("loopback transport")
        .with_responder(wallet.responder())
        .expect("wallet responder");
    let chain = ScriptedChain::default();
    let ui = HeadlessUi::default();
    let clock = TestClock::default();
    let sdk = ConnextSdk::new(
        config,
        transport.clone(),
        auth.clone(),
        chain.clone(),
        store.clone(),
        clock.clone(),
        ui.clone(),
    )
    .expect("sdk");
    let notifications = sdk.subscribe();
    Harness {
        sdk,
        wallet,
        transport,
        chain,
        store,
        auth,
        ui,
        clock,
        notifications,
    }
}

/// Harness with a completed email login.
pub async fn logged_in() -> Harness {
    let h = harness();
    h.sdk.events().login("alice@example.com");
    h.sdk.login().await.expect("login");
    h
}

pub fn drain(rx: &mut broadcast::Receiver<SdkNotification>) -> Vec<SdkNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}
