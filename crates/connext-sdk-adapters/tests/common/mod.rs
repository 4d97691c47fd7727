#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use connext_sdk_adapters::{LoopbackTransport, MemoryStore, ScriptedChain, ScriptedWallet};
use connext_sdk_core::{
    BlockNotifier, ChannelProvider, ClockPort, DepositController, PortError, RpcConnection,
};

pub const FRAME_SRC: &str = "http://localhost:3030/wallet";
pub const FRAME_ORIGIN: &str = "http://localhost:3030";

/// Monotonic clock whose sleeps end after a couple of scheduler turns, so
/// deadlines fire as soon as nothing else can make progress.
#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
    slept_ms: AtomicU64,
}

impl TestClock {
    pub fn slept_ms(&self) -> u64 {
        self.slept_ms.load(Ordering::SeqCst)
    }
}

#[async_trait(?Send)]
impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, PortError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + 1_739_750_400_000)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.slept_ms.fetch_add(ms, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
    }
}

pub type TestConnection = RpcConnection<LoopbackTransport, TestClock>;
pub type TestProvider = ChannelProvider<LoopbackTransport, TestClock>;

pub fn bare_transport() -> LoopbackTransport {
    LoopbackTransport::new(FRAME_SRC).expect("loopback transport")
}

pub fn connection(transport: &LoopbackTransport) -> TestConnection {
    RpcConnection::new(transport.clone(), TestClock::default())
}

pub async fn open_connection(transport: &LoopbackTransport) -> TestConnection {
    let conn = connection(transport);
    conn.open().await.expect("open connection");
    conn
}

pub fn wallet_transport(wallet: &ScriptedWallet) -> LoopbackTransport {
    bare_transport()
        .with_responder(wallet.responder())
        .expect("attach wallet responder")
}

/// Provider over the scripted wallet, already enabled and authenticated.
pub async fn logged_in_provider(wallet: &ScriptedWallet) -> (TestProvider, LoopbackTransport) {
    let transport = wallet_transport(wallet);
    let provider = ChannelProvider::iframe(connection(&transport));
    provider.enable().await.expect("enable provider");
    provider
        .authenticate("0xsigned", "rinkeby")
        .await
        .expect("authenticate");
    (provider, transport)
}

pub fn asset() -> Address {
    "0x000000000000000000000000000000000000A55E"
        .parse()
        .expect("valid asset address")
}

pub fn units(raw: u64) -> U256 {
    U256::from(raw)
}

/// Notifier that records block numbers for the test to feed back in.
pub fn recording_notifier() -> (BlockNotifier, Arc<std::sync::Mutex<Vec<u64>>>) {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let notifier: BlockNotifier = Arc::new(move |block| {
        if let Ok(mut g) = sink.lock() {
            g.push(block);
        }
    });
    (notifier, seen)
}

pub fn controller(
    chain: &ScriptedChain,
    store: &MemoryStore,
    notifier: BlockNotifier,
) -> DepositController<ScriptedChain, MemoryStore> {
    DepositController::new(chain.clone(), store.clone(), asset(), notifier)
}
