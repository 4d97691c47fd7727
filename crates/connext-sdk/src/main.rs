//! connext-sdk-demo: drives login, deposit, transfer and withdraw against an
//! in-process wallet so the SDK flows can be watched from a terminal.

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    demo::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {
    connext_sdk::init_browser_logging();
}

#[cfg(not(target_arch = "wasm32"))]
mod demo {
    use alloy::primitives::U256;
    use tracing::info;

    use connext_sdk::ConnextSdk;
    use connext_sdk_adapters::{
        DeterministicAuth, HeadlessUi, LoopbackTransport, MemoryStore, ScriptedChain,
        ScriptedWallet, SdkConfig, SystemClockAdapter,
    };

    const RECIPIENT: &str = "indra8AXWmo3dFpK1drnjeWPyi9KTy9Fy3SkCydWx8waQrxhnW4KPmR";

    pub async fn run() -> eyre::Result<()> {
        // Initialize logging
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();

        info!("Starting connext-sdk-demo {}", connext_sdk::build_info());

        let config = SdkConfig::from_env()?;
        let wallet = ScriptedWallet::default();
        let transport =
            LoopbackTransport::new(&config.iframe_src)?.with_responder(wallet.responder())?;
        let chain = ScriptedChain::default();
        let ui = HeadlessUi::default();
        let sdk = ConnextSdk::new(
            config.clone(),
            transport,
            DeterministicAuth::default(),
            chain.clone(),
            MemoryStore::default(),
            SystemClockAdapter,
            ui.clone(),
        )?;
        let mut notifications = sdk.subscribe();
        let events = sdk.events();

        // The overlay would produce this once the user types an email.
        events.login("demo@connext.network");
        let identity = sdk.login().await?;
        info!(
            public_identifier = identity.public_identifier.as_deref().unwrap_or("-"),
            multisig = ?identity.multisig_address,
            "logged in"
        );

        sdk.deposit().await?;
        info!(screen = ?ui.screen(), "deposit address shown, funding multisig");
        chain.set_token_balance(
            wallet.multisig_address(),
            config.asset_id,
            U256::from(1_000_000u64),
        );
        chain.mine_block();
        sdk.pump_events().await?;

        wallet.set_balance(U256::from(1_000_000u64));
        info!(balance = %sdk.balance().await?, "channel balance");

        let transferred = sdk.transfer(RECIPIENT, "250000").await?;
        info!(transferred, "transfer done");

        events.withdraw("0x000000000000000000000000000000000000dEaD", "100000");
        let receipt = sdk.withdraw().await?;
        info!(%receipt, "withdraw done");

        for tx in sdk.transaction_history().await? {
            info!(recipient = %tx.recipient, amount = %tx.amount, "history");
        }
        while let Ok(notification) = notifications.try_recv() {
            info!(?notification, "notification");
        }

        sdk.logout().await?;
        info!("demo finished");
        Ok(())
    }
}
