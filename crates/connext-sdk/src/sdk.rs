use std::pin::pin;
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use futures::future::{self, select, Either};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use connext_sdk_adapters::SdkConfig;
use connext_sdk_core::{
    methods, parse_base_units, AuthPort, BlockNotifier, ChainPort, ChannelIdentity, ChannelPort,
    ChannelProvider, ClockPort, ConnextTransaction, DepositController, DepositOutcome, FlowStage,
    FrameTransport, KeyValueStore, PortError, RpcConnection, UiPort,
};

use crate::error::SdkError;
use crate::events::{EventSender, SdkEvent, SdkNotification};

/// Message the auth provider signs to prove account ownership to the wallet.
pub const AUTHENTICATION_MESSAGE: &str = "Connext Login";

const NOTIFICATION_CAPACITY: usize = 64;

/// Flows that block on user input from the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Login,
    Withdraw,
}

impl Flow {
    fn name(self) -> &'static str {
        match self {
            Flow::Login => "login",
            Flow::Withdraw => "withdraw",
        }
    }

    fn wants(self, event: &SdkEvent) -> bool {
        matches!(
            (self, event),
            (Flow::Login, SdkEvent::LoginSubmitted { .. })
                | (Flow::Withdraw, SdkEvent::WithdrawSubmitted { .. })
                | (_, SdkEvent::Closed)
        )
    }
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    flow: Flow,
    tx: oneshot::Sender<SdkEvent>,
}

/// Flows currently blocked on input. Whoever drains the inbound queue hands
/// matching events over through the waiter's oneshot.
#[derive(Debug, Default)]
struct FlowWaiters {
    next_id: u64,
    waiting: Vec<Waiter>,
}

/// Unregisters a waiter when its flow finishes or is dropped mid-wait.
struct WaiterRegistration<'a> {
    waiters: &'a Mutex<FlowWaiters>,
    id: u64,
}

impl WaiterRegistration<'_> {
    fn is_pending(&self) -> bool {
        self.waiters
            .lock()
            .map(|g| g.waiting.iter().any(|w| w.id == self.id))
            .unwrap_or(false)
    }
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        if let Ok(mut g) = self.waiters.lock() {
            g.waiting.retain(|w| w.id != self.id);
        }
    }
}

/// Host-facing entry point. Owns the channel provider, the deposit watcher
/// and the overlay; user input and new blocks reach it through one inbound
/// queue (see [`EventSender`]).
pub struct ConnextSdk<T, A, B, S, C, U>
where
    T: FrameTransport,
    A: AuthPort,
    B: ChainPort,
    S: KeyValueStore,
    C: ClockPort,
    U: UiPort,
{
    config: SdkConfig,
    provider: ChannelProvider<T, C>,
    deposits: DepositController<B, S>,
    auth: A,
    ui: U,
    clock: C,
    events: EventSender,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<SdkEvent>>,
    notifications: broadcast::Sender<SdkNotification>,
    waiters: Mutex<FlowWaiters>,
    initialized: Mutex<bool>,
}

impl<T, A, B, S, C, U> ConnextSdk<T, A, B, S, C, U>
where
    T: FrameTransport,
    A: AuthPort,
    B: ChainPort,
    S: KeyValueStore,
    C: ClockPort,
    U: UiPort,
{
    /// SDK talking to the wallet through an iframe rendered by `transport`.
    pub fn new(
        config: SdkConfig,
        transport: T,
        auth: A,
        chain: B,
        store: S,
        clock: C,
        ui: U,
    ) -> Result<Self, SdkError>
    where
        C: Clone,
    {
        let connection = RpcConnection::new(transport, clock.clone())
            .with_close_timeout_ms(config.close_timeout_ms);
        Self::with_provider(
            config,
            ChannelProvider::iframe(connection),
            auth,
            chain,
            store,
            clock,
            ui,
        )
    }

    /// Like [`Self::new`], for overlays that need the event queue at
    /// construction: `make_ui` receives the sender its buttons push into.
    pub fn new_with_ui(
        config: SdkConfig,
        transport: T,
        auth: A,
        chain: B,
        store: S,
        clock: C,
        make_ui: impl FnOnce(EventSender) -> U,
    ) -> Result<Self, SdkError>
    where
        C: Clone,
    {
        let connection = RpcConnection::new(transport, clock.clone())
            .with_close_timeout_ms(config.close_timeout_ms);
        Self::assemble(
            config,
            ChannelProvider::iframe(connection),
            auth,
            chain,
            store,
            clock,
            make_ui,
        )
    }

    /// SDK over an already built provider, iframe-backed or direct.
    pub fn with_provider(
        config: SdkConfig,
        provider: ChannelProvider<T, C>,
        auth: A,
        chain: B,
        store: S,
        clock: C,
        ui: U,
    ) -> Result<Self, SdkError> {
        Self::assemble(config, provider, auth, chain, store, clock, |_| ui)
    }

    fn assemble(
        config: SdkConfig,
        provider: ChannelProvider<T, C>,
        auth: A,
        chain: B,
        store: S,
        clock: C,
        make_ui: impl FnOnce(EventSender) -> U,
    ) -> Result<Self, SdkError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);
        let ui = make_ui(events.clone());
        let block_events = events.clone();
        let notifier: BlockNotifier = Arc::new(move |block| block_events.new_block(block));
        let deposits = DepositController::new(chain, store, config.asset_id, notifier)
            .with_storage_key(config.storage_key.clone());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Self {
            config,
            provider,
            deposits,
            auth,
            ui,
            clock,
            events,
            inbound: AsyncMutex::new(rx),
            notifications,
            waiters: Mutex::new(FlowWaiters::default()),
            initialized: Mutex::new(false),
        })
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn provider(&self) -> &ChannelProvider<T, C> {
        &self.provider
    }

    pub fn deposits(&self) -> &DepositController<B, S> {
        &self.deposits
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// Handle for the UI layer and block sources to push input.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkNotification> {
        self.notifications.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.lock().map(|g| *g).unwrap_or(false)
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_initialized() && self.provider.multisig_address().is_some()
    }

    /// Mounts the overlay and opens the provider. Repeated calls are no-ops.
    pub async fn init(&self) -> Result<(), SdkError> {
        if self.is_initialized() {
            return Ok(());
        }
        self.ui.mount()?;
        self.provider.enable().await?;
        self.set_initialized(true)?;
        info!(kind = ?self.provider.kind(), "sdk initialized");
        Ok(())
    }

    /// Logs in through the auth provider (prompting for an email unless a
    /// session exists), authenticates the channel and resumes any deposit
    /// watch left over from a previous page load.
    pub async fn login(&self) -> Result<ChannelIdentity, SdkError> {
        self.init().await?;

        if !self.auth.is_logged_in().await? {
            self.ui.show_login();
            self.ui.set_login_stage(FlowStage::Idle);
            let email = match self.await_login_email().await {
                Ok(email) => email,
                Err(e) => {
                    self.ui.set_login_stage(FlowStage::Failure);
                    return Err(e);
                }
            };
            self.ui.set_login_stage(FlowStage::Pending);
            if let Err(e) = self.auth.login_with_email(&email).await {
                warn!("email login failed: {e}");
                self.ui.set_login_stage(FlowStage::Failure);
                return Err(e.into());
            }
            self.ui.set_login_stage(FlowStage::Success);
        }

        let identity = self.authenticate_channel().await?;
        self.notify(SdkNotification::LoginSuccess {
            public_identifier: identity.public_identifier.clone(),
        });

        match self.deposits.check_deposit_subscription(&self.provider).await {
            Ok(Some(outcome)) => self.report_deposit(outcome),
            Ok(None) => {}
            Err(e) => warn!("could not re-check pending deposit after login: {e}"),
        }
        Ok(identity)
    }

    /// Tears everything down: the deposit watch and its record, the
    /// provider and the overlay. Every step runs; the first error is
    /// returned.
    pub async fn logout(&self) -> Result<(), SdkError> {
        let mut first_error: Option<SdkError> = None;
        if let Err(e) = self.deposits.cancel_watch().await {
            warn!("cancelling deposit watch on logout failed: {e}");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.provider.close().await {
            warn!("closing provider on logout failed: {e}");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.ui.unmount() {
            warn!("unmounting overlay on logout failed: {e}");
            first_error.get_or_insert(e.into());
        }
        self.set_initialized(false)?;
        info!("logged out");
        first_error.map_or(Ok(()), Err)
    }

    pub fn public_identifier(&self) -> Result<String, SdkError> {
        self.provider
            .public_identifier()
            .ok_or(SdkError::NotInitialized("publicIdentifier"))
    }

    pub async fn refresh_public_identifier(&self) -> Result<String, SdkError> {
        self.require_login("publicIdentifier")?;
        Ok(self.provider.refresh_public_identifier().await?)
    }

    /// Shows the deposit address and starts watching for funds. Completion
    /// arrives later as a [`SdkNotification`] once a new block shows the
    /// balance went up.
    pub async fn deposit(&self) -> Result<(), SdkError> {
        let multisig = self.require_login("deposit")?;
        if self.deposits.subscribed().await? {
            return Err(SdkError::DepositInProgress);
        }

        self.ui.show_deposit(multisig);
        self.ui.set_deposit_stage(FlowStage::Pending);
        let started = match self.deposits.request_deposit_rights(&self.provider).await {
            Ok(()) => self.deposits.subscribe_to_deposit(&self.provider).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            warn!("deposit setup failed: {e}");
            self.ui.set_deposit_stage(FlowStage::Failure);
            return Err(e.into());
        }
        Ok(())
    }

    /// Shows the withdraw form, waits for the user to submit it and sends
    /// the withdrawal. Returns the wallet's answer.
    pub async fn withdraw(&self) -> Result<Value, SdkError> {
        self.require_login("withdraw")?;
        self.ui.show_withdraw();
        self.ui.set_withdraw_stage(FlowStage::Idle);
        let (recipient, amount) = self
            .wait_for(Flow::Withdraw, |event| match event {
                SdkEvent::WithdrawSubmitted { recipient, amount } => Ok((recipient, amount)),
                other => Err(other),
            })
            .await?;

        self.ui.set_withdraw_stage(FlowStage::Pending);
        let sent = match parse_base_units(&amount) {
            Ok(_) => {
                self.provider
                    .send(
                        methods::WITHDRAW,
                        serde_json::json!({
                            "recipient": recipient,
                            "amount": amount,
                            "assetId": self.config.asset_id,
                        }),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        match sent {
            Ok(result) => {
                info!(%recipient, %amount, "withdraw sent");
                self.ui.set_withdraw_stage(FlowStage::Success);
                self.notify(SdkNotification::WithdrawSuccess {
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                warn!(%recipient, %amount, "withdraw failed: {e}");
                self.ui.set_withdraw_stage(FlowStage::Failure);
                self.notify(SdkNotification::WithdrawFailure {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Off-chain channel balance in base units.
    pub async fn balance(&self) -> Result<String, SdkError> {
        self.require_login("balance")?;
        let result = self
            .provider
            .send(
                methods::BALANCE,
                serde_json::json!({ "assetId": self.config.asset_id }),
            )
            .await?;
        let balance = match result.get("balance").unwrap_or(&result) {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => {
                return Err(PortError::Protocol {
                    method: methods::BALANCE.to_owned(),
                }
                .into())
            }
        };
        Ok(balance)
    }

    /// Sends `amount` to another channel. True when the wallet answers with
    /// an empty object.
    pub async fn transfer(&self, recipient: &str, amount: &str) -> Result<bool, SdkError> {
        self.require_login("transfer")?;
        parse_base_units(amount)?;
        let result = self
            .provider
            .send(
                methods::TRANSFER,
                serde_json::json!({
                    "recipient": recipient,
                    "amount": amount,
                    "assetId": self.config.asset_id,
                }),
            )
            .await?;
        debug!(%recipient, %amount, ?result, "transfer answered");
        Ok(result.as_object().is_some_and(|o| o.is_empty()))
    }

    pub async fn transaction_history(&self) -> Result<Vec<ConnextTransaction>, SdkError> {
        self.require_login("getTransactionHistory")?;
        let result = self
            .provider
            .send(methods::TRANSACTION_HISTORY, serde_json::json!({}))
            .await?;
        serde_json::from_value(result).map_err(|_| {
            SdkError::from(PortError::Protocol {
                method: methods::TRANSACTION_HISTORY.to_owned(),
            })
        })
    }

    /// Handles every event already queued without waiting for more.
    /// Returns how many were handled.
    pub async fn pump_events(&self) -> Result<usize, SdkError> {
        let mut handled = 0;
        loop {
            let event = match self.inbound.lock().await.try_recv() {
                Ok(event) => event,
                Err(_) => break,
            };
            self.dispatch(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handles events as they arrive until the overlay is closed. Form
    /// submissions go to the flow waiting for them, and chains without
    /// push notifications get their head polled. Errors are logged and the
    /// loop keeps going.
    pub async fn run(&self) {
        while let Some(event) = self.next_input().await {
            let closed = event == SdkEvent::Closed;
            if let Err(e) = self.dispatch(event).await {
                warn!("event handling failed: {e}");
            }
            if closed {
                debug!("event loop stopped by overlay close");
                return;
            }
        }
    }

    /// Next queued event, polling the chain head in the meantime when the
    /// chain asks for it.
    async fn next_input(&self) -> Option<SdkEvent> {
        let chain = self.deposits.chain();
        let Some(interval_ms) = chain.poll_interval_ms() else {
            return self.next_event().await;
        };
        loop {
            let next = pin!(self.next_event());
            match select(next, pin!(self.clock.sleep_ms(interval_ms))).await {
                Either::Left((event, _)) => return event,
                Either::Right(((), _)) => {
                    if let Err(e) = chain.poll_head().await {
                        warn!("chain head poll failed: {e}");
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: SdkEvent) -> Result<(), SdkError> {
        let Some(event) = self.hand_to_waiter(event)? else {
            return Ok(());
        };
        match event {
            SdkEvent::NewBlock(block) => {
                if let Some(outcome) = self.deposits.on_new_block(&self.provider, block).await? {
                    self.report_deposit(outcome);
                }
            }
            SdkEvent::Closed => debug!("overlay closed"),
            other => debug!(event = ?other, "no flow waiting for input, dropped"),
        }
        Ok(())
    }

    async fn await_login_email(&self) -> Result<String, SdkError> {
        let timeout_ms = self.config.login_timeout_ms;
        let wait = pin!(self.wait_for(Flow::Login, |event| match event {
            SdkEvent::LoginSubmitted { email } => Ok(email),
            other => Err(other),
        }));
        match select(wait, self.clock.sleep_ms(timeout_ms)).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => {
                warn!(timeout_ms, "no email submitted before the login deadline");
                Err(SdkError::LoginTimeout {
                    after_ms: timeout_ms,
                })
            }
        }
    }

    /// Waits for the overlay input `flow` needs. The input arrives through
    /// a registered waiter, so it reaches this flow whether it drains the
    /// queue itself or [`Self::run`] does. While draining, other events are
    /// dispatched normally so deposits keep progressing.
    async fn wait_for<R>(
        &self,
        flow: Flow,
        accept: impl FnOnce(SdkEvent) -> Result<R, SdkEvent>,
    ) -> Result<R, SdkError> {
        let (rx, registration) = self.register_waiter(flow)?;
        let drain = pin!(async {
            while registration.is_pending() {
                let Some(event) = self.next_event().await else {
                    return;
                };
                if let Err(e) = self.dispatch(event).await {
                    warn!(
                        flow = flow.name(),
                        "event handling failed while waiting for input: {e}"
                    );
                }
            }
            // Our input was handed over; stop draining so later events stay
            // queued for whoever runs the loop.
            future::pending::<()>().await
        });
        let event = match select(rx, drain).await {
            Either::Left((Ok(event), _)) => event,
            Either::Left((Err(_), _)) | Either::Right(((), _)) => {
                return Err(cancelled(flow.name()))
            }
        };
        accept(event).map_err(|other| {
            info!(flow = flow.name(), event = ?other, "overlay closed before submission");
            cancelled(flow.name())
        })
    }

    fn register_waiter(
        &self,
        flow: Flow,
    ) -> Result<(oneshot::Receiver<SdkEvent>, WaiterRegistration<'_>), SdkError> {
        let (tx, rx) = oneshot::channel();
        let mut g = self.waiters_guard()?;
        g.next_id += 1;
        let id = g.next_id;
        g.waiting.push(Waiter { id, flow, tx });
        Ok((
            rx,
            WaiterRegistration {
                waiters: &self.waiters,
                id,
            },
        ))
    }

    /// Passes flow input to the flow waiting for it. `Closed` goes to every
    /// waiting flow. Returns the event when nobody took it.
    fn hand_to_waiter(&self, event: SdkEvent) -> Result<Option<SdkEvent>, SdkError> {
        let mut g = self.waiters_guard()?;
        if event == SdkEvent::Closed {
            let waiting = std::mem::take(&mut g.waiting);
            if waiting.is_empty() {
                return Ok(Some(event));
            }
            for waiter in waiting {
                let _ = waiter.tx.send(SdkEvent::Closed);
            }
            return Ok(None);
        }

        let mut event = event;
        while let Some(pos) = g.waiting.iter().position(|w| w.flow.wants(&event)) {
            let waiter = g.waiting.remove(pos);
            match waiter.tx.send(event) {
                Ok(()) => {
                    debug!(flow = waiter.flow.name(), "input handed to waiting flow");
                    return Ok(None);
                }
                // The flow gave up between registering and now.
                Err(returned) => event = returned,
            }
        }
        Ok(Some(event))
    }

    fn waiters_guard(&self) -> Result<std::sync::MutexGuard<'_, FlowWaiters>, SdkError> {
        self.waiters
            .lock()
            .map_err(|e| PortError::Transport(format!("flow waiter lock poisoned: {e}")).into())
    }

    async fn next_event(&self) -> Option<SdkEvent> {
        self.inbound.lock().await.recv().await
    }

    async fn authenticate_channel(&self) -> Result<ChannelIdentity, SdkError> {
        let account = self
            .auth
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PortError::State("auth provider returned no accounts".to_owned()))?;
        let signature = self
            .auth
            .personal_sign(AUTHENTICATION_MESSAGE, account)
            .await?;
        Ok(self
            .provider
            .authenticate(&signature, self.config.canonical_network())
            .await?)
    }

    fn report_deposit(&self, outcome: DepositOutcome) {
        let (stage, notification) = match outcome {
            DepositOutcome::Success => (FlowStage::Success, SdkNotification::DepositSuccess),
            DepositOutcome::Failed { reason } => {
                (FlowStage::Failure, SdkNotification::DepositFailure { reason })
            }
        };
        self.ui.set_deposit_stage(stage);
        self.notify(notification);
    }

    fn notify(&self, notification: SdkNotification) {
        if let Err(e) = self.notifications.send(notification) {
            debug!(notification = ?e.0, "no notification subscribers");
        }
    }

    fn require_login(&self, op: &'static str) -> Result<Address, SdkError> {
        if !self.is_initialized() {
            return Err(SdkError::NotInitialized(op));
        }
        self.provider.multisig_address().ok_or_else(|| {
            PortError::State(format!("not logged in - {op}() needs an authenticated channel"))
                .into()
        })
    }

    fn set_initialized(&self, value: bool) -> Result<(), SdkError> {
        *self
            .initialized
            .lock()
            .map_err(|e| PortError::Transport(format!("sdk flag lock poisoned: {e}")))? = value;
        Ok(())
    }
}

fn cancelled(flow: &str) -> SdkError {
    PortError::Cancelled {
        method: flow.to_owned(),
    }
    .into()
}
