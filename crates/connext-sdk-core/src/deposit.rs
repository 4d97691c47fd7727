//! Deposit watcher.
//!
//! The only durable state is the [`PreDepositBalance`] record in the
//! key-value store; everything else is rebuilt from it after a reload by
//! [`DepositController::check_deposit_subscription`].

use std::sync::Mutex;

use alloy::primitives::Address;
use tracing::{debug, error, info, warn};

use crate::domain::{BalanceSnapshot, DepositOutcome, PreDepositBalance};
use crate::ports::{BlockNotifier, ChainPort, ChannelPort, KeyValueStore, PortError};
use crate::state_machine::{deposit_transition, DepositAction, DepositState, StateTransition};

pub const PRE_DEPOSIT_BALANCE_KEY: &str = "MULTISIG_BALANCE_PRE_DEPOSIT";

#[derive(Debug)]
struct DepositRuntime {
    state: DepositState,
    listening: bool,
    checking: bool,
    history: Vec<StateTransition>,
}

pub struct DepositController<B, S>
where
    B: ChainPort,
    S: KeyValueStore,
{
    chain: B,
    store: S,
    asset_id: Address,
    storage_key: String,
    notifier: BlockNotifier,
    runtime: Mutex<DepositRuntime>,
}

impl<B, S> DepositController<B, S>
where
    B: ChainPort,
    S: KeyValueStore,
{
    /// `notifier` is what the chain calls on every new block while the
    /// controller is listening; the owner routes it back into
    /// [`Self::on_new_block`].
    pub fn new(chain: B, store: S, asset_id: Address, notifier: BlockNotifier) -> Self {
        Self {
            chain,
            store,
            asset_id,
            storage_key: PRE_DEPOSIT_BALANCE_KEY.to_owned(),
            notifier,
            runtime: Mutex::new(DepositRuntime {
                state: DepositState::Idle,
                listening: false,
                checking: false,
                history: Vec::new(),
            }),
        }
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn chain(&self) -> &B {
        &self.chain
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn asset_id(&self) -> Address {
        self.asset_id
    }

    pub fn state(&self) -> DepositState {
        self.runtime
            .lock()
            .map(|g| g.state)
            .unwrap_or(DepositState::Idle)
    }

    pub fn is_listening(&self) -> bool {
        self.runtime.lock().map(|g| g.listening).unwrap_or(false)
    }

    pub fn transitions(&self) -> Vec<StateTransition> {
        self.runtime
            .lock()
            .map(|g| g.history.clone())
            .unwrap_or_default()
    }

    /// A deposit is being watched exactly when a record is persisted.
    pub async fn subscribed(&self) -> Result<bool, PortError> {
        Ok(self.pre_deposit_balance().await?.is_some())
    }

    pub async fn pre_deposit_balance(&self) -> Result<Option<PreDepositBalance>, PortError> {
        let Some(raw) = self.store.get(&self.storage_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<PreDepositBalance>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // An unreadable record can never be matched against a
                // balance again; dropping it lets a new deposit start.
                warn!(key = %self.storage_key, "discarding unreadable pre-deposit record: {e}");
                self.store.remove(&self.storage_key).await?;
                Ok(None)
            }
        }
    }

    /// Asks the channel for deposit rights. Must precede
    /// [`Self::subscribe_to_deposit`]; a failure is returned unretried.
    pub async fn request_deposit_rights<P: ChannelPort>(&self, channel: &P) -> Result<(), PortError> {
        if let Some(existing) = self.pre_deposit_balance().await? {
            return Err(self.already_watching(&existing));
        }
        self.advance(DepositAction::RequestRights)?;
        if let Err(e) = channel.request_deposit_rights(self.asset_id).await {
            self.advance(DepositAction::Abort)?;
            return Err(e);
        }
        Ok(())
    }

    /// Snapshots current balances, persists them and starts listening for
    /// blocks.
    pub async fn subscribe_to_deposit<P: ChannelPort>(&self, channel: &P) -> Result<(), PortError> {
        if self.state() != DepositState::AwaitingRights {
            return Err(PortError::State(format!(
                "deposit rights must be requested before watching (state {:?})",
                self.state()
            )));
        }
        if let Some(existing) = self.pre_deposit_balance().await? {
            self.advance(DepositAction::Abort)?;
            return Err(self.already_watching(&existing));
        }

        let snapshot = match self.read_snapshot(channel).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.abandon_setup(channel).await?;
                return Err(e);
            }
        };
        let record = PreDepositBalance::from_snapshot(snapshot, self.asset_id);
        let started = match self.persist(&record).await {
            Ok(()) => self.arm(),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            warn!("deposit setup failed after rights were granted: {e}");
            self.abandon_setup(channel).await?;
            return Err(e);
        }
        self.advance(DepositAction::RightsGranted)?;
        info!(
            token = %record.token_balance,
            native = %record.eth_balance,
            "watching for deposit"
        );
        Ok(())
    }

    /// Reload recovery. With a persisted record, settles at once if the
    /// deposit already landed, otherwise resumes listening with the record
    /// left untouched.
    pub async fn check_deposit_subscription<P: ChannelPort>(
        &self,
        channel: &P,
    ) -> Result<Option<DepositOutcome>, PortError> {
        let Some(record) = self.pre_deposit_balance().await? else {
            return Ok(None);
        };
        let current = self.read_snapshot(channel).await?;
        if record.has_increased(&current)? {
            self.advance(DepositAction::BalanceIncreased)?;
            return self.on_deposit_success(channel).await.map(Some);
        }
        self.advance(DepositAction::ResumeWatch)?;
        self.arm()?;
        debug!("deposit not landed yet, watch resumed");
        Ok(None)
    }

    /// Handles one new-block notification. The listener is detached on entry
    /// so blocks arriving mid-check are skipped, and re-attached unless the
    /// watch ended.
    pub async fn on_new_block<P: ChannelPort>(
        &self,
        channel: &P,
        block: u64,
    ) -> Result<Option<DepositOutcome>, PortError> {
        {
            let mut g = self.lock()?;
            if !g.listening || g.checking {
                debug!(block, "block ignored, no check armed");
                return Ok(None);
            }
            g.checking = true;
        }
        let result = self.check_after_block(channel, block).await;
        self.lock()?.checking = false;
        result
    }

    /// Stops listening and forgets the persisted record.
    pub async fn cancel_watch(&self) -> Result<(), PortError> {
        self.disarm()?;
        self.store.remove(&self.storage_key).await?;
        if self.state() != DepositState::Settling {
            self.advance(DepositAction::Cancel)?;
        }
        info!("deposit watch cancelled");
        Ok(())
    }

    async fn check_after_block<P: ChannelPort>(
        &self,
        channel: &P,
        block: u64,
    ) -> Result<Option<DepositOutcome>, PortError> {
        self.disarm()?;
        let Some(record) = self.pre_deposit_balance().await? else {
            debug!(block, "spurious block notification, nothing persisted");
            if self.state() == DepositState::Watching {
                self.advance(DepositAction::Cancel)?;
            }
            return Ok(None);
        };

        let increased = match self.read_snapshot(channel).await {
            Ok(current) => record.has_increased(&current),
            Err(e) => Err(e),
        };
        match increased {
            Ok(true) => {
                self.advance(DepositAction::BalanceIncreased)?;
                self.on_deposit_success(channel).await.map(Some)
            }
            Ok(false) => {
                self.arm()?;
                debug!(block, "no balance change yet");
                Ok(None)
            }
            Err(e) => {
                self.arm()?;
                Err(e)
            }
        }
    }

    async fn on_deposit_success<P: ChannelPort>(
        &self,
        channel: &P,
    ) -> Result<DepositOutcome, PortError> {
        if let Err(e) = self.store.remove(&self.storage_key).await {
            self.advance(DepositAction::SettleFailed)?;
            return Err(e);
        }

        let teardown = match self.disarm() {
            Ok(()) => channel.rescind_deposit_rights(self.asset_id).await,
            Err(e) => Err(e),
        };
        match teardown {
            Ok(()) => {
                self.advance(DepositAction::Settled)?;
                info!(asset_id = %self.asset_id, "deposit succeeded");
                Ok(DepositOutcome::Success)
            }
            Err(e) => {
                error!(asset_id = %self.asset_id, "deposit teardown failed: {e}");
                self.advance(DepositAction::SettleFailed)?;
                Ok(DepositOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Rolls a half-finished setup back to Idle: no listener, no record and
    /// the rights handed back. Cleanup failures are logged, not returned.
    async fn abandon_setup<P: ChannelPort>(&self, channel: &P) -> Result<(), PortError> {
        if let Err(e) = self.disarm() {
            warn!("could not detach block listener: {e}");
        }
        if let Err(e) = self.store.remove(&self.storage_key).await {
            warn!(key = %self.storage_key, "could not remove pre-deposit record: {e}");
        }
        if let Err(e) = channel.rescind_deposit_rights(self.asset_id).await {
            warn!(asset_id = %self.asset_id, "could not rescind deposit rights: {e}");
        }
        self.advance(DepositAction::Abort)?;
        Ok(())
    }

    async fn read_snapshot<P: ChannelPort>(&self, channel: &P) -> Result<BalanceSnapshot, PortError> {
        let owner = channel
            .multisig_address()
            .ok_or_else(|| PortError::State("not logged in: multisig address unknown".to_owned()))?;
        let token = self.chain.token_balance(owner, self.asset_id).await?;
        let native = self.chain.native_balance(owner).await?;
        Ok(BalanceSnapshot { token, native })
    }

    async fn persist(&self, record: &PreDepositBalance) -> Result<(), PortError> {
        let raw = serde_json::to_string(record)
            .map_err(|e| PortError::Storage(format!("pre-deposit record encode failed: {e}")))?;
        self.store.set(&self.storage_key, &raw).await
    }

    fn arm(&self) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if !g.listening {
            self.chain.watch_blocks(self.notifier.clone())?;
            g.listening = true;
        }
        Ok(())
    }

    fn disarm(&self) -> Result<(), PortError> {
        let mut g = self.lock()?;
        if g.listening {
            self.chain.unwatch_blocks()?;
            g.listening = false;
        }
        Ok(())
    }

    fn already_watching(&self, existing: &PreDepositBalance) -> PortError {
        if existing.matches_asset(self.asset_id) {
            PortError::State("a deposit is already being watched".to_owned())
        } else {
            PortError::State(format!(
                "a deposit for asset {} is already being watched",
                existing
                    .asset_id
                    .map(|a| a.to_string())
                    .unwrap_or_default()
            ))
        }
    }

    fn advance(&self, action: DepositAction) -> Result<StateTransition, PortError> {
        let mut g = self.lock()?;
        let (next, transition) = deposit_transition(g.state, action)?;
        debug!(from = ?transition.from, to = ?next, reason = transition.reason, "deposit transition");
        g.state = next;
        g.history.push(transition.clone());
        Ok(transition)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DepositRuntime>, PortError> {
        self.runtime
            .lock()
            .map_err(|e| PortError::Transport(format!("deposit state lock poisoned: {e}")))
    }
}
