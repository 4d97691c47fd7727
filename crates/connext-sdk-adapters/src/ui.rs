use std::sync::{Arc, Mutex};

use alloy::primitives::Address;

use connext_sdk_core::{FlowStage, PortError, UiPort};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Hidden,
    Login,
    Deposit(Address),
    Withdraw,
}

/// Records what the overlay would show. Used by the demo binary and tests.
#[derive(Debug, Clone)]
pub struct HeadlessUi {
    state: Arc<Mutex<UiState>>,
}

#[derive(Debug)]
struct UiState {
    mounted: bool,
    screen: Screen,
    login: Vec<FlowStage>,
    deposit: Vec<FlowStage>,
    withdraw: Vec<FlowStage>,
}

impl Default for HeadlessUi {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(UiState {
                mounted: false,
                screen: Screen::Hidden,
                login: Vec::new(),
                deposit: Vec::new(),
                withdraw: Vec::new(),
            })),
        }
    }
}

impl HeadlessUi {
    pub fn is_mounted(&self) -> bool {
        self.state.lock().map(|g| g.mounted).unwrap_or(false)
    }

    pub fn screen(&self) -> Screen {
        self.state.lock().map(|g| g.screen).unwrap_or(Screen::Hidden)
    }

    pub fn login_stages(&self) -> Vec<FlowStage> {
        self.state
            .lock()
            .map(|g| g.login.clone())
            .unwrap_or_default()
    }

    pub fn deposit_stages(&self) -> Vec<FlowStage> {
        self.state
            .lock()
            .map(|g| g.deposit.clone())
            .unwrap_or_default()
    }

    pub fn withdraw_stages(&self) -> Vec<FlowStage> {
        self.state
            .lock()
            .map(|g| g.withdraw.clone())
            .unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut UiState)) {
        if let Ok(mut g) = self.state.lock() {
            f(&mut g);
        }
    }
}

impl UiPort for HeadlessUi {
    fn mount(&self) -> Result<(), PortError> {
        self.update(|g| g.mounted = true);
        Ok(())
    }

    fn unmount(&self) -> Result<(), PortError> {
        self.update(|g| {
            g.mounted = false;
            g.screen = Screen::Hidden;
        });
        Ok(())
    }

    fn show_login(&self) {
        self.update(|g| g.screen = Screen::Login);
    }

    fn show_deposit(&self, deposit_address: Address) {
        self.update(|g| g.screen = Screen::Deposit(deposit_address));
    }

    fn show_withdraw(&self) {
        self.update(|g| g.screen = Screen::Withdraw);
    }

    fn set_login_stage(&self, stage: FlowStage) {
        self.update(|g| g.login.push(stage));
    }

    fn set_deposit_stage(&self, stage: FlowStage) {
        self.update(|g| g.deposit.push(stage));
    }

    fn set_withdraw_stage(&self, stage: FlowStage) {
        self.update(|g| g.withdraw.push(stage));
    }
}
