use serde::{Deserialize, Serialize};

use crate::ports::PortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositState {
    Idle,
    AwaitingRights,
    Watching,
    Settling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositAction {
    RequestRights,
    RightsGranted,
    Abort,
    ResumeWatch,
    BalanceIncreased,
    Settled,
    SettleFailed,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: DepositState,
    pub to: DepositState,
    pub reason: &'static str,
}

pub fn deposit_transition(
    from: DepositState,
    action: DepositAction,
) -> Result<(DepositState, StateTransition), PortError> {
    use DepositAction as A;
    use DepositState as S;

    let (to, reason) = match (from, action) {
        (S::Idle, A::RequestRights) => (S::AwaitingRights, "deposit rights requested"),
        (S::AwaitingRights, A::RightsGranted) => (S::Watching, "pre-deposit balance persisted"),
        (S::AwaitingRights, A::Abort) => (S::Idle, "deposit setup failed"),
        // Reload recovery: a persisted record with no increase yet.
        (S::Idle, A::ResumeWatch) | (S::Watching, A::ResumeWatch) => {
            (S::Watching, "watch resumed from persisted balance")
        }
        // Reload recovery can find the deposit already landed.
        (S::Idle, A::BalanceIncreased) | (S::Watching, A::BalanceIncreased) => {
            (S::Settling, "on-chain balance increased")
        }
        (S::Settling, A::Settled) => (S::Idle, "deposit settled"),
        (S::Settling, A::SettleFailed) => (S::Idle, "deposit teardown failed"),
        (S::Idle, A::Cancel) | (S::AwaitingRights, A::Cancel) | (S::Watching, A::Cancel) => {
            (S::Idle, "deposit watch cancelled")
        }
        _ => {
            return Err(PortError::State(format!(
                "illegal deposit transition: {from:?} --{action:?}-->"
            )))
        }
    };

    Ok((to, StateTransition { from, to, reason }))
}
