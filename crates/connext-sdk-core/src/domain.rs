use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::ports::PortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

/// On-chain balances of the channel multisig, in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub token: U256,
    pub native: U256,
}

/// Balances captured right before a deposit starts. Its presence in durable
/// storage is what marks a deposit as being watched.
///
/// Amounts stay decimal strings on the wire so no precision is lost between
/// the host page and storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreDepositBalance {
    pub token_balance: String,
    pub eth_balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<Address>,
}

impl PreDepositBalance {
    pub fn from_snapshot(snapshot: BalanceSnapshot, asset_id: Address) -> Self {
        Self {
            token_balance: snapshot.token.to_string(),
            eth_balance: snapshot.native.to_string(),
            asset_id: Some(asset_id),
        }
    }

    pub fn token(&self) -> Result<U256, PortError> {
        parse_base_units(&self.token_balance)
    }

    pub fn native(&self) -> Result<U256, PortError> {
        parse_base_units(&self.eth_balance)
    }

    /// Either asset strictly increasing counts as a landed deposit.
    pub fn has_increased(&self, current: &BalanceSnapshot) -> Result<bool, PortError> {
        Ok(current.token > self.token()? || current.native > self.native()?)
    }

    /// Records written before the asset id was stored match any asset.
    pub fn matches_asset(&self, asset_id: Address) -> bool {
        self.asset_id.map_or(true, |stored| stored == asset_id)
    }
}

/// Parses a base-unit integer string. Only plain decimal digits are
/// accepted; hex, signs and fractional parts are rejected.
pub fn parse_base_units(raw: &str) -> Result<U256, PortError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PortError::Validation(format!(
            "invalid base-unit amount: {raw:?}"
        )));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|e| PortError::Validation(format!("invalid base-unit amount {raw:?}: {e}")))
}

/// Identity returned by the wallet once `connext_authenticate` succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelIdentity {
    #[serde(default)]
    pub public_identifier: Option<String>,
    #[serde(default)]
    pub multisig_address: Option<Address>,
    #[serde(default)]
    pub signer_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnextTransaction {
    pub recipient: String,
    pub amount: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositOutcome {
    Success,
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    Pending,
    Success,
    Failure,
}
