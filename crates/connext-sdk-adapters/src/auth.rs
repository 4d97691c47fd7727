use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address};
use async_trait::async_trait;
use tracing::debug;

use connext_sdk_core::{AuthPort, PortError};

/// Email login that succeeds immediately and signs with a keccak-derived
/// stand-in signature. The account is derived from the email so the same
/// login always yields the same signer.
#[derive(Debug, Clone, Default)]
pub struct DeterministicAuth {
    state: Arc<Mutex<AuthState>>,
}

#[derive(Debug, Default)]
struct AuthState {
    account: Option<Address>,
    reject_login: Option<String>,
    pending_login: bool,
    signed: Vec<String>,
}

impl DeterministicAuth {
    /// Starts already logged in as `email`, as after a page reload with a
    /// live magic session.
    pub fn logged_in(email: &str) -> Self {
        let auth = Self::default();
        if let Ok(mut g) = auth.state.lock() {
            g.account = Some(account_for(email));
        }
        auth
    }

    pub fn reject_logins(&self, message: Option<&str>) {
        if let Ok(mut g) = self.state.lock() {
            g.reject_login = message.map(str::to_owned);
        }
    }

    /// Leaves the next login unresolved forever, like an unanswered email.
    pub fn hang_logins(&self, hang: bool) {
        if let Ok(mut g) = self.state.lock() {
            g.pending_login = hang;
        }
    }

    pub fn signed_messages(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|g| g.signed.clone())
            .unwrap_or_default()
    }

    pub fn logout(&self) {
        if let Ok(mut g) = self.state.lock() {
            g.account = None;
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, AuthState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("auth lock poisoned: {e}")))
    }
}

pub fn account_for(email: &str) -> Address {
    let hash = keccak256(email.trim().to_lowercase().as_bytes());
    Address::from_slice(&hash[12..])
}

#[async_trait(?Send)]
impl AuthPort for DeterministicAuth {
    async fn is_logged_in(&self) -> Result<bool, PortError> {
        Ok(self.lock()?.account.is_some())
    }

    async fn login_with_email(&self, email: &str) -> Result<(), PortError> {
        if email.trim().is_empty() {
            return Err(PortError::Validation("email must not be empty".to_owned()));
        }
        let hang = {
            let mut g = self.lock()?;
            if let Some(message) = &g.reject_login {
                return Err(PortError::Remote(message.clone()));
            }
            if !g.pending_login {
                g.account = Some(account_for(email));
            }
            g.pending_login
        };
        if hang {
            debug!("login left pending");
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Address>, PortError> {
        Ok(self.lock()?.account.into_iter().collect())
    }

    async fn personal_sign(&self, message: &str, account: Address) -> Result<String, PortError> {
        let mut g = self.lock()?;
        if g.account != Some(account) {
            return Err(PortError::Validation(format!(
                "account {account} is not logged in"
            )));
        }
        let mut seed = Vec::with_capacity(message.len() + 20);
        seed.extend_from_slice(account.as_slice());
        seed.extend_from_slice(message.as_bytes());
        let hash = keccak256(seed);
        let mut sig = Vec::with_capacity(65);
        sig.extend_from_slice(hash.as_slice());
        sig.extend_from_slice(hash.as_slice());
        sig.push(27);
        g.signed.push(message.to_owned());
        Ok(format!("0x{}", alloy::primitives::hex::encode(sig)))
    }
}
