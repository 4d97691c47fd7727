use thiserror::Error;

use connext_sdk_core::PortError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("not initialized - make sure to await login() first before calling {0}()")]
    NotInitialized(&'static str),
    #[error("a deposit is already being watched")]
    DepositInProgress,
    #[error("login timed out - expected an email within {after_ms}ms")]
    LoginTimeout { after_ms: u64 },
    #[error(transparent)]
    Port(#[from] PortError),
}

impl SdkError {
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized(_))
    }
}
