use std::sync::Mutex;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::ChannelIdentity;
use crate::ports::{ChannelPort, ChannelRpc, ClockPort, FrameTransport, PortError};
use crate::rpc::RpcConnection;
use crate::wire::methods;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Iframe,
    Direct,
}

pub enum ProviderBackend<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    Iframe(RpcConnection<T, C>),
    Direct(Box<dyn ChannelRpc>),
}

/// Lifecycle surface the wallet flows talk to, backed either by the
/// sandboxed iframe or by a provider the host page supplied.
pub struct ChannelProvider<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    backend: ProviderBackend<T, C>,
    identity: Mutex<ChannelIdentity>,
    direct_enabled: Mutex<bool>,
}

impl<T, C> ChannelProvider<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    pub fn iframe(connection: RpcConnection<T, C>) -> Self {
        Self::from_backend(ProviderBackend::Iframe(connection))
    }

    pub fn direct(rpc: Box<dyn ChannelRpc>) -> Self {
        Self::from_backend(ProviderBackend::Direct(rpc))
    }

    fn from_backend(backend: ProviderBackend<T, C>) -> Self {
        Self {
            backend,
            identity: Mutex::new(ChannelIdentity::default()),
            direct_enabled: Mutex::new(false),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self.backend {
            ProviderBackend::Iframe(_) => ProviderKind::Iframe,
            ProviderBackend::Direct(_) => ProviderKind::Direct,
        }
    }

    pub fn is_iframe(&self) -> bool {
        self.kind() == ProviderKind::Iframe
    }

    pub fn connection(&self) -> Option<&RpcConnection<T, C>> {
        match &self.backend {
            ProviderBackend::Iframe(conn) => Some(conn),
            ProviderBackend::Direct(_) => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.backend {
            ProviderBackend::Iframe(conn) => conn.is_connected(),
            ProviderBackend::Direct(_) => self.direct_enabled.lock().map(|g| *g).unwrap_or(false),
        }
    }

    pub async fn enable(&self) -> Result<(), PortError> {
        match &self.backend {
            ProviderBackend::Iframe(conn) => {
                if conn.is_connected() {
                    return Ok(());
                }
                conn.open().await
            }
            ProviderBackend::Direct(rpc) => {
                rpc.enable().await?;
                *self.enabled_flag()? = true;
                Ok(())
            }
        }
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, PortError> {
        match &self.backend {
            ProviderBackend::Iframe(conn) => conn.send(method, params).await,
            ProviderBackend::Direct(rpc) => rpc.send(method, params).await,
        }
    }

    /// Tears the backend down and forgets the identity. A second call finds
    /// nothing left to release and returns `Ok`.
    pub async fn close(&self) -> Result<(), PortError> {
        match &self.backend {
            ProviderBackend::Iframe(conn) => conn.close().await?,
            ProviderBackend::Direct(rpc) => {
                let was_enabled = std::mem::replace(&mut *self.enabled_flag()?, false);
                if was_enabled {
                    rpc.close().await?;
                }
            }
        }
        *self.identity_guard()? = ChannelIdentity::default();
        debug!(kind = ?self.kind(), "channel provider closed");
        Ok(())
    }

    /// Hands the signed authentication message to the wallet and records the
    /// identity it answers with.
    pub async fn authenticate(
        &self,
        signature: &str,
        network: &str,
    ) -> Result<ChannelIdentity, PortError> {
        let result = self
            .send(
                methods::AUTHENTICATE,
                serde_json::json!({ "signature": signature, "network": network }),
            )
            .await?;
        let identity: ChannelIdentity = serde_json::from_value(result).map_err(|_| {
            PortError::Protocol {
                method: methods::AUTHENTICATE.to_owned(),
            }
        })?;
        *self.identity_guard()? = identity.clone();
        info!(
            public_identifier = identity.public_identifier.as_deref().unwrap_or("-"),
            "channel authenticated"
        );
        Ok(identity)
    }

    pub async fn refresh_public_identifier(&self) -> Result<String, PortError> {
        let result = self
            .send(methods::PUBLIC_IDENTIFIER, serde_json::json!({}))
            .await?;
        let id = match &result {
            Value::String(s) => s.clone(),
            other => other
                .get("publicIdentifier")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| PortError::Protocol {
                    method: methods::PUBLIC_IDENTIFIER.to_owned(),
                })?,
        };
        self.identity_guard()?.public_identifier = Some(id.clone());
        Ok(id)
    }

    pub fn identity(&self) -> ChannelIdentity {
        self.identity
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn set_identity(&self, identity: ChannelIdentity) -> Result<(), PortError> {
        *self.identity_guard()? = identity;
        Ok(())
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.identity().signer_address
    }

    pub fn public_identifier(&self) -> Option<String> {
        self.identity().public_identifier
    }

    fn identity_guard(&self) -> Result<std::sync::MutexGuard<'_, ChannelIdentity>, PortError> {
        self.identity
            .lock()
            .map_err(|e| PortError::Transport(format!("provider identity lock poisoned: {e}")))
    }

    fn enabled_flag(&self) -> Result<std::sync::MutexGuard<'_, bool>, PortError> {
        self.direct_enabled
            .lock()
            .map_err(|e| PortError::Transport(format!("provider flag lock poisoned: {e}")))
    }
}

#[async_trait(?Send)]
impl<T, C> ChannelPort for ChannelProvider<T, C>
where
    T: FrameTransport,
    C: ClockPort,
{
    async fn request_deposit_rights(&self, asset_id: Address) -> Result<(), PortError> {
        let result = self
            .send(methods::DEPOSIT, serde_json::json!({ "assetId": asset_id }))
            .await?;
        if let Some(multisig) = result
            .get("multisigAddress")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Address>().ok())
        {
            self.identity_guard()?.multisig_address = Some(multisig);
        }
        debug!(%asset_id, "deposit rights granted");
        Ok(())
    }

    async fn rescind_deposit_rights(&self, asset_id: Address) -> Result<(), PortError> {
        self.send(
            methods::RESCIND_DEPOSIT_RIGHTS,
            serde_json::json!({ "assetId": asset_id }),
        )
        .await?;
        debug!(%asset_id, "deposit rights rescinded");
        Ok(())
    }

    fn multisig_address(&self) -> Option<Address> {
        self.identity().multisig_address
    }
}
