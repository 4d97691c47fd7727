use alloy::primitives::Address;
use tracing::warn;

use connext_sdk_core::{PortError, PRE_DEPOSIT_BALANCE_KEY};

pub const NETWORKS: &[&str] = &["localhost", "rinkeby", "mainnet"];
pub const NETWORK_ALIASES: &[&str] = &["sandbox", "staging", "production"];

#[derive(Debug, Clone)]
pub struct SdkConfig {
    pub iframe_src: String,
    pub iframe_id: String,
    pub overlay_id: String,
    pub style_id: String,
    /// Zero address means the native coin.
    pub asset_id: Address,
    pub network: String,
    pub magic_key: String,
    /// JSON-RPC endpoint the deposit watcher reads balances from.
    pub eth_provider_url: Option<String>,
    pub eth_timeout_ms: u64,
    pub block_poll_interval_ms: u64,
    pub login_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub storage_key: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            iframe_src: "http://localhost:3030".to_owned(),
            iframe_id: "connext-iframe".to_owned(),
            overlay_id: "connext-overlay".to_owned(),
            style_id: "connext-style".to_owned(),
            asset_id: Address::ZERO,
            network: "rinkeby".to_owned(),
            magic_key: "pk_live_AF53537280E47C75".to_owned(),
            eth_provider_url: None,
            eth_timeout_ms: 10_000,
            block_poll_interval_ms: 4_000,
            login_timeout_ms: 10 * 60 * 1000,
            close_timeout_ms: 5_000,
            storage_key: PRE_DEPOSIT_BALANCE_KEY.to_owned(),
        }
    }
}

impl SdkConfig {
    /// Reads `CONNEXT_*` overrides on native targets. Browser builds have no
    /// environment and get the defaults.
    pub fn from_env() -> Result<Self, PortError> {
        let mut config = Self::default();

        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(v) = env_var("CONNEXT_IFRAME_SRC") {
                config.iframe_src = v;
            }
            if let Some(v) = env_var("CONNEXT_IFRAME_ID") {
                config.iframe_id = v;
            }
            if let Some(v) = env_var("CONNEXT_OVERLAY_ID") {
                config.overlay_id = v;
            }
            if let Some(v) = env_var("CONNEXT_NETWORK") {
                config.network = v;
            }
            if let Some(v) = env_var("CONNEXT_MAGIC_KEY") {
                config.magic_key = v;
            }
            if let Some(v) = env_var("CONNEXT_STORAGE_KEY") {
                config.storage_key = v;
            }
            config.eth_provider_url = env_var("CONNEXT_ETH_PROVIDER_URL");
            if let Some(v) = env_var("CONNEXT_ASSET_ID") {
                match v.parse() {
                    Ok(asset) => config.asset_id = asset,
                    Err(e) => warn!("ignoring CONNEXT_ASSET_ID={v}: {e}"),
                }
            }
            if let Some(v) = env_var("CONNEXT_LOGIN_TIMEOUT_MS") {
                config.login_timeout_ms =
                    parse_ms("CONNEXT_LOGIN_TIMEOUT_MS", &v, config.login_timeout_ms);
            }
            if let Some(v) = env_var("CONNEXT_ETH_TIMEOUT_MS") {
                config.eth_timeout_ms = parse_ms("CONNEXT_ETH_TIMEOUT_MS", &v, config.eth_timeout_ms);
            }
            if let Some(v) = env_var("CONNEXT_BLOCK_POLL_INTERVAL_MS") {
                config.block_poll_interval_ms = parse_ms(
                    "CONNEXT_BLOCK_POLL_INTERVAL_MS",
                    &v,
                    config.block_poll_interval_ms,
                );
            }
            if let Some(v) = env_var("CONNEXT_CLOSE_TIMEOUT_MS") {
                config.close_timeout_ms =
                    parse_ms("CONNEXT_CLOSE_TIMEOUT_MS", &v, config.close_timeout_ms);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PortError> {
        if !NETWORKS.contains(&self.network.as_str())
            && !NETWORK_ALIASES.contains(&self.network.as_str())
        {
            return Err(PortError::Validation(format!(
                "unsupported network {:?}; expected one of {NETWORKS:?} or {NETWORK_ALIASES:?}",
                self.network
            )));
        }
        connext_sdk_core::origin_of(&self.iframe_src)?;
        if let Some(url) = &self.eth_provider_url {
            connext_sdk_core::origin_of(url).map_err(|_| {
                PortError::Validation(format!("eth provider url {url:?} must be absolute"))
            })?;
        }
        if self.block_poll_interval_ms == 0 {
            return Err(PortError::Validation(
                "block poll interval must be positive".to_owned(),
            ));
        }
        if self.storage_key.trim().is_empty() {
            return Err(PortError::Validation("storage key must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Maps deployment aliases onto the network they run against.
    pub fn canonical_network(&self) -> &str {
        match self.network.as_str() {
            "sandbox" => "localhost",
            "staging" => "rinkeby",
            "production" => "mainnet",
            other => other,
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(not(target_arch = "wasm32"))]
fn parse_ms(key: &str, raw: &str, fallback: u64) -> u64 {
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("ignoring {key}={raw}: {e}");
        fallback
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SdkConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.login_timeout_ms, 600_000);
        assert_eq!(config.storage_key, "MULTISIG_BALANCE_PRE_DEPOSIT");
    }

    #[test]
    fn aliases_map_to_networks() {
        let config = SdkConfig {
            network: "production".to_owned(),
            ..SdkConfig::default()
        };
        config.validate().expect("alias accepted");
        assert_eq!(config.canonical_network(), "mainnet");
    }

    #[test]
    fn unknown_network_is_rejected() {
        let config = SdkConfig {
            network: "ropsten".to_owned(),
            ..SdkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn eth_provider_url_must_be_absolute() {
        let config = SdkConfig {
            eth_provider_url: Some("rinkeby.infura.io/v3/key".to_owned()),
            ..SdkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_iframe_src_is_rejected() {
        let config = SdkConfig {
            iframe_src: "localhost:3030".to_owned(),
            ..SdkConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
