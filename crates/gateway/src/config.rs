//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。
//!
//! | 環境変数 | 既定値 |
//! |---------|-------|
//! | `ZZIN_BIND_ADDR` | `0.0.0.0:3000` |
//! | `MOCK_MODE` | `false` |
//! | `FILE_REGISTRY_CONTRACT_ADDRESS` | （本番モードで必須） |
//! | `FILE_REGISTRY_RPC_URL` | `https://worldchain-mainnet.g.alchemy.com/public` |
//! | `FILE_REGISTRY_PRIVATE_KEY` | （本番モードで必須） |
//! | `FILE_REGISTRY_CHAIN_ID` | `480` |
//! | `FILE_REGISTRY_EXPLORER_BASE_URL` | `https://worldscan.org` |
//! | `WORLD_ID_APP_ID` | （本番モードで必須） |
//! | `WORLD_ID_VERIFY_BASE_URL` | `https://developer.worldcoin.org` |
//! | `CONFIRMATION_TIMEOUT_SECS` | `60` |
//! | `MAX_UPLOAD_BYTES` | `20971520` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use zzin_core::identity::{IdentityVerifier, MockIdentity};
use zzin_core::registration::RegistrationCoordinator;
use zzin_core::registry::{InMemoryRegistry, RegistryReader};
use zzin_core::verification::VerificationResolver;
use zzin_crypto::{signing_key_from_hex, Address};

use crate::chain::registry::RpcRegistry;
use crate::worldid::WorldIdVerifier;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_RPC_URL: &str = "https://worldchain-mainnet.g.alchemy.com/public";
pub const DEFAULT_CHAIN_ID: u64 = 480;
pub const DEFAULT_EXPLORER_BASE_URL: &str = "https://worldscan.org";
pub const DEFAULT_WORLD_ID_VERIFY_BASE_URL: &str = "https://developer.worldcoin.org";
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// レスポンスに載せるネットワーク名
pub const NETWORK_NAME: &str = "worldchain";

/// モックモードで証明を受理するユーザー
pub const MOCK_IDENTITY_USER: &str = "zzin-mock";

/// モックモードのレコード所有者
const MOCK_OWNER: Address = Address::from_bytes([0x2a; 20]);

/// Gateway設定。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub mock_mode: bool,
    pub contract_address: Option<Address>,
    pub rpc_url: String,
    /// `0x` + 64桁の16進数
    pub private_key: Option<String>,
    pub chain_id: u64,
    pub explorer_base_url: String,
    pub world_id_app_id: Option<String>,
    pub world_id_verify_base_url: String,
    pub confirmation_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            mock_mode: false,
            contract_address: None,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            private_key: None,
            chain_id: DEFAULT_CHAIN_ID,
            explorer_base_url: DEFAULT_EXPLORER_BASE_URL.to_string(),
            world_id_app_id: None,
            world_id_verify_base_url: DEFAULT_WORLD_ID_VERIFY_BASE_URL.to_string(),
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl GatewayConfig {
    /// 環境変数から読み込む。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から読み込む。空文字列は未設定として扱う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let contract_address = get("FILE_REGISTRY_CONTRACT_ADDRESS")
            .map(|v| Address::parse(&v))
            .transpose()
            .context("FILE_REGISTRY_CONTRACT_ADDRESSが不正です")?;
        let chain_id = get("FILE_REGISTRY_CHAIN_ID")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("FILE_REGISTRY_CHAIN_IDは整数である必要があります")?
            .unwrap_or(defaults.chain_id);
        let confirmation_timeout = get("CONFIRMATION_TIMEOUT_SECS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("CONFIRMATION_TIMEOUT_SECSは整数である必要があります")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.confirmation_timeout);
        let max_upload_bytes = get("MAX_UPLOAD_BYTES")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("MAX_UPLOAD_BYTESは整数である必要があります")?
            .unwrap_or(defaults.max_upload_bytes);

        Ok(Self {
            bind_addr: get("ZZIN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            mock_mode: get("MOCK_MODE").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            contract_address,
            rpc_url: get("FILE_REGISTRY_RPC_URL").unwrap_or(defaults.rpc_url),
            private_key: get("FILE_REGISTRY_PRIVATE_KEY"),
            chain_id,
            explorer_base_url: get("FILE_REGISTRY_EXPLORER_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.explorer_base_url),
            world_id_app_id: get("WORLD_ID_APP_ID"),
            world_id_verify_base_url: get("WORLD_ID_VERIFY_BASE_URL")
                .unwrap_or(defaults.world_id_verify_base_url),
            confirmation_timeout,
            max_upload_bytes,
        })
    }

    pub fn transaction_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_base_url, tx_hash)
    }
}

/// Gatewayの共有状態。
pub struct GatewayState {
    pub config: GatewayConfig,
    /// 書き込みを行うアカウント（レコード所有者）
    pub owner: Address,
    pub registry: Arc<dyn RegistryReader>,
    pub coordinator: RegistrationCoordinator,
    pub resolver: VerificationResolver,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl GatewayState {
    /// 設定に応じてモックまたはオンチェーンの実装を組み立てる。
    pub fn from_config(config: GatewayConfig) -> anyhow::Result<Self> {
        if config.mock_mode {
            tracing::warn!("MOCK_MODE=true: インメモリレジストリとモック認証を使用します");
            return Ok(Self::mock(config));
        }

        let contract = config
            .contract_address
            .context("FILE_REGISTRY_CONTRACT_ADDRESSが設定されていません")?;
        let key_hex = config
            .private_key
            .as_deref()
            .context("FILE_REGISTRY_PRIVATE_KEYが設定されていません")?;
        let signer = signing_key_from_hex(key_hex).context("FILE_REGISTRY_PRIVATE_KEYが不正です")?;
        let app_id = config
            .world_id_app_id
            .clone()
            .context("WORLD_ID_APP_IDが設定されていません")?;

        let registry = Arc::new(RpcRegistry::new(
            &config.rpc_url,
            contract,
            signer,
            config.chain_id,
            config.confirmation_timeout,
        )?);
        let owner = registry.signer_address();
        let verifier = Arc::new(WorldIdVerifier::new(
            reqwest::Client::new(),
            config.world_id_verify_base_url.clone(),
            app_id,
        ));
        tracing::info!(
            contract = %contract,
            owner = %owner,
            chain_id = config.chain_id,
            "オンチェーンレジストリを使用します"
        );

        Ok(Self {
            owner,
            registry: registry.clone(),
            coordinator: RegistrationCoordinator::for_presented_proofs(registry.clone(), registry.clone()),
            resolver: VerificationResolver::new(registry),
            verifier,
            config,
        })
    }

    /// インメモリレジストリと `MockIdentity` で組み立てる。
    pub fn mock(config: GatewayConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(MOCK_OWNER));
        Self {
            owner: MOCK_OWNER,
            registry: registry.clone(),
            coordinator: RegistrationCoordinator::for_presented_proofs(registry.clone(), registry.clone()),
            resolver: VerificationResolver::new(registry),
            verifier: Arc::new(MockIdentity::new(MOCK_IDENTITY_USER)),
            config: GatewayConfig {
                mock_mode: true,
                ..config
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert!(!config.mock_mode);
        assert_eq!(config.chain_id, 480);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(60));
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.transaction_url("0xabc"), "https://worldscan.org/tx/0xabc");
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("MOCK_MODE", "TRUE"),
            ("FILE_REGISTRY_CHAIN_ID", "4801"),
            ("FILE_REGISTRY_EXPLORER_BASE_URL", "https://sepolia.worldscan.org/"),
            ("FILE_REGISTRY_CONTRACT_ADDRESS", "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            ("WORLD_ID_APP_ID", "  "),
        ]))
        .unwrap();
        assert!(config.mock_mode);
        assert_eq!(config.chain_id, 4801);
        assert_eq!(config.transaction_url("0x1"), "https://sepolia.worldscan.org/tx/0x1");
        assert!(config.contract_address.is_some());
        assert!(config.world_id_app_id.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(GatewayConfig::from_lookup(lookup(&[("FILE_REGISTRY_CHAIN_ID", "abc")])).is_err());
        assert!(GatewayConfig::from_lookup(lookup(&[("FILE_REGISTRY_CONTRACT_ADDRESS", "0x12")])).is_err());
    }

    /// 本番モードでは必須の設定が欠けていると起動しないことを確認
    #[test]
    fn test_production_requires_settings() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        let err = GatewayState::from_config(config).err().unwrap();
        assert!(err.to_string().contains("FILE_REGISTRY_CONTRACT_ADDRESS"));

        let key = format!("0x{}", "46".repeat(32));
        let config = GatewayConfig::from_lookup(lookup(&[
            ("FILE_REGISTRY_CONTRACT_ADDRESS", "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"),
            ("FILE_REGISTRY_PRIVATE_KEY", key.as_str()),
            ("WORLD_ID_APP_ID", "app_test"),
        ]))
        .unwrap();
        let state = GatewayState::from_config(config).unwrap();
        assert_eq!(
            state.owner,
            zzin_crypto::address_from_signing_key(&signing_key_from_hex(&key).unwrap())
        );
    }

    #[test]
    fn test_mock_state() {
        let state = GatewayState::from_config(GatewayConfig {
            mock_mode: true,
            ..GatewayConfig::default()
        })
        .unwrap();
        assert!(state.config.mock_mode);
        assert_eq!(state.owner, MOCK_OWNER);
    }
}
