//! # オンチェーンレジストリ
//!
//! レジストリコントラクトをalloyのプロバイダ経由で読み書きする
//! `RegistryReader` / `TransactionService` 実装。
//!
//! ## 書き込みの流れ
//! 1. `sol!` で生成した呼び出し型からコールデータを作る
//! 2. `eth_estimateGas` で事前実行する（revertはここでシミュレーション失敗になる）
//! 3. ガス価格と保留中ノンスを取得し、ウォレットで署名して送信する
//! 4. レシートをポーリングして確定を待つ
//!
//! ノンスの取得から送信までは直列化する。

use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address as EvmAddress, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolError};
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportErrorKind};
use tokio::sync::Mutex;
use zzin_core::identity::IdentityProof;
use zzin_core::registry::{
    PendingTx, RecordMetadata, RegistryError, RegistryReader, RegistryWrite, TransactionService,
    TxConfirmation, TxError,
};
use zzin_crypto::{Address, ContentHash, Secp256k1SigningKey};

sol! {
    interface IFileRegistry {
        error InvalidProof();

        function registerFile(
            bytes32 fileHash,
            string worldid,
            uint256 timestamp,
            bool usedZzin,
            uint256 root,
            uint256 nullifierHash,
            uint256[8] proof
        ) external;

        function registerFileWithCertificate(
            bytes32 fileHash,
            bytes32 certificateHash,
            string worldid,
            uint256 timestamp,
            bool usedZzin,
            uint256 root,
            uint256 nullifierHash,
            uint256[8] proof
        ) external;

        function linkCertificate(bytes32 fileHash, bytes32 certificateHash) external;

        function resolveOriginalHash(bytes32 fileHash) external view returns (bytes32);

        function getImageMetadata(bytes32 fileHash)
            external
            view
            returns (string location, string worldid, uint256 timestamp, bool usedZzin, bool exists);

        function getFileOwner(bytes32 fileHash) external view returns (address);

        function isRegistered(bytes32 fileHash) external view returns (bool);
    }
}

/// 見積もりに対するガス上限の割増（%）
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

type TransportError = RpcError<TransportErrorKind>;

/// 見積もりに割増を乗せたガス上限。オーバーフローは `u64::MAX` で頭打ちにする。
pub fn gas_limit_with_margin(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(GAS_LIMIT_MARGIN_PERCENT) / 100)
}

fn word(hash: &ContentHash) -> B256 {
    B256::from(*hash.as_bytes())
}

fn uint(bytes: &[u8; 32]) -> U256 {
    U256::from_be_bytes(*bytes)
}

fn proof_words(proof: &IdentityProof) -> [U256; 8] {
    proof.proof.map(U256::from_be_bytes)
}

/// 書き込みのコールデータ。
pub fn encode_write(write: &RegistryWrite) -> Vec<u8> {
    match write {
        RegistryWrite::RegisterOriginal {
            original_hash,
            identity_label,
            timestamp,
            used_certification,
            proof,
        } => IFileRegistry::registerFileCall {
            fileHash: word(original_hash),
            worldid: identity_label.clone(),
            timestamp: U256::from(*timestamp),
            usedZzin: *used_certification,
            root: uint(&proof.merkle_root),
            nullifierHash: uint(&proof.nullifier_hash),
            proof: proof_words(proof),
        }
        .abi_encode(),
        RegistryWrite::RegisterWithCertificate {
            original_hash,
            certificate_hash,
            identity_label,
            timestamp,
            used_certification,
            proof,
        } => IFileRegistry::registerFileWithCertificateCall {
            fileHash: word(original_hash),
            certificateHash: word(certificate_hash),
            worldid: identity_label.clone(),
            timestamp: U256::from(*timestamp),
            usedZzin: *used_certification,
            root: uint(&proof.merkle_root),
            nullifierHash: uint(&proof.nullifier_hash),
            proof: proof_words(proof),
        }
        .abi_encode(),
        RegistryWrite::LinkCertificate {
            original_hash,
            certificate_hash,
        } => IFileRegistry::linkCertificateCall {
            fileHash: word(original_hash),
            certificateHash: word(certificate_hash),
        }
        .abi_encode(),
    }
}

fn read_error(err: TransportError) -> RegistryError {
    match err {
        RpcError::DeserError { err, .. } => RegistryError::InvalidResponse(err.to_string()),
        other => RegistryError::Unavailable(other.to_string()),
    }
}

fn decode_error(err: alloy::sol_types::Error) -> RegistryError {
    RegistryError::InvalidResponse(err.to_string())
}

/// 事前実行の失敗を分類する。証明の拒否はWorld IDの再認証で回復できる。
fn simulation_error(err: TransportError) -> TxError {
    let Some(payload) = err.as_error_resp() else {
        return TxError::Unavailable(err.to_string());
    };
    let detail = payload.to_string();
    let invalid_proof = payload
        .as_revert_data()
        .is_some_and(|data| data.starts_with(&IFileRegistry::InvalidProof::SELECTOR))
        || detail.to_ascii_lowercase().contains("invalidproof");
    if invalid_proof {
        TxError::ProofRejected(detail)
    } else {
        TxError::Simulation(format!("simulation_failed: {detail}"))
    }
}

fn send_error(err: TransportError) -> TxError {
    match err.as_error_resp() {
        Some(payload) => TxError::Rejected(payload.to_string()),
        None => TxError::Unavailable(err.to_string()),
    }
}

fn tx_hash_hex(hash: &B256) -> String {
    format!("0x{}", hex::encode(hash))
}

/// JSON-RPC経由のレジストリ。
pub struct RpcRegistry {
    provider: DynProvider,
    contract: EvmAddress,
    signer_address: EvmAddress,
    chain_id: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    send_lock: Mutex<()>,
}

impl RpcRegistry {
    pub fn new(
        rpc_url: &str,
        contract: Address,
        signer: Secp256k1SigningKey,
        chain_id: u64,
        confirmation_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("RPC URLが不正です: {rpc_url}: {e}"))?;
        let signer = PrivateKeySigner::from_signing_key(signer);
        let signer_address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            provider,
            contract: EvmAddress::from(*contract.as_bytes()),
            signer_address,
            chain_id,
            confirmation_timeout,
            poll_interval: Duration::from_secs(1),
            send_lock: Mutex::new(()),
        })
    }

    /// レシートのポーリング間隔を変更する。
    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 書き込みに使うアカウント（レコード所有者）
    pub fn signer_address(&self) -> Address {
        Address::from_bytes(self.signer_address.into_array())
    }

    fn request(&self, data: Vec<u8>) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.signer_address)
            .with_to(self.contract)
            .with_input(data)
    }

    async fn call_contract<C: SolCall>(&self, call: C) -> Result<C::Return, RegistryError> {
        let data = self
            .provider
            .call(self.request(call.abi_encode()))
            .await
            .map_err(read_error)?;
        C::abi_decode_returns(&data).map_err(decode_error)
    }
}

#[async_trait::async_trait]
impl RegistryReader for RpcRegistry {
    async fn resolve_original_hash(&self, hash: &ContentHash) -> Result<ContentHash, RegistryError> {
        let original = self
            .call_contract(IFileRegistry::resolveOriginalHashCall { fileHash: word(hash) })
            .await?;
        Ok(ContentHash::from_bytes(original.0))
    }

    async fn get_record_metadata(&self, original_hash: &ContentHash) -> Result<RecordMetadata, RegistryError> {
        let record = self
            .call_contract(IFileRegistry::getImageMetadataCall {
                fileHash: word(original_hash),
            })
            .await?;
        let timestamp = u64::try_from(record.timestamp)
            .map_err(|e| RegistryError::InvalidResponse(format!("timestamp: {e}")))?;
        Ok(RecordMetadata {
            location: record.location,
            identity_label: record.worldid,
            timestamp,
            used_certification: record.usedZzin,
            exists: record.exists,
        })
    }

    async fn get_owner(&self, hash: &ContentHash) -> Result<Address, RegistryError> {
        let owner = self
            .call_contract(IFileRegistry::getFileOwnerCall { fileHash: word(hash) })
            .await?;
        Ok(Address::from_bytes(owner.into_array()))
    }

    async fn is_registered(&self, hash: &ContentHash) -> Result<bool, RegistryError> {
        self.call_contract(IFileRegistry::isRegisteredCall { fileHash: word(hash) })
            .await
    }
}

#[async_trait::async_trait]
impl TransactionService for RpcRegistry {
    async fn submit(&self, write: RegistryWrite) -> Result<PendingTx, TxError> {
        let method = write.method();
        let request = self.request(encode_write(&write));

        let _guard = self.send_lock.lock().await;
        let estimate = self
            .provider
            .estimate_gas(request.clone())
            .await
            .map_err(simulation_error)?;
        let gas_price = self.provider.get_gas_price().await.map_err(send_error)?;
        let nonce = self
            .provider
            .get_transaction_count(self.signer_address)
            .pending()
            .await
            .map_err(send_error)?;
        let gas_limit = gas_limit_with_margin(estimate);

        let request = request
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain_id);
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(send_error)?;
        let tx_hash = tx_hash_hex(pending.tx_hash());

        tracing::info!(
            tx_hash = %tx_hash,
            method,
            nonce,
            gas_limit,
            file_hash = %write.original_hash(),
            "トランザクションを送信しました"
        );
        Ok(PendingTx { id: tx_hash, method })
    }

    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxConfirmation, TxError> {
        let hash: B256 = pending
            .id
            .parse()
            .map_err(|e| TxError::Unavailable(format!("トランザクションハッシュが不正です: {e}")))?;

        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(RpcError::Transport(kind)) => {
                        tracing::warn!(tx_hash = %pending.id, error = %kind, "レシート取得に失敗しました。再試行します");
                    }
                    Err(err) => return Err(TxError::Unavailable(err.to_string())),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| TxError::Timeout(pending.id.clone()))??;

        let transaction_hash = tx_hash_hex(&receipt.transaction_hash);
        if !receipt.status() {
            return Err(TxError::Reverted { transaction_hash });
        }
        Ok(TxConfirmation {
            transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::sol_types::SolValue;
    use axum::extract::State;
    use axum::Json;
    use zzin_crypto::{keccak256, signing_key_from_hex};

    /// テスト用のJSON-RPCノード。
    #[derive(Default)]
    struct MockNode {
        sent: std::sync::Mutex<Vec<String>>,
        revert_estimate: bool,
        receipt_status: &'static str,
        pending_receipts: bool,
        metadata: Vec<u8>,
    }

    fn hex_data(bytes: impl AsRef<[u8]>) -> serde_json::Value {
        serde_json::json!(format!("0x{}", hex::encode(bytes)))
    }

    fn selector_of(params: &serde_json::Value) -> String {
        let tx = &params[0];
        let input = tx["input"].as_str().or(tx["data"].as_str()).unwrap_or_default();
        input.get(2..10).unwrap_or_default().to_string()
    }

    async fn handle(
        State(node): State<Arc<MockNode>>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let id = body["id"].clone();
        let params = &body["params"];
        let ok = |result: serde_json::Value| {
            Json(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }))
        };
        match body["method"].as_str().unwrap_or_default() {
            "eth_call" => {
                let selector = selector_of(params);
                if selector == hex::encode(IFileRegistry::resolveOriginalHashCall::SELECTOR) {
                    ok(hex_data(B256::repeat_byte(0x11).abi_encode()))
                } else if selector == hex::encode(IFileRegistry::getImageMetadataCall::SELECTOR) {
                    ok(hex_data(&node.metadata))
                } else if selector == hex::encode(IFileRegistry::getFileOwnerCall::SELECTOR) {
                    ok(hex_data(EvmAddress::repeat_byte(0x22).abi_encode()))
                } else {
                    ok(hex_data(true.abi_encode()))
                }
            }
            "eth_estimateGas" if node.revert_estimate => Json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": 3,
                    "message": "execution reverted",
                    "data": hex_data(IFileRegistry::InvalidProof::SELECTOR),
                }
            })),
            "eth_estimateGas" => ok(serde_json::json!("0x30d40")),
            "eth_gasPrice" => ok(serde_json::json!("0x3b9aca00")),
            "eth_getTransactionCount" => ok(serde_json::json!("0x7")),
            "eth_chainId" => ok(serde_json::json!("0x1e0")),
            "eth_sendRawTransaction" => {
                let raw = params[0].as_str().unwrap_or_default().to_string();
                let bytes = hex::decode(&raw[2..]).unwrap_or_default();
                node.sent.lock().unwrap().push(raw);
                ok(hex_data(keccak256(&bytes)))
            }
            "eth_getTransactionReceipt" if node.pending_receipts => ok(serde_json::Value::Null),
            "eth_getTransactionReceipt" => ok(serde_json::json!({
                "transactionHash": params[0],
                "transactionIndex": "0x0",
                "blockHash": hex_data([0xbb; 32]),
                "blockNumber": "0x2a",
                "from": hex_data([0x44; 20]),
                "to": hex_data([0x99; 20]),
                "contractAddress": null,
                "cumulativeGasUsed": "0x5208",
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x3b9aca00",
                "logs": [],
                "logsBloom": hex_data([0u8; 256]),
                "status": node.receipt_status,
                "type": "0x0",
            })),
            other => panic!("unexpected method {other}"),
        }
    }

    async fn spawn(node: MockNode) -> (Arc<MockNode>, RpcRegistry) {
        let node = Arc::new(node);
        let app = axum::Router::new()
            .route("/", axum::routing::post(handle))
            .with_state(node.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let key = signing_key_from_hex(&format!("0x{}", "46".repeat(32))).unwrap();
        let registry = RpcRegistry::new(
            &format!("http://127.0.0.1:{port}"),
            Address::from_bytes([0x99; 20]),
            key,
            480,
            Duration::from_millis(300),
        )
        .unwrap()
        .with_poll_interval(Duration::from_millis(20));
        (node, registry)
    }

    fn proof() -> IdentityProof {
        IdentityProof {
            merkle_root: [1; 32],
            nullifier_hash: [2; 32],
            proof: [[3; 32]; 8],
            verification_level: "orb".into(),
            signal: String::new(),
        }
    }

    fn link() -> RegistryWrite {
        RegistryWrite::LinkCertificate {
            original_hash: ContentHash::from_bytes([1; 32]),
            certificate_hash: ContentHash::from_bytes([2; 32]),
        }
    }

    /// コールデータのレイアウト（固定長配列はhead、ラベルはtail）を確認
    #[test]
    fn test_encode_register_file_layout() {
        let data = encode_write(&RegistryWrite::RegisterOriginal {
            original_hash: ContentHash::from_bytes([0xaa; 32]),
            identity_label: "alice".into(),
            timestamp: 1_700_000_000,
            used_certification: false,
            proof: proof(),
        });
        assert_eq!(&data[..4], &IFileRegistry::registerFileCall::SELECTOR);
        let args = &data[4..];
        let word_at = |i: usize| &args[i * 32..(i + 1) * 32];
        // bytes32, offset, uint, bool, root, nullifier, uint256[8], tail(len + "alice")
        assert_eq!(args.len(), (6 + 8) * 32 + 64);
        assert_eq!(word_at(0), [0xaa; 32]);
        assert_eq!(U256::from_be_slice(word_at(2)), U256::from(1_700_000_000u64));
        assert_eq!(word_at(3), [0; 32]);
        assert_eq!(word_at(5), [2; 32]);
        assert_eq!(word_at(13), [3; 32]);
        assert_eq!(&word_at(15)[..5], b"alice");
    }

    #[test]
    fn test_encode_link_certificate() {
        let data = encode_write(&link());
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &IFileRegistry::linkCertificateCall::SELECTOR);
    }

    #[test]
    fn test_gas_limit_margin_saturates() {
        assert_eq!(gas_limit_with_margin(200_000), 240_000);
        assert_eq!(gas_limit_with_margin(0), 0);
        assert_eq!(gas_limit_with_margin(u64::MAX), u64::MAX);
        assert_eq!(gas_limit_with_margin(u64::MAX / 2), u64::MAX);
    }

    #[tokio::test]
    async fn test_reads() {
        let metadata = (
            String::new(),
            "alice".to_string(),
            U256::from(1_700_000_000u64),
            true,
            true,
        )
            .abi_encode_params();
        let (_node, registry) = spawn(MockNode {
            metadata,
            ..Default::default()
        })
        .await;
        let hash = ContentHash::from_bytes([0x33; 32]);

        assert_eq!(
            registry.resolve_original_hash(&hash).await.unwrap(),
            ContentHash::from_bytes([0x11; 32])
        );
        let record = registry.get_record_metadata(&hash).await.unwrap();
        assert_eq!(record.identity_label, "alice");
        assert_eq!(record.timestamp, 1_700_000_000);
        assert!(record.used_certification && record.exists);
        assert_eq!(registry.get_owner(&hash).await.unwrap(), Address::from_bytes([0x22; 20]));
        assert!(registry.is_registered(&hash).await.unwrap());
    }

    /// 送信から確定までの流れと、署名済みトランザクションの中身を確認
    #[tokio::test]
    async fn test_submit_and_confirm() {
        let (node, registry) = spawn(MockNode {
            receipt_status: "0x1",
            ..Default::default()
        })
        .await;
        let pending = registry.submit(link()).await.unwrap();
        assert_eq!(pending.method, "linkCertificate");

        let sent = node.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let raw = hex::decode(&sent[0][2..]).unwrap();
        assert_eq!(pending.id, format!("0x{}", hex::encode(keccak256(&raw))));
        // レガシー形式のRLPリストで、ノンス7が先頭フィールド
        assert_eq!(raw[0], 0xf8);
        assert_eq!(raw[2], 0x07);

        let confirmation = registry.await_confirmation(&pending).await.unwrap();
        assert_eq!(confirmation.block_number, 42);
        assert_eq!(confirmation.transaction_hash, pending.id);
    }

    #[tokio::test]
    async fn test_simulation_revert_is_proof_rejection() {
        let (node, registry) = spawn(MockNode {
            revert_estimate: true,
            ..Default::default()
        })
        .await;
        let err = registry.submit(link()).await.unwrap_err();
        assert!(matches!(err, TxError::ProofRejected(_)), "{err:?}");
        assert!(node.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_and_timeout() {
        let tx_hash = format!("0x{}", "de".repeat(32));
        let pending = PendingTx {
            id: tx_hash.clone(),
            method: "registerFile",
        };

        let (_node, registry) = spawn(MockNode {
            receipt_status: "0x0",
            ..Default::default()
        })
        .await;
        assert_eq!(
            registry.await_confirmation(&pending).await,
            Err(TxError::Reverted {
                transaction_hash: tx_hash.clone()
            })
        );

        let (_node, registry) = spawn(MockNode {
            pending_receipts: true,
            ..Default::default()
        })
        .await;
        assert_eq!(
            registry.await_confirmation(&pending).await,
            Err(TxError::Timeout(tx_hash))
        );
    }

    #[test]
    fn test_signer_address_matches_key() {
        let key = signing_key_from_hex(&format!("0x{}", "46".repeat(32))).unwrap();
        let expected = zzin_crypto::address_from_signing_key(&key);
        let registry = RpcRegistry::new(
            "http://127.0.0.1:8545",
            Address::from_bytes([0x99; 20]),
            key,
            480,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(registry.signer_address(), expected);
    }
}
