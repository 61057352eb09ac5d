//! # インメモリレジストリ
//!
//! レジストリコントラクトと同じ規則をメモリ上で再現する。
//! `MOCK_MODE=true` のGatewayとテストで使用する。
//!
//! - 登録時の証明は原本ハッシュ（`0x` 付き16進数文字列）に束縛されている必要がある
//! - 一度確定したヌリファイアは再利用できない
//! - `submit` は事前実行のみを行い、状態は `await_confirmation` で変更される

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use zzin_crypto::{keccak256, signal_hash, Address, ContentHash};

use super::{
    PendingTx, RecordMetadata, RegistryError, RegistryReader, RegistryWrite, TransactionService,
    TxConfirmation, TxError,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    metadata: RecordMetadata,
    owner: Address,
}

#[derive(Debug)]
struct PendingEntry {
    write: RegistryWrite,
    confirmation: Option<TxConfirmation>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<ContentHash, StoredRecord>,
    /// 証明書ハッシュ → 原本ハッシュ
    certificates: HashMap<ContentHash, ContentHash>,
    used_nullifiers: HashSet<[u8; 32]>,
    transactions: HashMap<String, PendingEntry>,
    nonce: u64,
    block_number: u64,
    unavailable: bool,
    fail_next_submit: Option<String>,
    revert_next_confirmation: bool,
    hold_confirmations: bool,
}

impl State {
    fn resolve(&self, hash: &ContentHash) -> ContentHash {
        if self.records.contains_key(hash) {
            *hash
        } else {
            self.certificates.get(hash).copied().unwrap_or(ContentHash::ZERO)
        }
    }

    /// コントラクトの事前条件。失敗時はリバート理由を返す。
    fn check(&self, write: &RegistryWrite) -> Result<(), TxError> {
        let original = write.original_hash();
        if original.is_zero() {
            return Err(TxError::Simulation("InvalidFileHash".to_string()));
        }
        if let Some(certificate) = write.certificate_hash() {
            if certificate.is_zero() || certificate == original {
                return Err(TxError::Simulation("InvalidCertificateHash".to_string()));
            }
            if self.resolve(&certificate) != ContentHash::ZERO {
                return Err(TxError::Simulation("CertificateAlreadyLinked".to_string()));
            }
        }

        match write {
            RegistryWrite::RegisterOriginal { proof, .. }
            | RegistryWrite::RegisterWithCertificate { proof, .. } => {
                if self.records.contains_key(&original) {
                    return Err(TxError::Simulation("FileAlreadyRegistered".to_string()));
                }
                if self.certificates.contains_key(&original) {
                    return Err(TxError::Simulation("HashIsCertificate".to_string()));
                }
                if proof.proof[0] != signal_hash(original.to_hex().as_bytes()) {
                    return Err(TxError::ProofRejected("InvalidProof".to_string()));
                }
                if self.used_nullifiers.contains(&proof.nullifier_hash) {
                    return Err(TxError::ProofRejected("NullifierAlreadyUsed".to_string()));
                }
            }
            RegistryWrite::LinkCertificate { .. } => {
                if !self.records.contains_key(&original) {
                    return Err(TxError::Simulation("FileNotRegistered".to_string()));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: &RegistryWrite, owner: Address) {
        match write {
            RegistryWrite::RegisterOriginal {
                original_hash,
                identity_label,
                timestamp,
                used_certification,
                proof,
            } => {
                self.used_nullifiers.insert(proof.nullifier_hash);
                self.records.insert(
                    *original_hash,
                    StoredRecord {
                        metadata: RecordMetadata {
                            location: String::new(),
                            identity_label: identity_label.clone(),
                            timestamp: *timestamp,
                            used_certification: *used_certification,
                            exists: true,
                        },
                        owner,
                    },
                );
            }
            RegistryWrite::RegisterWithCertificate {
                original_hash,
                certificate_hash,
                identity_label,
                timestamp,
                used_certification,
                proof,
            } => {
                self.used_nullifiers.insert(proof.nullifier_hash);
                self.records.insert(
                    *original_hash,
                    StoredRecord {
                        metadata: RecordMetadata {
                            location: String::new(),
                            identity_label: identity_label.clone(),
                            timestamp: *timestamp,
                            used_certification: *used_certification,
                            exists: true,
                        },
                        owner,
                    },
                );
                self.certificates.insert(*certificate_hash, *original_hash);
            }
            RegistryWrite::LinkCertificate {
                original_hash,
                certificate_hash,
            } => {
                self.certificates.insert(*certificate_hash, *original_hash);
                if let Some(record) = self.records.get_mut(original_hash) {
                    record.metadata.used_certification = true;
                }
            }
        }
    }
}

/// メモリ上のレジストリ。読み取りと書き込みの両方を提供する。
pub struct InMemoryRegistry {
    owner: Address,
    state: Mutex<State>,
}

impl InMemoryRegistry {
    /// `owner` は書き込みを行うアカウント（Gatewayの署名者に相当）。
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            state: Mutex::new(State::default()),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    /// 読み取りを失敗させる（`false` で復旧）。
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// 次の送信を指定した理由で失敗させる。
    pub async fn fail_next_submit(&self, reason: &str) {
        self.state.lock().await.fail_next_submit = Some(reason.to_string());
    }

    /// 次の確定待ちをリバートさせる。
    pub async fn revert_next_confirmation(&self) {
        self.state.lock().await.revert_next_confirmation = true;
    }

    /// 確定待ちをタイムアウトさせ続ける（`false` で解除）。
    pub async fn hold_confirmations(&self, hold: bool) {
        self.state.lock().await.hold_confirmations = hold;
    }

    /// 確定済みのレコード数
    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }
}

#[async_trait::async_trait]
impl RegistryReader for InMemoryRegistry {
    async fn resolve_original_hash(&self, hash: &ContentHash) -> Result<ContentHash, RegistryError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("インメモリレジストリが停止中です".to_string()));
        }
        Ok(state.resolve(hash))
    }

    async fn get_record_metadata(&self, original_hash: &ContentHash) -> Result<RecordMetadata, RegistryError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("インメモリレジストリが停止中です".to_string()));
        }
        Ok(state
            .records
            .get(original_hash)
            .map(|r| r.metadata.clone())
            .unwrap_or_default())
    }

    async fn get_owner(&self, hash: &ContentHash) -> Result<Address, RegistryError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("インメモリレジストリが停止中です".to_string()));
        }
        Ok(state.records.get(hash).map(|r| r.owner).unwrap_or(Address::ZERO))
    }

    async fn is_registered(&self, hash: &ContentHash) -> Result<bool, RegistryError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(RegistryError::Unavailable("インメモリレジストリが停止中です".to_string()));
        }
        Ok(state.records.contains_key(hash))
    }
}

#[async_trait::async_trait]
impl TransactionService for InMemoryRegistry {
    async fn submit(&self, write: RegistryWrite) -> Result<PendingTx, TxError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.fail_next_submit.take() {
            return Err(TxError::Simulation(reason));
        }
        state.check(&write)?;

        state.nonce += 1;
        let mut seed = state.nonce.to_be_bytes().to_vec();
        seed.extend_from_slice(write.original_hash().as_bytes());
        let id = format!("0x{}", hex::encode(keccak256(&seed)));
        let method = write.method();

        tracing::debug!(tx_id = %id, method, "インメモリレジストリに送信しました");
        state.transactions.insert(
            id.clone(),
            PendingEntry {
                write,
                confirmation: None,
            },
        );
        Ok(PendingTx { id, method })
    }

    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxConfirmation, TxError> {
        let mut state = self.state.lock().await;
        if state.hold_confirmations {
            return Err(TxError::Timeout(pending.id.clone()));
        }
        let revert = std::mem::take(&mut state.revert_next_confirmation);

        let entry = state
            .transactions
            .get(&pending.id)
            .ok_or_else(|| TxError::Rejected(format!("不明なトランザクション: {}", pending.id)))?;
        if let Some(confirmation) = &entry.confirmation {
            return Ok(confirmation.clone());
        }
        let write = entry.write.clone();

        // 送信後に状態が変わっている場合があるため、取り込み時に再検証する
        if revert || state.check(&write).is_err() {
            state.transactions.remove(&pending.id);
            return Err(TxError::Reverted {
                transaction_hash: pending.id.clone(),
            });
        }

        state.apply(&write, self.owner);
        state.block_number += 1;
        let confirmation = TxConfirmation {
            transaction_hash: pending.id.clone(),
            block_number: state.block_number,
        };
        if let Some(entry) = state.transactions.get_mut(&pending.id) {
            entry.confirmation = Some(confirmation.clone());
        }
        Ok(confirmation)
    }
}
