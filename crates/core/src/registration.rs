//! # 登録コーディネータ
//!
//! 原本・証明書ハッシュの計算から、証明の取得、書き込み方式の判断、送信、確定待ちまでを行う。
//!
//! ## 処理フロー
//! 1. `original = hash(原本)`、`certificate = hash(最終画像)` を計算する
//! 2. 原本ハッシュに束縛した証明を新たに取得する（証明書ハッシュには束縛しない）
//! 3. 原本が登録済みかをレジストリに問い合わせ、書き込み方式を決める
//! 4. 書き込みを送信する
//! 5. 確定を待つ（`confirm`）
//!
//! 登録済みの原本に新しい証明書を作った場合は `linkCertificate` だけを行い、
//! 既存レコードの識別ラベルと撮影時刻は変更しない。

use std::sync::Arc;

use zzin_crypto::ContentHash;

use crate::identity::{IdentityError, IdentityProof, IdentityProvider, WORLD_ID_ACTION};
use crate::media::Image;
use crate::registry::{
    PendingTx, RegistryError, RegistryReader, RegistryWrite, TransactionService, TxConfirmation,
    TxError,
};

/// 登録処理のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// 入力値が不正
    #[error("入力値が不正です: {0}")]
    InvalidInput(String),
    /// 証明の取得に失敗（キャンセル含む）
    #[error(transparent)]
    Proof(#[from] IdentityError),
    /// レジストリが証明を拒否した
    #[error("World ID証明が拒否されました。もう一度認証してください: {0}")]
    ProofRejected(String),
    /// 登録状態の確認に失敗
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// 送信に失敗
    #[error("トランザクションの送信に失敗しました: {detail}")]
    Submission {
        /// 送信サービスが返した詳細
        detail: String,
        /// 利用者向けの対処のヒント
        hint: Option<String>,
    },
    /// 確定待ちに失敗（トランザクションは後から確定する可能性がある）
    #[error("トランザクションの確定を確認できませんでした: {0}")]
    Confirmation(String),
    /// 確定待ちがタイムアウトした
    #[error("トランザクションの確定待ちがタイムアウトしました: {0}")]
    ConfirmationTimeout(String),
}

impl RegistrationError {
    /// 利用者向けの対処のヒント
    pub fn hint(&self) -> Option<&str> {
        match self {
            RegistrationError::Submission { hint, .. } => hint.as_deref(),
            RegistrationError::ConfirmationTimeout(_) => {
                Some("トランザクションは後から確定する場合があります。時間をおいて検証してください")
            }
            _ => None,
        }
    }

    /// 送信エラーを変換する。拒否理由からヒントを付ける。
    fn from_submission(err: TxError) -> Self {
        match err {
            TxError::ProofRejected(reason) => RegistrationError::ProofRejected(reason),
            TxError::Simulation(detail) | TxError::Rejected(detail) | TxError::Unavailable(detail) => {
                let hint = submission_hint(&detail).map(str::to_string);
                RegistrationError::Submission { detail, hint }
            }
            other => RegistrationError::Submission {
                detail: other.to_string(),
                hint: None,
            },
        }
    }

    fn from_confirmation(err: TxError) -> Self {
        match err {
            TxError::Timeout(id) => RegistrationError::ConfirmationTimeout(id),
            other => RegistrationError::Confirmation(other.to_string()),
        }
    }
}

/// 送信失敗の詳細から利用者向けのヒントを選ぶ。
pub fn submission_hint(detail: &str) -> Option<&'static str> {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("simulation") {
        Some("コントラクトの事前実行に失敗しました。ハッシュが既に登録されていないか確認してください")
    } else if lower.contains("access list") || lower.contains("accesslist") || lower.contains("disallowed") {
        Some("このコントラクトはアプリのアクセスリストで許可されていません。Developer Portalの設定を確認してください")
    } else if lower.contains("insufficient funds") {
        Some("送信アカウントのガス代が不足しています")
    } else if lower.contains("nonce") {
        Some("ノンスが競合しました。もう一度送信してください")
    } else if lower.contains("alreadyregistered") || lower.contains("alreadylinked") {
        Some("このハッシュは既に登録されています")
    } else {
        None
    }
}

/// 書き込み方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPlan {
    /// 未登録、証明書なし
    RegisterOriginal,
    /// 未登録、証明書あり
    RegisterWithCertificate,
    /// 登録済みの原本に新しい証明書を追加
    LinkCertificate,
    /// 登録済みで追加するものがない（書き込みなし）
    AlreadyRegistered,
}

impl RegistrationPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationPlan::RegisterOriginal => "registerFile",
            RegistrationPlan::RegisterWithCertificate => "registerFileWithCertificate",
            RegistrationPlan::LinkCertificate => "linkCertificate",
            RegistrationPlan::AlreadyRegistered => "alreadyRegistered",
        }
    }
}

/// 検証済みの登録要求。
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub original_hash: ContentHash,
    /// 原本と異なる証明書ハッシュ（なければNone）
    pub certificate_hash: Option<ContentHash>,
    pub identity_label: String,
    /// 撮影時刻（UNIX秒）
    pub timestamp: u64,
    /// 原本ハッシュに束縛された証明
    pub proof: IdentityProof,
    used_certification: bool,
}

impl RegistrationRequest {
    /// 証明書ハッシュが原本と同じ場合は「証明書なし」として扱う。
    pub fn new(
        original_hash: ContentHash,
        certificate_hash: Option<ContentHash>,
        identity_label: impl Into<String>,
        timestamp: u64,
        proof: IdentityProof,
    ) -> Self {
        let certificate_hash = certificate_hash.filter(|c| *c != original_hash);
        Self {
            original_hash,
            certificate_hash,
            identity_label: identity_label.into(),
            timestamp,
            proof,
            used_certification: certificate_hash.is_some(),
        }
    }

    /// クライアントが申告した証明書ツールの使用有無で上書きする。
    pub fn with_used_certification(mut self, used: bool) -> Self {
        self.used_certification = used;
        self
    }

    /// 証明書ツールを使ったか。既定では証明書ハッシュの有無。
    pub fn used_certification(&self) -> bool {
        self.used_certification
    }
}

/// 送信結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub plan: RegistrationPlan,
    pub original_hash: ContentHash,
    pub certificate_hash: Option<ContentHash>,
    pub used_certification: bool,
    /// 書き込みを行った場合の確定待ちハンドル
    pub pending: Option<PendingTx>,
}

/// 登録コーディネータ。
pub struct RegistrationCoordinator {
    identity: Option<Arc<dyn IdentityProvider>>,
    reader: Arc<dyn RegistryReader>,
    transactions: Arc<dyn TransactionService>,
}

impl RegistrationCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        reader: Arc<dyn RegistryReader>,
        transactions: Arc<dyn TransactionService>,
    ) -> Self {
        Self {
            identity: Some(identity),
            reader,
            transactions,
        }
    }

    /// 証明を自前で取得せず、呼び出し側が提示した証明だけを扱う（`submit` のみ使用可能）。
    pub fn for_presented_proofs(
        reader: Arc<dyn RegistryReader>,
        transactions: Arc<dyn TransactionService>,
    ) -> Self {
        Self {
            identity: None,
            reader,
            transactions,
        }
    }

    /// 最終画像と原本から登録を行う（手順1〜4）。
    pub async fn register(
        &self,
        final_image: &Image,
        base_image: &Image,
        identity_label: &str,
        timestamp: u64,
    ) -> Result<Submission, RegistrationError> {
        let label = identity_label.trim();
        if label.is_empty() {
            return Err(RegistrationError::InvalidInput("識別ラベルが空です".to_string()));
        }

        let original_hash = base_image.content_hash();
        let certificate_hash = final_image.content_hash();

        // 証明は毎回取得し直し、常に原本ハッシュに束縛する
        let signal = original_hash.to_hex();
        let identity = self.identity.as_ref().ok_or_else(|| {
            IdentityError::Unavailable("証明の発行元が設定されていません".to_string())
        })?;
        let payload = identity.request_proof(WORLD_ID_ACTION, &signal).await?;
        let proof = IdentityProof::from_payload(&payload, &signal)?;

        let request = RegistrationRequest::new(
            original_hash,
            Some(certificate_hash),
            label,
            timestamp,
            proof,
        );
        self.submit(request).await
    }

    /// 書き込み方式を決める（手順3）。
    pub async fn plan(
        &self,
        original_hash: &ContentHash,
        certificate_hash: Option<&ContentHash>,
    ) -> Result<RegistrationPlan, RegistrationError> {
        let registered = self.reader.is_registered(original_hash).await?;
        let plan = match (registered, certificate_hash) {
            (false, None) => RegistrationPlan::RegisterOriginal,
            (false, Some(_)) => RegistrationPlan::RegisterWithCertificate,
            (true, None) => RegistrationPlan::AlreadyRegistered,
            (true, Some(certificate)) => {
                let resolved = self.reader.resolve_original_hash(certificate).await?;
                if resolved == *original_hash {
                    RegistrationPlan::AlreadyRegistered
                } else {
                    RegistrationPlan::LinkCertificate
                }
            }
        };
        Ok(plan)
    }

    /// 証明を取得済みの要求を送信する（手順3〜4）。
    pub async fn submit(&self, request: RegistrationRequest) -> Result<Submission, RegistrationError> {
        if request.original_hash.is_zero() {
            return Err(RegistrationError::InvalidInput("fileHashにゼロハッシュは使えません".to_string()));
        }
        if !request.proof.is_bound_to(&request.original_hash.to_hex()) {
            return Err(RegistrationError::InvalidInput(
                "証明が原本ハッシュに束縛されていません".to_string(),
            ));
        }

        let plan = self
            .plan(&request.original_hash, request.certificate_hash.as_ref())
            .await?;
        let used_certification = request.used_certification();

        let write = match (plan, request.certificate_hash) {
            (RegistrationPlan::AlreadyRegistered, _) => None,
            (RegistrationPlan::LinkCertificate, Some(certificate_hash)) => {
                Some(RegistryWrite::LinkCertificate {
                    original_hash: request.original_hash,
                    certificate_hash,
                })
            }
            (RegistrationPlan::RegisterWithCertificate, Some(certificate_hash)) => {
                Some(RegistryWrite::RegisterWithCertificate {
                    original_hash: request.original_hash,
                    certificate_hash,
                    identity_label: request.identity_label.clone(),
                    timestamp: request.timestamp,
                    used_certification,
                    proof: request.proof.clone(),
                })
            }
            _ => Some(RegistryWrite::RegisterOriginal {
                original_hash: request.original_hash,
                identity_label: request.identity_label.clone(),
                timestamp: request.timestamp,
                used_certification,
                proof: request.proof.clone(),
            }),
        };

        let pending = match write {
            Some(write) => {
                let pending = self
                    .transactions
                    .submit(write)
                    .await
                    .map_err(RegistrationError::from_submission)?;
                tracing::info!(
                    file_hash = %request.original_hash,
                    plan = plan.as_str(),
                    tx_id = %pending.id,
                    "登録トランザクションを送信しました"
                );
                Some(pending)
            }
            None => {
                tracing::info!(file_hash = %request.original_hash, "登録済みのため書き込みを省略します");
                None
            }
        };

        Ok(Submission {
            plan,
            original_hash: request.original_hash,
            certificate_hash: request.certificate_hash,
            used_certification,
            pending,
        })
    }

    /// 送信済みトランザクションの確定を待つ（手順5）。
    pub async fn confirm(&self, pending: &PendingTx) -> Result<TxConfirmation, RegistrationError> {
        let confirmation = self
            .transactions
            .await_confirmation(pending)
            .await
            .map_err(RegistrationError::from_confirmation)?;
        tracing::info!(
            tx_id = %pending.id,
            transaction_hash = %confirmation.transaction_hash,
            block_number = confirmation.block_number,
            "登録トランザクションが確定しました"
        );
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MockIdentity;
    use crate::registry::InMemoryRegistry;
    use zzin_crypto::Address;

    struct Fixture {
        identity: Arc<MockIdentity>,
        registry: Arc<InMemoryRegistry>,
        coordinator: RegistrationCoordinator,
    }

    fn fixture() -> Fixture {
        let identity = Arc::new(MockIdentity::new("alice"));
        let registry = Arc::new(InMemoryRegistry::new(Address::from_bytes([7; 20])));
        let coordinator = RegistrationCoordinator::new(
            identity.clone(),
            registry.clone(),
            registry.clone(),
        );
        Fixture {
            identity,
            registry,
            coordinator,
        }
    }

    fn image(tag: &[u8]) -> Image {
        Image::from(tag.to_vec())
    }

    async fn register_and_confirm(
        f: &Fixture,
        final_image: &Image,
        base: &Image,
        label: &str,
        timestamp: u64,
    ) -> Submission {
        let submission = f
            .coordinator
            .register(final_image, base, label, timestamp)
            .await
            .unwrap();
        if let Some(pending) = &submission.pending {
            f.coordinator.confirm(pending).await.unwrap();
        }
        submission
    }

    /// 証明が常に原本ハッシュに束縛されることを確認
    #[tokio::test]
    async fn test_proof_bound_to_original_hash() {
        let f = fixture();
        let base = image(b"base");
        let certificate = image(b"certificate");
        register_and_confirm(&f, &certificate, &base, "alice", 1_700_000_000).await;
        assert_eq!(f.identity.requested_signals(), vec![base.content_hash().to_hex()]);
    }

    #[tokio::test]
    async fn test_plans() {
        let f = fixture();
        let base = image(b"base");

        // 証明書なし
        let first = register_and_confirm(&f, &base, &base, "alice", 1).await;
        assert_eq!(first.plan, RegistrationPlan::RegisterOriginal);
        assert!(!first.used_certification);
        assert!(first.certificate_hash.is_none());

        // 登録済み、証明書なし → 書き込みなし
        let again = register_and_confirm(&f, &base, &base, "alice", 2).await;
        assert_eq!(again.plan, RegistrationPlan::AlreadyRegistered);
        assert!(again.pending.is_none());

        // 登録済み、新しい証明書 → link
        let certificate = image(b"certificate");
        let link = register_and_confirm(&f, &certificate, &base, "alice", 3).await;
        assert_eq!(link.plan, RegistrationPlan::LinkCertificate);
        assert_eq!(link.pending.as_ref().map(|p| p.method), Some("linkCertificate"));

        // 同じ証明書をもう一度 → 書き込みなし
        let repeat = register_and_confirm(&f, &certificate, &base, "alice", 4).await;
        assert_eq!(repeat.plan, RegistrationPlan::AlreadyRegistered);

        // 未登録の原本と証明書 → 同時登録
        let other = image(b"other");
        let other_certificate = image(b"other-certificate");
        let fresh = register_and_confirm(&f, &other_certificate, &other, "alice", 5).await;
        assert_eq!(fresh.plan, RegistrationPlan::RegisterWithCertificate);
        assert!(fresh.used_certification);
    }

    /// 2回目の登録で識別ラベルと撮影時刻が変わらないことを確認
    #[tokio::test]
    async fn test_second_registration_keeps_metadata() {
        let f = fixture();
        let base = image(b"base");
        register_and_confirm(&f, &image(b"cert-1"), &base, "alice", 1_700_000_000).await;
        let second = register_and_confirm(&f, &image(b"cert-2"), &base, "mallory", 1_800_000_000).await;
        assert_eq!(second.plan, RegistrationPlan::LinkCertificate);

        let metadata = f
            .registry
            .get_record_metadata(&base.content_hash())
            .await
            .unwrap();
        assert_eq!(metadata.identity_label, "alice");
        assert_eq!(metadata.timestamp, 1_700_000_000);
        assert_eq!(f.registry.record_count().await, 1);
        assert_eq!(
            f.registry
                .resolve_original_hash(&image(b"cert-2").content_hash())
                .await
                .unwrap(),
            base.content_hash()
        );
    }

    #[tokio::test]
    async fn test_proof_cancelled() {
        let f = fixture();
        f.identity.cancel_next();
        let err = f
            .coordinator
            .register(&image(b"c"), &image(b"b"), "alice", 1)
            .await
            .unwrap_err();
        assert_eq!(err, RegistrationError::Proof(IdentityError::Cancelled));
    }

    /// 送信失敗にはヒントが付き、確定待ちの失敗と区別されることを確認
    #[tokio::test]
    async fn test_submission_and_confirmation_errors() {
        let f = fixture();
        f.registry.fail_next_submit("simulation_failed").await;
        let err = f
            .coordinator
            .register(&image(b"c"), &image(b"b"), "alice", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Submission { .. }));
        assert!(err.hint().is_some());

        let submission = f
            .coordinator
            .register(&image(b"c"), &image(b"b"), "alice", 1)
            .await
            .unwrap();
        let pending = submission.pending.unwrap();
        f.registry.hold_confirmations(true).await;
        let err = f.coordinator.confirm(&pending).await.unwrap_err();
        assert!(matches!(err, RegistrationError::ConfirmationTimeout(_)));
        assert!(err.hint().is_some());

        f.registry.hold_confirmations(false).await;
        assert!(f.coordinator.confirm(&pending).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_rejects_unbound_proof() {
        let f = fixture();
        let original = image(b"base").content_hash();
        let payload = f.identity.payload_for(WORLD_ID_ACTION, "0xother");
        let proof = IdentityProof::from_payload(&payload, "0xother").unwrap();
        let err = f
            .coordinator
            .submit(RegistrationRequest::new(original, None, "alice", 1, proof))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput(_)));
    }

    /// 申告された証明書ツールの使用有無が登録内容に反映されることを確認
    #[tokio::test]
    async fn test_presented_proof_submission() {
        let f = fixture();
        let coordinator =
            RegistrationCoordinator::for_presented_proofs(f.registry.clone(), f.registry.clone());
        let original = image(b"base").content_hash();
        let payload = f.identity.payload_for(WORLD_ID_ACTION, &original.to_hex());
        let proof = IdentityProof::from_payload(&payload, &original.to_hex()).unwrap();
        let request =
            RegistrationRequest::new(original, None, "alice", 1, proof).with_used_certification(true);

        let submission = coordinator.submit(request).await.unwrap();
        assert_eq!(submission.plan, RegistrationPlan::RegisterOriginal);
        assert!(submission.used_certification);
        coordinator.confirm(&submission.pending.unwrap()).await.unwrap();
        assert!(f.registry.get_record_metadata(&original).await.unwrap().used_certification);

        let err = coordinator
            .register(&image(b"c"), &image(b"b"), "alice", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Proof(IdentityError::Unavailable(_))));
    }

    #[test]
    fn test_submission_hint() {
        assert!(submission_hint("simulation_failed").is_some());
        assert!(submission_hint("Contract not in access list").is_some());
        assert!(submission_hint("boom").is_none());
    }
}
