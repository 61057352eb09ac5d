//! # 撮影・証明フロー
//!
//! ログインから撮影、証明書の選択、登録、検証までの画面遷移を状態機械として扱う。
//!
//! ## 状態遷移
//! ```text
//! Unauthenticated → MenuReady → LiveCapture → PreviewCaptured
//!     → CertificateSelection → RegistrationPrompt → Completed
//! MenuReady → VerifyUpload → VerifyScanning → VerifyResult
//! ```
//!
//! ネットワークを伴う遷移が失敗した場合、状態は遷移前のまま `last_error` にエラーを保持する。
//! 撮影済みの画像は失われないため、撮り直さずに再試行できる。
//! `go_back` はどの状態からでもメニューに戻り、撮影セッションを破棄する。
//!
//! 登録トランザクションの確定待ちはフローの外で行い、結果は
//! `apply_confirmation` で反映する。チケットが現在のセッションの送信と一致しない場合は無視する。

use std::sync::Arc;

use uuid::Uuid;
use zzin_crypto::ContentHash;

use crate::capture::{Camera, CameraError, FacingMode, LiveStream};
use crate::clock::Clock;
use crate::compositor::{
    compose_concurrently, CertificateMetadata, CertificateVariant, ComposeError, OutputEncoding,
};
use crate::identity::{
    IdentityError, IdentityProof, IdentityProvider, IdentityVerifier, WalletConnector,
    WalletSession, WORLD_ID_ACTION,
};
use crate::media::{export_file_name, Image};
use crate::registration::{RegistrationCoordinator, RegistrationError, Submission};
use crate::registry::{PendingTx, RegistryReader, TransactionService, TxConfirmation};
use crate::verification::{ResolveError, VerificationResolver, VerificationResult, VerifyInput};

/// 画面の状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unauthenticated,
    MenuReady,
    LiveCapture,
    PreviewCaptured,
    CertificateSelection,
    RegistrationPrompt,
    Completed,
    VerifyUpload,
    VerifyScanning,
    VerifyResult,
}

/// フローのエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// 現在の状態では実行できない操作
    #[error("{action} は現在の状態（{mode:?}）では実行できません")]
    InvalidTransition {
        /// 現在の状態
        mode: Mode,
        /// 要求された操作
        action: &'static str,
    },
    /// 操作の引数が不正
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Verification(#[from] ResolveError),
}

impl FlowError {
    /// 再試行で回復できるか。カメラ権限の拒否だけは端末の設定が必要。
    pub fn is_recoverable(&self) -> bool {
        match self {
            FlowError::Camera(err) => err.is_recoverable(),
            _ => true,
        }
    }

    /// 利用者向けの対処のヒント
    pub fn hint(&self) -> Option<&str> {
        match self {
            FlowError::Registration(err) => err.hint(),
            FlowError::Camera(CameraError::PermissionDenied) => {
                Some("端末の設定アプリでカメラへのアクセスを許可してください")
            }
            FlowError::Identity(_) => Some("もう一度World IDで認証してください"),
            _ => None,
        }
    }
}

/// ログイン中のセッション。ログインで作られ、ログアウトで破棄される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: Uuid,
    /// 本人確認した時刻（UNIX秒）
    pub verified_at: u64,
    /// 接続済みウォレット（撮影開始時に接続する）
    pub wallet: Option<WalletSession>,
}

impl SessionContext {
    pub fn identity_label(&self) -> Option<String> {
        self.wallet.as_ref().map(WalletSession::identity_label)
    }
}

/// 登録トランザクションの確定待ちチケット。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationTicket {
    /// 送信したときの撮影セッション番号
    pub epoch: u64,
    pub pending: PendingTx,
}

/// 登録の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// 利用者が登録しなかった
    Skipped,
    /// 登録済みのため書き込みなし
    AlreadyRegistered(Submission),
    /// 送信済み、確定待ち
    Pending {
        submission: Submission,
        ticket: ConfirmationTicket,
    },
    Confirmed {
        submission: Submission,
        confirmation: TxConfirmation,
    },
    Failed {
        submission: Submission,
        error: RegistrationError,
    },
}

/// `apply_confirmation` の結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Applied,
    /// 破棄済みセッションのチケットなので無視した
    Stale,
}

/// 1回の撮影に紐づく状態。メニューに戻ると破棄される。
#[derive(Debug, Clone)]
pub struct CaptureSession {
    epoch: u64,
    facing: FacingMode,
    base_image: Option<Image>,
    original_hash: Option<ContentHash>,
    captured_at: Option<u64>,
    variants: Vec<(CertificateVariant, Image)>,
    selected_variant: Option<CertificateVariant>,
    final_image: Option<Image>,
    final_hash: Option<ContentHash>,
    outcome: Option<RegistrationOutcome>,
}

impl CaptureSession {
    fn new(epoch: u64, facing: FacingMode) -> Self {
        Self {
            epoch,
            facing,
            base_image: None,
            original_hash: None,
            captured_at: None,
            variants: Vec::new(),
            selected_variant: None,
            final_image: None,
            final_hash: None,
            outcome: None,
        }
    }

    fn discard_capture(&mut self) {
        self.base_image = None;
        self.original_hash = None;
        self.captured_at = None;
        self.variants.clear();
        self.selected_variant = None;
        self.final_image = None;
        self.final_hash = None;
        self.outcome = None;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// 撮影した原本画像
    pub fn base_image(&self) -> Option<&Image> {
        self.base_image.as_ref()
    }

    pub fn original_hash(&self) -> Option<ContentHash> {
        self.original_hash
    }

    /// 撮影時刻（UNIX秒）
    pub fn captured_at(&self) -> Option<u64> {
        self.captured_at
    }

    pub fn variants(&self) -> &[(CertificateVariant, Image)] {
        &self.variants
    }

    pub fn selected_variant(&self) -> Option<CertificateVariant> {
        self.selected_variant
    }

    /// 登録対象の最終画像
    pub fn final_image(&self) -> Option<&Image> {
        self.final_image.as_ref()
    }

    pub fn final_hash(&self) -> Option<ContentHash> {
        self.final_hash
    }

    pub fn outcome(&self) -> Option<&RegistrationOutcome> {
        self.outcome.as_ref()
    }
}

/// フローが利用する外部サービス。
#[derive(Clone)]
pub struct FlowServices {
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub identity_verifier: Arc<dyn IdentityVerifier>,
    pub wallet: Arc<dyn WalletConnector>,
    pub camera: Arc<dyn Camera>,
    pub registry: Arc<dyn RegistryReader>,
    pub transactions: Arc<dyn TransactionService>,
    pub clock: Arc<dyn Clock>,
}

/// 撮影・証明・登録・検証の状態機械。
pub struct CaptureFlow {
    services: FlowServices,
    coordinator: Arc<RegistrationCoordinator>,
    resolver: VerificationResolver,
    encoding: OutputEncoding,
    mode: Mode,
    session: Option<SessionContext>,
    capture: Option<CaptureSession>,
    stream: Option<LiveStream>,
    verification: Option<VerificationResult>,
    last_error: Option<FlowError>,
    next_epoch: u64,
}

impl CaptureFlow {
    pub fn new(services: FlowServices) -> Self {
        Self::with_encoding(services, OutputEncoding::default())
    }

    /// 証明書画像の出力形式を指定して構築する。
    pub fn with_encoding(services: FlowServices, encoding: OutputEncoding) -> Self {
        let coordinator = Arc::new(RegistrationCoordinator::new(
            Arc::clone(&services.identity_provider),
            Arc::clone(&services.registry),
            Arc::clone(&services.transactions),
        ));
        let resolver = VerificationResolver::new(Arc::clone(&services.registry));
        Self {
            services,
            coordinator,
            resolver,
            encoding,
            mode: Mode::Unauthenticated,
            session: None,
            capture: None,
            stream: None,
            verification: None,
            last_error: None,
            next_epoch: 1,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    pub fn capture_session(&self) -> Option<&CaptureSession> {
        self.capture.as_ref()
    }

    pub fn verification(&self) -> Option<&VerificationResult> {
        self.verification.as_ref()
    }

    pub fn last_error(&self) -> Option<&FlowError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// カメラが起動しているか
    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// 確定待ちをフローの外で行うためのコーディネータ。
    pub fn coordinator(&self) -> Arc<RegistrationCoordinator> {
        Arc::clone(&self.coordinator)
    }

    fn transition(&mut self, to: Mode) {
        tracing::debug!(from = ?self.mode, to = ?to, "画面遷移");
        self.mode = to;
    }

    fn guard(&self, allowed: &[Mode], action: &'static str) -> Result<(), FlowError> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition {
                mode: self.mode,
                action,
            })
        }
    }

    fn record<T>(&mut self, result: Result<T, FlowError>) -> Result<T, FlowError> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(mode = ?self.mode, error = %err, "操作に失敗しました");
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn capture_mut(&mut self, action: &'static str) -> Result<&mut CaptureSession, FlowError> {
        let mode = self.mode;
        self.capture
            .as_mut()
            .ok_or(FlowError::InvalidTransition { mode, action })
    }

    // -----------------------------------------------------------------------
    // ログイン
    // -----------------------------------------------------------------------

    /// World IDで本人確認してメニューに進む。
    pub async fn login(&mut self) -> Result<(), FlowError> {
        let result = self.do_login().await;
        self.record(result)
    }

    async fn do_login(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::Unauthenticated], "login")?;

        let signal = format!("login-{}", self.services.clock.now_millis());
        let payload = self
            .services
            .identity_provider
            .request_proof(WORLD_ID_ACTION, &signal)
            .await?;
        let proof = IdentityProof::from_payload(&payload, &signal)?;
        self.services
            .identity_verifier
            .verify(&proof, WORLD_ID_ACTION)
            .await?
            .into_result()?;

        let session = SessionContext {
            session_id: Uuid::new_v4(),
            verified_at: self.services.clock.now_unix(),
            wallet: None,
        };
        tracing::info!(session_id = %session.session_id, "ログインしました");
        self.session = Some(session);
        self.transition(Mode::MenuReady);
        Ok(())
    }

    /// セッションを破棄して未ログイン状態に戻る。
    pub fn logout(&mut self) {
        self.stream = None;
        self.capture = None;
        self.verification = None;
        self.session = None;
        self.last_error = None;
        self.transition(Mode::Unauthenticated);
    }

    // -----------------------------------------------------------------------
    // 撮影
    // -----------------------------------------------------------------------

    /// 撮影を開始する。ウォレット未接続なら先に接続する。
    pub async fn start_capture(&mut self) -> Result<(), FlowError> {
        let result = self.do_start_capture().await;
        self.record(result)
    }

    async fn do_start_capture(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::MenuReady], "start_capture")?;

        let has_wallet = self.session.as_ref().is_some_and(|s| s.wallet.is_some());
        if !has_wallet {
            let wallet = self.services.wallet.connect().await?;
            tracing::info!(wallet = %wallet.address, "ウォレットを接続しました");
            if let Some(session) = self.session.as_mut() {
                session.wallet = Some(wallet);
            }
        }

        let facing = FacingMode::default();
        let stream = LiveStream::open(self.services.camera.as_ref(), facing).await?;
        self.stream = Some(stream);

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.capture = Some(CaptureSession::new(epoch, facing));
        self.verification = None;
        self.transition(Mode::LiveCapture);
        Ok(())
    }

    /// 前面・背面カメラを切り替える。新しいストリームの取得前に現在のものを解放する。
    pub async fn toggle_facing(&mut self) -> Result<(), FlowError> {
        let result = self.do_toggle_facing().await;
        self.record(result)
    }

    async fn do_toggle_facing(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::LiveCapture], "toggle_facing")?;
        let facing = self.capture_mut("toggle_facing")?.facing.toggled();

        self.stream = None;
        let stream = LiveStream::open(self.services.camera.as_ref(), facing).await?;
        self.stream = Some(stream);
        self.capture_mut("toggle_facing")?.facing = facing;
        Ok(())
    }

    /// 現在のフレームを撮影する。撮影時刻はこの瞬間の時計から取る。
    pub async fn capture(&mut self) -> Result<(), FlowError> {
        let result = self.do_capture().await;
        self.record(result)
    }

    async fn do_capture(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::LiveCapture], "capture")?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::Unavailable("カメラが起動していません".to_string()))?;
        let snapshot = stream.snapshot().await?;
        let captured_at = self.services.clock.now_unix();
        self.stream = None;

        let original_hash = snapshot.content_hash();
        let capture = self.capture_mut("capture")?;
        capture.base_image = Some(snapshot);
        capture.original_hash = Some(original_hash);
        capture.captured_at = Some(captured_at);
        tracing::info!(file_hash = %original_hash, captured_at, "撮影しました");
        self.transition(Mode::PreviewCaptured);
        Ok(())
    }

    /// 撮影した画像を破棄して撮り直す。
    pub async fn retake(&mut self) -> Result<(), FlowError> {
        let result = self.do_retake().await;
        self.record(result)
    }

    async fn do_retake(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::PreviewCaptured], "retake")?;
        let facing = self.capture_mut("retake")?.facing;
        let stream = LiveStream::open(self.services.camera.as_ref(), facing).await?;
        self.stream = Some(stream);
        self.capture_mut("retake")?.discard_capture();
        self.transition(Mode::LiveCapture);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 証明書
    // -----------------------------------------------------------------------

    /// 指定したバリエーションの証明書を並行に描画する。
    pub async fn certify(&mut self, variants: &[CertificateVariant]) -> Result<(), FlowError> {
        let result = self.do_certify(variants).await;
        self.record(result)
    }

    async fn do_certify(&mut self, variants: &[CertificateVariant]) -> Result<(), FlowError> {
        self.guard(&[Mode::PreviewCaptured, Mode::CertificateSelection], "certify")?;
        if variants.is_empty() {
            return Err(FlowError::InvalidInput(
                "証明書のレイアウトを1つ以上指定してください".to_string(),
            ));
        }
        let identity_label = self
            .session
            .as_ref()
            .and_then(SessionContext::identity_label)
            .ok_or_else(|| FlowError::InvalidInput("ウォレットが接続されていません".to_string()))?;

        let capture = self.capture_mut("certify")?;
        let (Some(base), Some(original_hash), Some(timestamp)) = (
            capture.base_image.clone(),
            capture.original_hash,
            capture.captured_at,
        ) else {
            return Err(FlowError::InvalidTransition {
                mode: Mode::PreviewCaptured,
                action: "certify",
            });
        };

        let metadata = CertificateMetadata {
            identity_label,
            timestamp,
            original_hash,
        };
        let rendered = compose_concurrently(&base, variants, &metadata, self.encoding).await?;

        let capture = self.capture_mut("certify")?;
        capture.variants = rendered;
        capture.selected_variant = None;
        capture.final_image = None;
        capture.final_hash = None;
        self.transition(Mode::CertificateSelection);
        Ok(())
    }

    /// 証明書を選び、最終画像とそのハッシュを確定する。
    pub fn select_variant(&mut self, variant: CertificateVariant) -> Result<(), FlowError> {
        let result = self.do_select_variant(variant);
        self.record(result)
    }

    fn do_select_variant(&mut self, variant: CertificateVariant) -> Result<(), FlowError> {
        self.guard(&[Mode::CertificateSelection], "select_variant")?;
        let capture = self.capture_mut("select_variant")?;
        let image = capture
            .variants
            .iter()
            .find(|(v, _)| *v == variant)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| FlowError::InvalidInput(format!("{variant} の証明書は描画されていません")))?;

        capture.final_hash = Some(image.content_hash());
        capture.final_image = Some(image);
        capture.selected_variant = Some(variant);
        self.transition(Mode::RegistrationPrompt);
        Ok(())
    }

    /// 証明書を作らず、原本をそのまま最終画像にする。
    pub fn skip_certification(&mut self) -> Result<(), FlowError> {
        let result = self.do_skip_certification();
        self.record(result)
    }

    fn do_skip_certification(&mut self) -> Result<(), FlowError> {
        self.guard(&[Mode::PreviewCaptured], "skip_certification")?;
        let capture = self.capture_mut("skip_certification")?;
        capture.final_image = capture.base_image.clone();
        capture.final_hash = capture.original_hash;
        capture.selected_variant = None;
        self.transition(Mode::RegistrationPrompt);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 登録
    // -----------------------------------------------------------------------

    /// レジストリに登録する。
    ///
    /// 書き込みを送信した場合は確定待ちチケットを返す。登録済みで書き込みが
    /// 不要だった場合は `None`。
    pub async fn register(&mut self) -> Result<Option<ConfirmationTicket>, FlowError> {
        let result = self.do_register().await;
        self.record(result)
    }

    async fn do_register(&mut self) -> Result<Option<ConfirmationTicket>, FlowError> {
        self.guard(&[Mode::RegistrationPrompt], "register")?;
        let identity_label = self
            .session
            .as_ref()
            .and_then(SessionContext::identity_label)
            .ok_or_else(|| FlowError::InvalidInput("ウォレットが接続されていません".to_string()))?;

        let capture = self.capture_mut("register")?;
        let epoch = capture.epoch;
        let (Some(final_image), Some(base_image), Some(timestamp)) = (
            capture.final_image.clone(),
            capture.base_image.clone(),
            capture.captured_at,
        ) else {
            return Err(FlowError::InvalidTransition {
                mode: Mode::RegistrationPrompt,
                action: "register",
            });
        };

        let submission = self
            .coordinator
            .register(&final_image, &base_image, &identity_label, timestamp)
            .await?;

        let ticket = submission.pending.clone().map(|pending| ConfirmationTicket { epoch, pending });
        let outcome = match &ticket {
            Some(ticket) => RegistrationOutcome::Pending {
                submission,
                ticket: ticket.clone(),
            },
            None => RegistrationOutcome::AlreadyRegistered(submission),
        };
        self.capture_mut("register")?.outcome = Some(outcome);
        self.transition(Mode::Completed);
        Ok(ticket)
    }

    /// 登録せずに終了する。
    pub fn skip_registration(&mut self) -> Result<(), FlowError> {
        let result = self
            .guard(&[Mode::RegistrationPrompt], "skip_registration")
            .and_then(|_| {
                self.capture_mut("skip_registration")?.outcome = Some(RegistrationOutcome::Skipped);
                Ok(())
            });
        if result.is_ok() {
            self.transition(Mode::Completed);
        }
        self.record(result)
    }

    /// フローの外で待った確定結果を反映する。
    ///
    /// チケットが現在のセッションの確定待ちと一致しない場合は何もしない。
    /// 確定に失敗した場合は登録画面に戻り、画像を保持したまま再試行できる。
    pub fn apply_confirmation(
        &mut self,
        ticket: &ConfirmationTicket,
        result: Result<TxConfirmation, RegistrationError>,
    ) -> ConfirmationStatus {
        let Some(capture) = self.capture.as_mut() else {
            tracing::debug!(tx_id = %ticket.pending.id, "破棄済みセッションの確定結果を無視します");
            return ConfirmationStatus::Stale;
        };
        let is_live = capture.epoch == ticket.epoch
            && matches!(
                &capture.outcome,
                Some(RegistrationOutcome::Pending { ticket: live, .. }) if live == ticket
            );
        if !is_live {
            tracing::debug!(tx_id = %ticket.pending.id, "古いチケットの確定結果を無視します");
            return ConfirmationStatus::Stale;
        }
        let Some(RegistrationOutcome::Pending { submission, .. }) = capture.outcome.take() else {
            return ConfirmationStatus::Stale;
        };

        let failure = match result {
            Ok(confirmation) => {
                capture.outcome = Some(RegistrationOutcome::Confirmed {
                    submission,
                    confirmation,
                });
                None
            }
            Err(error) => {
                capture.outcome = Some(RegistrationOutcome::Failed {
                    submission,
                    error: error.clone(),
                });
                Some(error)
            }
        };

        match failure {
            None => self.last_error = None,
            Some(error) => {
                self.last_error = Some(FlowError::Registration(error));
                self.transition(Mode::RegistrationPrompt);
            }
        }
        ConfirmationStatus::Applied
    }

    /// 最終画像の保存用ファイル名。
    pub fn export_file_name(&self) -> Option<String> {
        self.capture
            .as_ref()
            .and_then(|c| c.final_image.as_ref())
            .map(export_file_name)
    }

    // -----------------------------------------------------------------------
    // 戻る・検証
    // -----------------------------------------------------------------------

    /// どの状態からでもメニューに戻る。撮影セッションと検証結果を破棄し、カメラを解放する。
    pub fn go_back(&mut self) {
        self.stream = None;
        self.capture = None;
        self.verification = None;
        self.last_error = None;
        let to = if self.session.is_some() {
            Mode::MenuReady
        } else {
            Mode::Unauthenticated
        };
        self.transition(to);
    }

    /// 検証画面を開く。
    pub fn start_verify(&mut self) -> Result<(), FlowError> {
        let result = self.guard(&[Mode::MenuReady, Mode::VerifyResult], "start_verify");
        if result.is_ok() {
            self.verification = None;
            self.transition(Mode::VerifyUpload);
        }
        self.record(result)
    }

    /// アップロードされたファイル（またはハッシュ）を検証する。
    pub async fn verify_upload(&mut self, input: VerifyInput) -> Result<(), FlowError> {
        let result = self.do_verify_upload(input).await;
        self.record(result)
    }

    async fn do_verify_upload(&mut self, input: VerifyInput) -> Result<(), FlowError> {
        self.guard(&[Mode::VerifyUpload], "verify_upload")?;
        self.transition(Mode::VerifyScanning);
        match self.resolver.verify(input).await {
            Ok(result) => {
                self.verification = Some(result);
                self.transition(Mode::VerifyResult);
                Ok(())
            }
            Err(err) => {
                self.transition(Mode::VerifyUpload);
                Err(err.into())
            }
        }
    }
}
