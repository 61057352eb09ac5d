//! # ZZIN Core
//!
//! 撮影した写真の来歴を証明するためのコアロジック。
//!
//! ## 処理フロー
//! 1. カメラから撮影し、原本のKeccak-256ハッシュを計算する
//! 2. 識別ラベル・撮影時刻・原本ハッシュを焼き込んだ証明書画像を描画する
//! 3. World ID証明を原本ハッシュに束縛してレジストリに登録する
//! 4. 任意の画像をハッシュからレジストリで検証する（証明書は原本に解決される）
//!
//! 外部サービス（World ID、ウォレット、カメラ、レジストリ）はトレイトで抽象化し、
//! テストとモックモードではインメモリ実装を使う。

pub mod capture;
pub mod clock;
pub mod compositor;
pub mod flow;
pub mod identity;
pub mod media;
pub mod registration;
pub mod registry;
pub mod verification;

pub use capture::{Camera, CameraError, FacingMode, LiveStream, StillCamera};
pub use clock::{Clock, FixedClock, SystemClock};
pub use compositor::{
    compose, compose_concurrently, CertificateMetadata, CertificateVariant, ComposeError,
    OutputEncoding,
};
pub use flow::{
    CaptureFlow, CaptureSession, ConfirmationStatus, ConfirmationTicket, FlowError, FlowServices,
    Mode, RegistrationOutcome, SessionContext,
};
pub use identity::{
    IdentityError, IdentityProof, IdentityProvider, IdentityVerifier, MockIdentity, MockWallet,
    ProofVerdict, WalletConnector, WalletSession, WORLD_ID_ACTION,
};
pub use media::{export_file_name, Image, UploadedFile};
pub use registration::{
    RegistrationCoordinator, RegistrationError, RegistrationPlan, RegistrationRequest, Submission,
};
pub use registry::{
    InMemoryRegistry, PendingTx, RecordMetadata, RegistryError, RegistryReader, RegistryWrite,
    TransactionService, TxConfirmation, TxError,
};
pub use verification::{
    MatchKind, ProvenanceRecord, ResolveError, VerificationResolver, VerificationResult,
    VerifyInput,
};
