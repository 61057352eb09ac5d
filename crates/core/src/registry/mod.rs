//! # 外部レジストリ
//!
//! 原本ハッシュをキーに来歴レコードを保持するスマートコントラクトの抽象。
//! 読み取り（`RegistryReader`）と書き込みトランザクション（`TransactionService`）を分ける。
//!
//! ## ハッシュの二段参照
//! 証明書ハッシュは原本ハッシュの別名として登録される。
//! `resolve_original_hash` は原本ならそのまま、証明書なら対応する原本、
//! 未知ならゼロハッシュを返す。
//!
//! インメモリ実装は `memory` サブモジュールを参照。

pub mod memory;

pub use memory::InMemoryRegistry;

use zzin_crypto::{Address, ContentHash};

use crate::identity::IdentityProof;

/// レジストリ読み取りのエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// レジストリに到達できない
    #[error("レジストリに接続できません: {0}")]
    Unavailable(String),
    /// 応答を解釈できない
    #[error("レジストリの応答が不正です: {0}")]
    InvalidResponse(String),
}

/// 書き込みトランザクションのエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    /// 事前実行（シミュレーション）で失敗した
    #[error("トランザクションのシミュレーションに失敗しました: {0}")]
    Simulation(String),
    /// レジストリが証明を拒否した
    #[error("レジストリがWorld ID証明を拒否しました: {0}")]
    ProofRejected(String),
    /// 送信が拒否された
    #[error("トランザクションの送信が拒否されました: {0}")]
    Rejected(String),
    /// ブロックに取り込まれたが失敗した
    #[error("トランザクションが失敗しました: {transaction_hash}")]
    Reverted {
        /// 失敗したトランザクションのハッシュ
        transaction_hash: String,
    },
    /// 確定待ちがタイムアウトした
    #[error("トランザクションの確定待ちがタイムアウトしました: {0}")]
    Timeout(String),
    /// 送信先に到達できない
    #[error("トランザクションサービスに接続できません: {0}")]
    Unavailable(String),
}

/// `getImageMetadata` の戻り値。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordMetadata {
    /// 撮影場所（コントラクトが保持する任意の文字列）
    pub location: String,
    pub identity_label: String,
    /// 撮影時刻（UNIX秒）
    pub timestamp: u64,
    pub used_certification: bool,
    /// レコードが存在するか
    pub exists: bool,
}

/// レジストリへの書き込み。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWrite {
    /// 原本のみを新規登録
    RegisterOriginal {
        original_hash: ContentHash,
        identity_label: String,
        timestamp: u64,
        used_certification: bool,
        proof: IdentityProof,
    },
    /// 原本と証明書を同時に新規登録
    RegisterWithCertificate {
        original_hash: ContentHash,
        certificate_hash: ContentHash,
        identity_label: String,
        timestamp: u64,
        used_certification: bool,
        proof: IdentityProof,
    },
    /// 登録済みの原本に証明書を追加
    LinkCertificate {
        original_hash: ContentHash,
        certificate_hash: ContentHash,
    },
}

impl RegistryWrite {
    /// コントラクトの関数名
    pub fn method(&self) -> &'static str {
        match self {
            RegistryWrite::RegisterOriginal { .. } => "registerFile",
            RegistryWrite::RegisterWithCertificate { .. } => "registerFileWithCertificate",
            RegistryWrite::LinkCertificate { .. } => "linkCertificate",
        }
    }

    pub fn original_hash(&self) -> ContentHash {
        match self {
            RegistryWrite::RegisterOriginal { original_hash, .. }
            | RegistryWrite::RegisterWithCertificate { original_hash, .. }
            | RegistryWrite::LinkCertificate { original_hash, .. } => *original_hash,
        }
    }

    pub fn certificate_hash(&self) -> Option<ContentHash> {
        match self {
            RegistryWrite::RegisterOriginal { .. } => None,
            RegistryWrite::RegisterWithCertificate {
                certificate_hash, ..
            }
            | RegistryWrite::LinkCertificate {
                certificate_hash, ..
            } => Some(*certificate_hash),
        }
    }
}

/// 送信済みで確定待ちのトランザクション。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    /// トランザクションID（送信サービスが採番）
    pub id: String,
    /// 実行したコントラクト関数名
    pub method: &'static str,
}

/// 確定したトランザクション。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxConfirmation {
    pub transaction_hash: String,
    pub block_number: u64,
}

/// レジストリの読み取り。
#[async_trait::async_trait]
pub trait RegistryReader: Send + Sync {
    /// ハッシュを原本ハッシュに解決する。未知ならゼロハッシュ。
    async fn resolve_original_hash(&self, hash: &ContentHash) -> Result<ContentHash, RegistryError>;

    /// 原本ハッシュのメタデータ。未登録なら `exists == false`。
    async fn get_record_metadata(&self, original_hash: &ContentHash) -> Result<RecordMetadata, RegistryError>;

    /// レコードの所有者。未登録ならゼロアドレス。
    async fn get_owner(&self, hash: &ContentHash) -> Result<Address, RegistryError>;

    async fn is_registered(&self, hash: &ContentHash) -> Result<bool, RegistryError>;
}

/// 書き込みトランザクションの送信と確定待ち。
#[async_trait::async_trait]
pub trait TransactionService: Send + Sync {
    /// 書き込みを送信する。確定は待たない。
    async fn submit(&self, write: RegistryWrite) -> Result<PendingTx, TxError>;

    /// 送信済みトランザクションの確定を待つ。
    async fn await_confirmation(&self, pending: &PendingTx) -> Result<TxConfirmation, TxError>;
}
