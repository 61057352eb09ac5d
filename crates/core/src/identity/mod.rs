//! # 本人性の証明
//!
//! World IDの証明ペイロードと、それを取得・検証する外部サービスの抽象。
//!
//! 証明は1つのシグナルにだけ束縛される。登録時のシグナルは常に原本ハッシュで、
//! 証明書ハッシュには束縛しない。証明はシグナルをまたいで再利用しない。
//!
//! モック実装は `mock` サブモジュールを参照。

pub mod mock;

pub use mock::{MockIdentity, MockWallet};

use zzin_crypto::Address;
use zzin_types::{ProofPayload, ProofVerdictBody};

/// ログインと登録で使うWorld IDアクション
pub const WORLD_ID_ACTION: &str = "orbgate";

/// ABIエンコードされた `uint256[8]` の16進数桁数
const PROOF_HEX_LEN: usize = 8 * 64;

/// 本人性証明のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// 利用者が操作をキャンセルした
    #[error("World ID認証がキャンセルされました")]
    Cancelled,
    /// 検証サービスが証明を拒否した
    #[error("World ID認証に失敗しました: {code}")]
    Rejected {
        /// 検証サービスのエラーコード
        code: String,
        /// 詳細
        detail: Option<String>,
    },
    /// ペイロードの形式が不正
    #[error("証明ペイロードが不正です: {0}")]
    InvalidPayload(String),
    /// ウォレット接続が拒否された
    #[error("ウォレットの接続に失敗しました: {0}")]
    WalletRejected(String),
    /// 外部サービスに到達できない
    #[error("認証サービスに接続できません: {0}")]
    Unavailable(String),
}

/// `0x` 付き16進数を32バイトのビッグエンディアン整数として読む。
///
/// 64桁未満の場合は左をゼロで埋める。
pub fn parse_uint256_hex(field: &str, input: &str) -> Result<[u8; 32], IdentityError> {
    let digits = input
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| IdentityError::InvalidPayload(format!("{field}に0xプレフィックスがありません")))?;
    if digits.is_empty() || digits.len() > 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IdentityError::InvalidPayload(format!(
            "{field}は0x + 最大64桁の16進数である必要があります"
        )));
    }
    let padded = format!("{digits:0>64}");
    let mut word = [0u8; 32];
    hex::decode_to_slice(&padded, &mut word)
        .map_err(|e| IdentityError::InvalidPayload(format!("{field}: {e}")))?;
    Ok(word)
}

/// 検証済み形式の証明。ちょうど1つのシグナルに束縛される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProof {
    pub merkle_root: [u8; 32],
    pub nullifier_hash: [u8; 32],
    /// Groth16証明（`uint256[8]`）
    pub proof: [[u8; 32]; 8],
    pub verification_level: String,
    /// 証明が束縛されているシグナル
    pub signal: String,
}

impl IdentityProof {
    /// 外部から受け取ったペイロードを検証して取り込む。
    pub fn from_payload(payload: &ProofPayload, signal: &str) -> Result<Self, IdentityError> {
        let merkle_root = parse_uint256_hex("merkle_root", &payload.merkle_root)?;
        let nullifier_hash = parse_uint256_hex("nullifier_hash", &payload.nullifier_hash)?;

        let digits = payload
            .proof
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| IdentityError::InvalidPayload("proofに0xプレフィックスがありません".to_string()))?;
        if digits.len() != PROOF_HEX_LEN {
            return Err(IdentityError::InvalidPayload(format!(
                "proofは{}桁の16進数である必要があります（実際: {}桁）",
                PROOF_HEX_LEN,
                digits.len()
            )));
        }
        let bytes = hex::decode(digits).map_err(|e| IdentityError::InvalidPayload(format!("proof: {e}")))?;
        let mut proof = [[0u8; 32]; 8];
        for (word, chunk) in proof.iter_mut().zip(bytes.chunks_exact(32)) {
            word.copy_from_slice(chunk);
        }

        Ok(Self {
            merkle_root,
            nullifier_hash,
            proof,
            verification_level: payload.verification_level.clone(),
            signal: signal.to_string(),
        })
    }

    /// 外部サービスへ渡すペイロード形式に戻す。
    pub fn to_payload(&self) -> ProofPayload {
        let proof: String = self.proof.iter().map(hex::encode).collect();
        ProofPayload {
            merkle_root: format!("0x{}", hex::encode(self.merkle_root)),
            nullifier_hash: format!("0x{}", hex::encode(self.nullifier_hash)),
            proof: format!("0x{proof}"),
            verification_level: self.verification_level.clone(),
        }
    }

    /// 指定したシグナルに束縛されているか。
    pub fn is_bound_to(&self, signal: &str) -> bool {
        self.signal == signal
    }
}

/// 検証サービスの判定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofVerdict {
    pub success: bool,
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl ProofVerdict {
    pub fn accepted() -> Self {
        Self {
            success: true,
            code: None,
            detail: None,
        }
    }

    pub fn rejected(code: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            success: false,
            code: Some(code.into()),
            detail,
        }
    }

    /// 拒否された判定をエラーに変換する。
    pub fn into_result(self) -> Result<(), IdentityError> {
        if self.success {
            Ok(())
        } else {
            Err(IdentityError::Rejected {
                code: self.code.unwrap_or_else(|| "verification_failed".to_string()),
                detail: self.detail,
            })
        }
    }
}

impl From<ProofVerdict> for ProofVerdictBody {
    fn from(v: ProofVerdict) -> Self {
        ProofVerdictBody {
            success: v.success,
            code: v.code,
            detail: v.detail,
        }
    }
}

impl From<ProofVerdictBody> for ProofVerdict {
    fn from(v: ProofVerdictBody) -> Self {
        ProofVerdict {
            success: v.success,
            code: v.code,
            detail: v.detail,
        }
    }
}

/// 利用者の端末で証明を生成するサービス（World App）。
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `action` と `signal` に束縛された証明を要求する。利用者の承認を待つ。
    async fn request_proof(&self, action: &str, signal: &str) -> Result<ProofPayload, IdentityError>;
}

/// 証明を検証する外部サービス。
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, proof: &IdentityProof, action: &str) -> Result<ProofVerdict, IdentityError>;
}

/// 接続済みウォレット。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub address: Address,
    /// World IDのユーザー名（未設定の場合あり）
    pub username: Option<String>,
}

impl WalletSession {
    /// 表示・記録に使う識別ラベル。ユーザー名がなければアドレス。
    pub fn identity_label(&self) -> String {
        match self.username.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.address.to_checksum(),
        }
    }
}

/// ウォレット接続。利用者の承認を待つ。
#[async_trait::async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self) -> Result<WalletSession, IdentityError>;
}
