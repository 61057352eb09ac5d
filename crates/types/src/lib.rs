//! # ZZIN 共有型定義
//!
//! フロントエンドとGateway間でやり取りするHTTPリクエスト/レスポンスの構造体。
//!
//! ## エンコーディング規則
//! - JSONキー: camelCase（World IDの証明ペイロードのみ発行元に合わせてsnake_case）
//! - ハッシュ: `0x` + 64桁の16進数
//! - アドレス: `0x` + 40桁の16進数（EIP-55）
//! - バイナリ: Base64
//!
//! この層では値の検証を行わない。文字列のまま受け取り、Gatewayの境界で一度だけ検証する。

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// World ID 証明
// ---------------------------------------------------------------------------

/// World IDアプリが返す証明ペイロード。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPayload {
    /// Merkleルート（`0x` 付き16進数）
    pub merkle_root: String,
    /// ヌリファイアハッシュ（`0x` 付き16進数）
    pub nullifier_hash: String,
    /// ABIエンコードされた `uint256[8]`（`0x` + 512桁）
    pub proof: String,
    /// 認証レベル ("orb", "device")
    #[serde(default = "default_verification_level")]
    pub verification_level: String,
}

fn default_verification_level() -> String {
    "orb".to_string()
}

/// /api/verify-proof リクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProofRequest {
    /// World IDの証明ペイロード
    pub payload: ProofPayload,
    /// アクション識別子
    pub action: String,
    /// 証明に紐づくシグナル
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// 証明検証サービスの判定結果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofVerdictBody {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// /api/verify-proof レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyProofResponse {
    pub verify_res: ProofVerdictBody,
}

// ---------------------------------------------------------------------------
// /api/register-file
// ---------------------------------------------------------------------------

/// /api/register-file リクエスト。
///
/// 欠落フィールドをフィールド単位のエラーで報告するため、すべてOptionで受け取る。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFileRequest {
    /// 原本（撮影直後の画像）のハッシュ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// 証明書画像のハッシュ（証明書を生成した場合）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_hash: Option<String>,
    /// 利用者のウォレットアドレス
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    /// 表示用の識別ラベル（World IDユーザー名またはアドレス）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worldid: Option<String>,
    /// 撮影時刻（UNIX秒）。小数は切り捨てる。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// ZZINの証明書ツールを使用したか
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_zzin: Option<bool>,
    /// World ID Merkleルート
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// World ID ヌリファイアハッシュ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullifier_hash: Option<String>,
    /// ABIエンコードされた証明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// /api/register-file レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFileResponse {
    pub success: bool,
    pub file_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_hash: Option<String>,
    pub verified_wallet_address: String,
    pub worldid: String,
    pub timestamp: u64,
    pub used_zzin: bool,
    /// レコード所有者（書き込みを行ったアカウント）
    pub owner: String,
    /// 実行した書き込みの種別
    /// ("registerFile", "registerFileWithCertificate", "linkCertificate", "alreadyRegistered")
    pub registration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    pub network: String,
}

// ---------------------------------------------------------------------------
// /api/verify-file
// ---------------------------------------------------------------------------

/// /api/verify-file リクエスト。
///
/// `fileHash` か `file` のどちらかが必要。`file` を渡した場合はGatewayがハッシュを計算し、
/// `fileName` を使ったフォールバック照合も行う。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Base64エンコードされたファイル本体
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// アップロード時のファイル名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// /api/verify-file レスポンス。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFileResponse {
    pub success: bool,
    /// 照合に使ったハッシュ（アップロードされたバイト列のハッシュ）
    pub input_hash: String,
    pub resolved_original_hash: Option<String>,
    /// 入力が証明書画像だったか
    pub is_certified: Option<bool>,
    /// "original" または "certificate"
    pub matched: Option<String>,
    pub registered: bool,
    pub location: Option<String>,
    pub worldid: Option<String>,
    pub timestamp: Option<String>,
    pub used_zzin: Option<bool>,
    pub owner: Option<String>,
    /// ファイル名からのハッシュ復元を使ったか
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// 共通
// ---------------------------------------------------------------------------

/// エラーレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    /// 利用者向けの対処のヒント
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// /.well-known/zzin-node-info レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub network: String,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub owner_address: String,
    pub explorer_base_url: String,
    pub mock_mode: bool,
}
