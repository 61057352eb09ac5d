//! # ZZIN 暗号処理
//!
//! 撮影画像のコンテンツハッシュと、外部レジストリ（EVMコントラクト）とやり取りするための
//! 暗号プリミティブを提供する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | コンテンツハッシュ | Keccak-256 |
//! | World IDシグナル | Keccak-256 >> 8 (hashToField) |
//! | アドレス | Keccak-256(非圧縮公開鍵)[12..32] + EIP-55 |
//! | 書き込みアカウントの鍵 | secp256k1 |
//!
//! レジストリはKeccak-256でレコードを索引するため、コンテンツハッシュの
//! アルゴリズムを差し替えると既存の登録と照合できなくなる。

pub mod address;
pub mod secp256k1;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

pub use address::Address;
pub use secp256k1::{address_from_signing_key, signing_key_from_hex, Secp256k1SigningKey};

/// 暗号処理のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// ハッシュ文字列の形式が不正
    #[error("fileHashは0x + 64桁の16進数である必要があります: {0}")]
    InvalidHash(String),
    /// アドレス文字列の形式が不正
    #[error("アドレスは0x + 40桁の16進数である必要があります: {0}")]
    InvalidAddress(String),
    /// EIP-55チェックサム不一致
    #[error("アドレスのチェックサムが一致しません: {0}")]
    ChecksumMismatch(String),
    /// 秘密鍵の形式が不正
    #[error("秘密鍵が不正です: {0}")]
    InvalidPrivateKey(String),
}

/// Keccak-256ハッシュ計算。
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// 画像バイト列のコンテンツハッシュ。
///
/// 正規表現は `0x` + 小文字16進数64桁。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// 「未登録」を表すゼロハッシュ。
    pub const ZERO: ContentHash = ContentHash([0u8; 32]);

    /// 32バイトの生データから構築する。
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// 32バイトの生データを返す。
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// ゼロハッシュかどうか。
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// `0x` プレフィックス付き小文字16進数に変換する。
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// 表示用の短縮形（先頭4バイト）。
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }

    /// ハッシュ文字列を正規化してパースする。
    ///
    /// 前後の空白を除去し、大文字の16進数も受け付ける。
    /// `0x` プレフィックスと64桁の16進数は必須。
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let normalized = input.trim().to_ascii_lowercase();
        let digits = normalized
            .strip_prefix("0x")
            .ok_or_else(|| CryptoError::InvalidHash(input.to_string()))?;
        if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CryptoError::InvalidHash(input.to_string()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| CryptoError::InvalidHash(input.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// バイト列のコンテンツハッシュを計算する。
///
/// 空のバイト列も特別扱いせずそのままハッシュする。
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash(keccak256(bytes))
}

/// World IDのシグナルハッシュ（hashToField）を計算する。
///
/// `keccak256(signal) >> 8`。先頭バイトは常に0になる。
pub fn signal_hash(signal: &[u8]) -> [u8; 32] {
    let hash = keccak256(signal);
    let mut field = [0u8; 32];
    field[1..].copy_from_slice(&hash[..31]);
    field
}

/// シグナル文字列のハッシュを `0x` 付き16進数で返す。
pub fn signal_hash_hex(signal: &str) -> String {
    format!("0x{}", hex::encode(signal_hash(signal.as_bytes())))
}
