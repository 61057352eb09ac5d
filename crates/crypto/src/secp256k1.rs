//! # secp256k1 署名
//!
//! レジストリへ書き込むアカウントの秘密鍵の読み込みとアドレス導出。
//! 署名そのものはGatewayのウォレットが行う。

pub use k256::ecdsa::SigningKey as Secp256k1SigningKey;

use crate::{keccak256, Address, CryptoError};

/// `0x` + 64桁の16進数から秘密鍵を復元する。
pub fn signing_key_from_hex(input: &str) -> Result<Secp256k1SigningKey, CryptoError> {
    let digits = input
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| CryptoError::InvalidPrivateKey("0xプレフィックスがありません".to_string()))?;
    if digits.len() != 64 {
        return Err(CryptoError::InvalidPrivateKey(
            "秘密鍵は32バイトの16進数である必要があります".to_string(),
        ));
    }
    let bytes =
        hex::decode(digits).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    Secp256k1SigningKey::from_slice(&bytes)
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// 秘密鍵に対応するアカウントアドレスを導出する。
pub fn address_from_signing_key(key: &Secp256k1SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    // 先頭の0x04を除いた64バイトをハッシュ
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}
