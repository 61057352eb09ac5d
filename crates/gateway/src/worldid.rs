//! # World ID 検証
//!
//! Developer Portalの検証API（`POST {base}/api/v2/verify/{app_id}`）で証明を検証する。
//! シグナルは `signal_hash`（hashToField）として送る。

use serde::{Deserialize, Serialize};
use zzin_core::identity::{IdentityError, IdentityProof, IdentityVerifier, ProofVerdict};
use zzin_crypto::signal_hash_hex;

#[derive(Serialize)]
struct VerifyBody<'a> {
    merkle_root: String,
    nullifier_hash: String,
    proof: String,
    verification_level: &'a str,
    action: &'a str,
    signal_hash: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Developer Portalの検証APIを使う `IdentityVerifier`。
pub struct WorldIdVerifier {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl WorldIdVerifier {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v2/verify/{}", self.base_url, self.app_id)
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for WorldIdVerifier {
    async fn verify(&self, proof: &IdentityProof, action: &str) -> Result<ProofVerdict, IdentityError> {
        let payload = proof.to_payload();
        let body = VerifyBody {
            merkle_root: payload.merkle_root,
            nullifier_hash: payload.nullifier_hash,
            proof: payload.proof,
            verification_level: &proof.verification_level,
            action,
            signal_hash: signal_hash_hex(&proof.signal),
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(action, "World ID証明を検証しました");
            return Ok(ProofVerdict::accepted());
        }
        if status.is_server_error() {
            return Err(IdentityError::Unavailable(format!("HTTP {status}")));
        }

        let text = response.text().await.unwrap_or_default();
        let error: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let code = error.code.unwrap_or_else(|| format!("http_{}", status.as_u16()));
        tracing::warn!(action, code = %code, "World ID証明が拒否されました");
        Ok(ProofVerdict::rejected(code, error.detail))
    }
}
