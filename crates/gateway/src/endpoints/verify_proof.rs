//! # POST /api/verify-proof
//!
//! ログイン時のWorld ID証明を検証サービスに問い合わせる。

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use zzin_core::identity::IdentityProof;
use zzin_types::{VerifyProofRequest, VerifyProofResponse};

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::extract::ApiJson;

/// POST /api/verify-proof: 証明の検証。
///
/// 判定が受理なら200、拒否なら400で `{verifyRes}` を返す。
pub async fn handle_verify_proof(
    State(state): State<Arc<GatewayState>>,
    ApiJson(body): ApiJson<VerifyProofRequest>,
) -> Result<(StatusCode, Json<VerifyProofResponse>), GatewayError> {
    let action = body.action.trim();
    if action.is_empty() {
        return Err(GatewayError::BadRequest("actionは必須です".to_string()));
    }
    let signal = body.signal.as_deref().unwrap_or("");
    let proof = IdentityProof::from_payload(&body.payload, signal)?;

    let verdict = state.verifier.verify(&proof, action).await?;
    let status = if verdict.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    tracing::info!(action, success = verdict.success, "証明の検証リクエストを処理しました");

    Ok((
        status,
        Json(VerifyProofResponse {
            verify_res: verdict.into(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, MOCK_IDENTITY_USER};
    use zzin_core::identity::{MockIdentity, WORLD_ID_ACTION};

    fn mock_state() -> Arc<GatewayState> {
        Arc::new(GatewayState::mock(GatewayConfig::default()))
    }

    fn request(signal_in_proof: &str, signal: Option<&str>) -> VerifyProofRequest {
        VerifyProofRequest {
            payload: MockIdentity::new(MOCK_IDENTITY_USER).payload_for(WORLD_ID_ACTION, signal_in_proof),
            action: WORLD_ID_ACTION.to_string(),
            signal: signal.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_accepted_proof() {
        let (status, Json(body)) =
            handle_verify_proof(State(mock_state()), ApiJson(request("login-1", Some("login-1"))))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body.verify_res.success);
    }

    /// シグナル省略時は空文字列として扱うことを確認
    #[tokio::test]
    async fn test_missing_signal_defaults_to_empty() {
        let (status, _) = handle_verify_proof(State(mock_state()), ApiJson(request("", None)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejected_proof() {
        let (status, Json(body)) =
            handle_verify_proof(State(mock_state()), ApiJson(request("login-1", Some("login-2"))))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.verify_res.success);
        assert_eq!(body.verify_res.code.as_deref(), Some("invalid_proof"));
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let mut body = request("login-1", Some("login-1"));
        body.payload.proof = "0x1234".into();
        let err = handle_verify_proof(State(mock_state()), ApiJson(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let mut body = request("login-1", Some("login-1"));
        body.action = " ".into();
        let err = handle_verify_proof(State(mock_state()), ApiJson(body))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
