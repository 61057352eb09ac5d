//! # Gateway エラー型
//!
//! すべてのエラーは `{success: false, error, hint?}` のJSONで返す。
//! 入力の不備は4xx、外部サービスの失敗は5xx。

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use zzin_core::identity::IdentityError;
use zzin_core::registration::RegistrationError;
use zzin_core::verification::ResolveError;
use zzin_types::ErrorResponse;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト
    #[error("{0}")]
    BadRequest(String),
    /// アップロードが大きすぎる
    #[error("ファイルが大きすぎます（上限 {limit} バイト）")]
    PayloadTooLarge {
        /// 上限（バイト）
        limit: usize,
    },
    /// リクエスト本文がサーバーの上限を超えた
    #[error("リクエスト本文が大きすぎます: {0}")]
    BodyTooLarge(String),
    /// 登録処理の失敗
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// 検証処理の失敗
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// World ID検証サービスの失敗
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } | GatewayError::BodyTooLarge(_) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            GatewayError::Registration(err) => match err {
                RegistrationError::InvalidInput(_)
                | RegistrationError::Proof(IdentityError::InvalidPayload(_))
                | RegistrationError::ProofRejected(_) => StatusCode::BAD_REQUEST,
                RegistrationError::ConfirmationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RegistrationError::Proof(_)
                | RegistrationError::Registry(_)
                | RegistrationError::Submission { .. }
                | RegistrationError::Confirmation(_) => StatusCode::BAD_GATEWAY,
            },
            GatewayError::Resolve(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Identity(IdentityError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
            GatewayError::Identity(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn hint(&self) -> Option<String> {
        match self {
            GatewayError::Registration(err) => err.hint().map(str::to_string),
            _ => None,
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::BodyTooLarge(rejection.body_text())
        } else {
            GatewayError::BadRequest(format!(
                "リクエスト本文をJSONとして解釈できません: {}",
                rejection.body_text()
            ))
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "リクエストの処理に失敗しました");
        } else {
            tracing::warn!(status = %status, error = %self, "リクエストを拒否しました");
        }
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            hint: self.hint(),
        };
        (status, Json(body)).into_response()
    }
}
