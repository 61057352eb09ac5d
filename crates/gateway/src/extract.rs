//! # リクエスト本文の抽出
//!
//! `axum::Json` の拒否（JSONの構文エラー、型の不一致、Content-Typeの不足、本文サイズ超過）を
//! `GatewayError` に変換し、他のエラーと同じ `{success: false, error}` で返す。

use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// JSON本文の抽出器。拒否は `GatewayError` になる。
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, StatusCode};

    #[derive(Debug, serde::Deserialize)]
    struct Sample {
        timestamp: f64,
    }

    fn request(content_type: &str, body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_json() {
        let ApiJson(sample) = ApiJson::<Sample>::from_request(
            request("application/json", r#"{"timestamp":1700000000}"#),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(sample.timestamp, 1_700_000_000.0);
    }

    /// 構文エラー・型の不一致・Content-Typeの誤りはすべて400になることを確認
    #[tokio::test]
    async fn test_rejections_become_bad_request() {
        for (content_type, body) in [
            ("application/json", "{not json"),
            ("application/json", r#"{"timestamp":"1700000000"}"#),
            ("text/plain", r#"{"timestamp":1700000000}"#),
        ] {
            let err = ApiJson::<Sample>::from_request(request(content_type, body), &())
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::BadRequest(_)), "{content_type} {body}: {err:?}");
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }
}
