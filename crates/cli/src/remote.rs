//! # Gatewayクライアント
//!
//! Gatewayの `{success: false, error, hint?}` 形式のエラーを `anyhow::Error` に変換する。

use std::path::Path;

use anyhow::Context;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zzin_core::identity::{MockIdentity, WORLD_ID_ACTION};
use zzin_crypto::ContentHash;
use zzin_types::{
    ErrorResponse, NodeInfo, ProofPayload, RegisterFileRequest, RegisterFileResponse,
    VerifyFileRequest, VerifyFileResponse,
};

use crate::local::read_image;

/// 登録に使う証明の出どころ。
pub enum ProofSource<'a> {
    /// World IDアプリが返したペイロードのJSONファイル
    File(&'a Path),
    /// モックモードのGateway向けに生成する
    Mock(&'a str),
}

impl ProofSource<'_> {
    fn payload_for(&self, original_hash: &ContentHash) -> anyhow::Result<ProofPayload> {
        match self {
            ProofSource::File(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("{}を読み込めません", path.display()))?;
                serde_json::from_str(&text).context("証明ペイロードのJSONが不正です")
            }
            ProofSource::Mock(user) => {
                Ok(MockIdentity::new(user).payload_for(WORLD_ID_ACTION, &original_hash.to_hex()))
            }
        }
    }
}

/// 登録コマンドの入力。
pub struct RegisterArgs<'a> {
    pub original: &'a Path,
    pub certificate: Option<&'a Path>,
    pub wallet_address: &'a str,
    pub label: &'a str,
    pub timestamp: u64,
    pub proof: ProofSource<'a>,
}

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
        let status = response.status();
        let bytes = response.bytes().await.context("レスポンスの読み込みに失敗しました")?;
        if status.is_success() {
            return serde_json::from_slice(&bytes).context("レスポンスのJSONが不正です");
        }
        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(ErrorResponse {
                error,
                hint: Some(hint),
                ..
            }) => anyhow::bail!("Gatewayエラー (HTTP {status}): {error}\nヒント: {hint}"),
            Ok(ErrorResponse { error, .. }) => anyhow::bail!("Gatewayエラー (HTTP {status}): {error}"),
            Err(_) => anyhow::bail!("Gatewayエラー (HTTP {status})"),
        }
    }

    async fn post<Req: Serialize, Res: DeserializeOwned>(&self, path: &str, body: &Req) -> anyhow::Result<Res> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{url}に接続できません"))?;
        Self::decode(response).await
    }

    pub async fn node_info(&self) -> anyhow::Result<NodeInfo> {
        let url = format!("{}/.well-known/zzin-node-info", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{url}に接続できません"))?;
        Self::decode(response).await
    }

    /// ファイルをアップロードして来歴を照会する。ファイル名もフォールバック照合用に送る。
    pub async fn verify_file(&self, path: &Path) -> anyhow::Result<VerifyFileResponse> {
        let image = read_image(path)?;
        let body = VerifyFileRequest {
            file_hash: None,
            file: Some(base64::engine::general_purpose::STANDARD.encode(image.bytes())),
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        };
        self.post("/api/verify-file", &body).await
    }

    pub async fn verify_hash(&self, hash: &ContentHash) -> anyhow::Result<VerifyFileResponse> {
        let body = VerifyFileRequest {
            file_hash: Some(hash.to_hex()),
            ..Default::default()
        };
        self.post("/api/verify-file", &body).await
    }

    pub async fn register(&self, args: RegisterArgs<'_>) -> anyhow::Result<RegisterFileResponse> {
        let original_hash = read_image(args.original)?.content_hash();
        let certificate_hash = args
            .certificate
            .map(|path| read_image(path).map(|image| image.content_hash()))
            .transpose()?;
        let payload = args.proof.payload_for(&original_hash)?;

        let body = RegisterFileRequest {
            file_hash: Some(original_hash.to_hex()),
            certificate_hash: certificate_hash.map(|h| h.to_hex()),
            wallet_address: Some(args.wallet_address.to_string()),
            worldid: Some(args.label.to_string()),
            timestamp: Some(args.timestamp as f64),
            used_zzin: Some(certificate_hash.is_some()),
            root: Some(payload.merkle_root),
            nullifier_hash: Some(payload.nullifier_hash),
            proof: Some(payload.proof),
        };
        tracing::info!(file_hash = %original_hash, "登録リクエストを送信します");
        self.post("/api/register-file", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::Json;

    /// 受け取った本文をそのまま返すGateway。fileHashが無い場合はエラー形式で返す。
    async fn spawn_gateway() -> String {
        let app = axum::Router::new()
            .route(
                "/api/verify-file",
                axum::routing::post(|Json(body): Json<serde_json::Value>| async move {
                    if body.get("file").is_some() {
                        let response = VerifyFileResponse {
                            success: true,
                            input_hash: "0x01".into(),
                            fallback_used: body["fileName"] == "ZZIN_x.jpg",
                            ..Default::default()
                        };
                        (StatusCode::OK, Json(serde_json::to_value(response).unwrap()))
                    } else {
                        (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({
                                "success": false,
                                "error": "fileHashが不正です",
                                "hint": "0x + 64桁で指定してください"
                            })),
                        )
                    }
                }),
            )
            .route(
                "/api/register-file",
                axum::routing::post(|Json(body): Json<RegisterFileRequest>| async move {
                    Json(RegisterFileResponse {
                        success: true,
                        file_hash: body.file_hash.unwrap_or_default(),
                        certificate_hash: body.certificate_hash,
                        verified_wallet_address: body.wallet_address.unwrap_or_default(),
                        worldid: body.worldid.unwrap_or_default(),
                        timestamp: body.timestamp.unwrap_or_default() as u64,
                        used_zzin: body.used_zzin.unwrap_or_default(),
                        owner: "0x0000000000000000000000000000000000000001".into(),
                        registration: "registerFileWithCertificate".into(),
                        transaction_hash: None,
                        transaction_url: None,
                        block_number: None,
                        network: "worldchain".into(),
                    })
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}/")
    }

    #[tokio::test]
    async fn test_verify_file_sends_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ZZIN_x.jpg");
        std::fs::write(&path, b"bytes").unwrap();

        let client = GatewayClient::new(&spawn_gateway().await);
        let response = client.verify_file(&path).await.unwrap();
        assert!(response.success);
        assert!(response.fallback_used);
    }

    /// エラー本文のメッセージとヒントが伝わることを確認
    #[tokio::test]
    async fn test_error_envelope_becomes_error() {
        let client = GatewayClient::new(&spawn_gateway().await);
        let err = client
            .verify_hash(&ContentHash::from_bytes([1; 32]))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("400"), "{err}");
        assert!(err.contains("fileHashが不正です"), "{err}");
        assert!(err.contains("ヒント"), "{err}");
    }

    #[tokio::test]
    async fn test_register_with_mock_proof() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.jpg");
        let certificate = dir.path().join("certificate.jpg");
        std::fs::write(&original, b"original").unwrap();
        std::fs::write(&certificate, b"certificate").unwrap();

        let client = GatewayClient::new(&spawn_gateway().await);
        let response = client
            .register(RegisterArgs {
                original: &original,
                certificate: Some(&certificate),
                wallet_address: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
                label: "alice",
                timestamp: 1_700_000_000,
                proof: ProofSource::Mock("zzin-mock"),
            })
            .await
            .unwrap();
        assert_eq!(response.file_hash, zzin_crypto::content_hash(b"original").to_hex());
        assert_eq!(
            response.certificate_hash,
            Some(zzin_crypto::content_hash(b"certificate").to_hex())
        );
        assert!(response.used_zzin);
        assert_eq!(response.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_proof_file_must_be_json() {
        let dir = tempfile::tempdir().unwrap();
        let proof = dir.path().join("proof.json");
        std::fs::write(&proof, b"{").unwrap();
        let source = ProofSource::File(&proof);
        assert!(source.payload_for(&ContentHash::from_bytes([0; 32])).is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = GatewayClient::new("http://localhost:3000/");
        assert_eq!(client.base_url, "http://localhost:3000");
    }
}
