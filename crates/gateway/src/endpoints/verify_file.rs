//! # POST /api/verify-file
//!
//! アップロードされたファイル（Base64）またはハッシュ文字列の来歴を照会する。
//! ファイルは受け取ったバイト列そのものをハッシュする。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use base64::Engine;
use zzin_core::media::{Image, UploadedFile};
use zzin_core::verification::{VerificationResult, VerifyInput};
use zzin_crypto::ContentHash;
use zzin_types::{VerifyFileRequest, VerifyFileResponse};

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::extract::ApiJson;

/// `data:image/jpeg;base64,` のようなプレフィックスを取り除く。
fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(";base64,") {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => encoded,
    }
}

fn decode_upload(encoded: &str, limit: usize) -> Result<Vec<u8>, GatewayError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(strip_data_url(encoded.trim()))
        .map_err(|e| GatewayError::BadRequest(format!("fileのBase64デコードに失敗しました: {e}")))?;
    if bytes.len() > limit {
        return Err(GatewayError::PayloadTooLarge { limit });
    }
    Ok(bytes)
}

fn to_input(body: VerifyFileRequest, limit: usize) -> Result<VerifyInput, GatewayError> {
    if let Some(encoded) = body.file.as_deref().filter(|v| !v.trim().is_empty()) {
        let bytes = decode_upload(encoded, limit)?;
        return Ok(VerifyInput::File(UploadedFile {
            name: body.file_name.filter(|n| !n.is_empty()),
            image: Image::from(bytes),
        }));
    }

    match body.file_hash.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(hash) => ContentHash::parse(hash)
            .map(VerifyInput::Hash)
            .map_err(|e| GatewayError::BadRequest(format!("fileHashが不正です: {e}"))),
        None => Err(GatewayError::BadRequest(
            "fileHashまたはfileのいずれかが必要です".to_string(),
        )),
    }
}

fn to_response(result: VerificationResult) -> VerifyFileResponse {
    let record = result.record.as_ref();
    VerifyFileResponse {
        success: true,
        input_hash: result.input_hash.to_hex(),
        resolved_original_hash: result.resolved_original_hash.map(|h| h.to_hex()),
        is_certified: result.registered.then_some(result.is_certificate),
        matched: result.matched.map(|m| m.as_str().to_string()),
        registered: result.registered,
        location: record.map(|r| r.location.clone()),
        worldid: record.map(|r| r.identity_label.clone()),
        timestamp: record.map(|r| r.capture_timestamp.to_string()),
        used_zzin: record.map(|r| r.used_certification),
        owner: record.map(|r| r.owner.to_checksum()),
        fallback_used: result.fallback_used,
        fallback_hash: result.fallback_hash.map(|h| h.to_hex()),
    }
}

/// POST /api/verify-file: 来歴の照会。
///
/// 未登録は失敗ではなく `registered: false` の正常応答として返す。
pub async fn handle_verify_file(
    State(state): State<Arc<GatewayState>>,
    ApiJson(body): ApiJson<VerifyFileRequest>,
) -> Result<Json<VerifyFileResponse>, GatewayError> {
    let input = to_input(body, state.config.max_upload_bytes)?;
    let result = state.resolver.verify(input).await?;

    tracing::info!(
        file_hash = %result.input_hash,
        registered = result.registered,
        fallback_used = result.fallback_used,
        "検証リクエストを処理しました"
    );
    Ok(Json(to_response(result)))
}
