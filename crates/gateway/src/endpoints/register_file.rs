//! # POST /api/register-file
//!
//! クライアントが取得したWorld ID証明を添えて、原本ハッシュ（と証明書ハッシュ）を登録する。
//! 証明は原本ハッシュをシグナルとして発行されている必要がある。
//! 送信後はトランザクションの確定まで待ってから応答する。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use zzin_core::identity::IdentityProof;
use zzin_core::registration::RegistrationRequest;
use zzin_crypto::{Address, ContentHash};
use zzin_types::{ProofPayload, RegisterFileRequest, RegisterFileResponse};

use crate::config::{GatewayState, NETWORK_NAME};
use crate::error::GatewayError;
use crate::extract::ApiJson;

/// 境界で一度だけ検証した登録要求。
struct ValidatedRegistration {
    wallet_address: Address,
    request: RegistrationRequest,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, GatewayError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::BadRequest(message.to_string()))
}

fn required_hex(value: &Option<String>, field: &str) -> Result<String, GatewayError> {
    let value = required(value, &format!("{field}は必須です"))?;
    if !value.starts_with("0x") {
        return Err(GatewayError::BadRequest(format!(
            "{field}は0xで始まる16進数である必要があります"
        )));
    }
    Ok(value.to_string())
}

fn validate(body: &RegisterFileRequest) -> Result<ValidatedRegistration, GatewayError> {
    let file_hash = required(&body.file_hash, "fileHashは必須です")?;
    let original_hash =
        ContentHash::parse(file_hash).map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    let certificate_hash = body
        .certificate_hash
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ContentHash::parse)
        .transpose()
        .map_err(|e| GatewayError::BadRequest(format!("certificateHashが不正です: {e}")))?;

    let wallet_address = body
        .wallet_address
        .as_deref()
        .and_then(|v| Address::parse(v).ok())
        .ok_or_else(|| GatewayError::BadRequest("有効なwalletAddressが必要です".to_string()))?;

    let identity_label = required(&body.worldid, "worldidは必須です")?;

    let timestamp = match body.timestamp {
        Some(t) if t.is_finite() && t >= 1.0 => t.floor() as u64,
        _ => {
            return Err(GatewayError::BadRequest(
                "timestampは正の数である必要があります".to_string(),
            ))
        }
    };

    let used_certification = body
        .used_zzin
        .ok_or_else(|| GatewayError::BadRequest("usedZzinは必須です".to_string()))?;

    let payload = ProofPayload {
        merkle_root: required_hex(&body.root, "root")?,
        nullifier_hash: required_hex(&body.nullifier_hash, "nullifierHash")?,
        proof: required_hex(&body.proof, "proof")?,
        verification_level: "orb".to_string(),
    };
    let proof = IdentityProof::from_payload(&payload, &original_hash.to_hex())
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?;

    let request = RegistrationRequest::new(
        original_hash,
        certificate_hash,
        identity_label,
        timestamp,
        proof,
    )
    .with_used_certification(used_certification);

    Ok(ValidatedRegistration {
        wallet_address,
        request,
    })
}

/// POST /api/register-file: 来歴の登録。
pub async fn handle_register_file(
    State(state): State<Arc<GatewayState>>,
    ApiJson(body): ApiJson<RegisterFileRequest>,
) -> Result<Json<RegisterFileResponse>, GatewayError> {
    let ValidatedRegistration {
        wallet_address,
        request,
    } = validate(&body)?;
    let identity_label = request.identity_label.clone();
    let timestamp = request.timestamp;

    let submission = state.coordinator.submit(request).await?;
    let confirmation = match &submission.pending {
        Some(pending) => Some(state.coordinator.confirm(pending).await?),
        None => None,
    };

    let owner = match state.registry.get_owner(&submission.original_hash).await {
        Ok(owner) if !owner.is_zero() => owner,
        Ok(_) => state.owner,
        Err(err) => {
            tracing::warn!(error = %err, "所有者の取得に失敗しました");
            state.owner
        }
    };

    tracing::info!(
        file_hash = %submission.original_hash,
        plan = submission.plan.as_str(),
        wallet = %wallet_address,
        "登録リクエストを処理しました"
    );

    Ok(Json(RegisterFileResponse {
        success: true,
        file_hash: submission.original_hash.to_hex(),
        certificate_hash: submission.certificate_hash.map(|h| h.to_hex()),
        verified_wallet_address: wallet_address.to_checksum(),
        worldid: identity_label,
        timestamp,
        used_zzin: submission.used_certification,
        owner: owner.to_checksum(),
        registration: submission.plan.as_str().to_string(),
        transaction_url: confirmation
            .as_ref()
            .map(|c| state.config.transaction_url(&c.transaction_hash)),
        transaction_hash: confirmation.as_ref().map(|c| c.transaction_hash.clone()),
        block_number: confirmation.as_ref().map(|c| c.block_number.to_string()),
        network: NETWORK_NAME.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, MOCK_IDENTITY_USER};
    use axum::http::StatusCode;
    use zzin_core::identity::{MockIdentity, WORLD_ID_ACTION};

    type Mutation = fn(&mut RegisterFileRequest);

    fn case(mutate: Mutation, field: &'static str) -> (Mutation, &'static str) {
        (mutate, field)
    }

    fn mock_state() -> Arc<GatewayState> {
        Arc::new(GatewayState::mock(GatewayConfig::default()))
    }

    fn request_for(original: &ContentHash, certificate: Option<&ContentHash>) -> RegisterFileRequest {
        let payload = MockIdentity::new(MOCK_IDENTITY_USER).payload_for(WORLD_ID_ACTION, &original.to_hex());
        RegisterFileRequest {
            file_hash: Some(original.to_hex()),
            certificate_hash: certificate.map(|c| c.to_hex()),
            wallet_address: Some("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".into()),
            worldid: Some("alice".into()),
            timestamp: Some(1_700_000_000.9),
            used_zzin: Some(certificate.is_some()),
            root: Some(payload.merkle_root),
            nullifier_hash: Some(payload.nullifier_hash),
            proof: Some(payload.proof),
        }
    }

    #[tokio::test]
    async fn test_register_original_then_link() {
        let state = mock_state();
        let original = ContentHash::from_bytes([0x10; 32]);

        let response = handle_register_file(State(state.clone()), ApiJson(request_for(&original, None)))
            .await
            .unwrap()
            .0;
        assert!(response.success);
        assert_eq!(response.registration, "registerFile");
        assert_eq!(response.timestamp, 1_700_000_000);
        assert_eq!(
            response.verified_wallet_address,
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert_eq!(response.network, "worldchain");
        let tx_hash = response.transaction_hash.unwrap();
        assert_eq!(
            response.transaction_url.unwrap(),
            format!("https://worldscan.org/tx/{tx_hash}")
        );
        assert!(response.block_number.is_some());

        // 同じ原本に証明書を追加
        let certificate = ContentHash::from_bytes([0x20; 32]);
        let response = handle_register_file(
            State(state.clone()),
            ApiJson(request_for(&original, Some(&certificate))),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(response.registration, "linkCertificate");
        assert_eq!(
            state.registry.resolve_original_hash(&certificate).await.unwrap(),
            original
        );

        // もう一度送っても書き込みは発生しない
        let response = handle_register_file(State(state), ApiJson(request_for(&original, None)))
            .await
            .unwrap()
            .0;
        assert_eq!(response.registration, "alreadyRegistered");
        assert!(response.transaction_hash.is_none());
    }

    #[tokio::test]
    async fn test_validation_messages() {
        let state = mock_state();
        let original = ContentHash::from_bytes([0x10; 32]);

        let cases = [
            case(|r| r.file_hash = None, "fileHash"),
            case(|r| r.file_hash = Some("0x1234".into()), "fileHash"),
            case(|r| r.wallet_address = Some("0x12".into()), "walletAddress"),
            case(|r| r.worldid = Some("  ".into()), "worldid"),
            case(|r| r.timestamp = Some(0.0), "timestamp"),
            case(|r| r.timestamp = None, "timestamp"),
            case(|r| r.used_zzin = None, "usedZzin"),
            case(|r| r.root = None, "root"),
            case(|r| r.nullifier_hash = Some("1234".into()), "nullifierHash"),
            case(|r| r.proof = Some("0x00".into()), "proof"),
        ];
        for (mutate, field) in cases {
            let mut request = request_for(&original, None);
            mutate(&mut request);
            let err = handle_register_file(State(state.clone()), ApiJson(request))
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{field}");
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    /// 別のハッシュ向けの証明は拒否されることを確認
    #[tokio::test]
    async fn test_proof_for_other_hash_rejected() {
        let state = mock_state();
        let original = ContentHash::from_bytes([0x10; 32]);
        let mut request = request_for(&original, None);
        request.file_hash = Some(ContentHash::from_bytes([0x11; 32]).to_hex());

        let err = handle_register_file(State(state), ApiJson(request))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
