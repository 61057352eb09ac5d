//! # ZZIN Gateway
//!
//! 撮影した写真の来歴を登録・照会するHTTPサーバー。
//!
//! ## 役割
//! - World ID証明の検証
//! - レジストリコントラクトへの登録トランザクションの送信と確定待ち
//! - ファイルまたはハッシュからの来歴照会
//!
//! ## API エンドポイント
//! - `POST /api/register-file`: 来歴の登録
//! - `POST /api/verify-file`: 来歴の照会
//! - `POST /api/verify-proof`: World ID証明の検証
//! - `GET /.well-known/zzin-node-info`: ノード情報公開

mod chain;
mod config;
mod endpoints;
mod error;
mod extract;
mod worldid;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;

use config::{GatewayConfig, GatewayState};
use endpoints::{handle_node_info, handle_register_file, handle_verify_file, handle_verify_proof};

/// Base64のオーバーヘッドとJSONの残りを見込んだリクエスト本文の上限。
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes / 3 * 4 + 64 * 1024
}

fn build_router(state: Arc<GatewayState>) -> axum::Router {
    let limit = body_limit(state.config.max_upload_bytes);
    axum::Router::new()
        .route("/api/register-file", axum::routing::post(handle_register_file))
        .route("/api/verify-file", axum::routing::post(handle_verify_file))
        .route("/api/verify-proof", axum::routing::post(handle_verify_proof))
        .route(
            "/.well-known/zzin-node-info",
            axum::routing::get(handle_node_info),
        )
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::from_env()?;
    let addr = config.bind_addr.clone();
    let state = Arc::new(GatewayState::from_config(config)?);
    let app = build_router(state);

    tracing::info!("Gatewayを {} で起動します", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
