//! # GET /.well-known/zzin-node-info
//!
//! ノード情報公開エンドポイント。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use zzin_types::NodeInfo;

use crate::config::{GatewayState, NETWORK_NAME};

/// GET /.well-known/zzin-node-info: 接続先のネットワークとコントラクトを返す。
pub async fn handle_node_info(State(state): State<Arc<GatewayState>>) -> Json<NodeInfo> {
    Json(NodeInfo {
        network: NETWORK_NAME.to_string(),
        chain_id: state.config.chain_id,
        contract_address: state.config.contract_address.as_ref().map(|a| a.to_checksum()),
        owner_address: state.owner.to_checksum(),
        explorer_base_url: state.config.explorer_base_url.clone(),
        mock_mode: state.config.mock_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn test_mock_node_info() {
        let state = Arc::new(GatewayState::mock(GatewayConfig::default()));
        let Json(info) = handle_node_info(State(state)).await;
        assert!(info.mock_mode);
        assert_eq!(info.network, "worldchain");
        assert_eq!(info.chain_id, 480);
        assert!(info.contract_address.is_none());
        assert_eq!(info.owner_address.to_lowercase(), format!("0x{}", "2a".repeat(20)));
    }
}
