//! # Gatewayエンドポイント

pub mod node_info;
pub mod register_file;
pub mod verify_file;
pub mod verify_proof;

pub use node_info::handle_node_info;
pub use register_file::handle_register_file;
pub use verify_file::handle_verify_file;
pub use verify_proof::handle_verify_proof;
