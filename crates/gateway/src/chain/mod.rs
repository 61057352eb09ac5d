//! # EVMチェーン連携
//!
//! - `registry`: レジストリコントラクトの読み書き（alloyの `sol!` バインディングとプロバイダ）

pub mod registry;
