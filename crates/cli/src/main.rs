//! # ZZIN CLI
//!
//! - `zzin hash <file>`: コンテンツハッシュを表示
//! - `zzin certify <file>`: 証明書画像を描画して書き出す
//! - `zzin verify <file>` / `zzin verify --hash 0x...`: Gatewayで来歴を照会
//! - `zzin register <file>`: Gatewayに来歴を登録
//! - `zzin node-info`: 接続先Gatewayの情報を表示

mod local;
mod remote;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use zzin_core::{CertificateVariant, OutputEncoding};
use zzin_crypto::ContentHash;

use remote::{GatewayClient, ProofSource, RegisterArgs};

#[derive(Parser)]
#[command(name = "zzin")]
#[command(about = "ZZIN: 撮影した写真の来歴を証明・照会する", long_about = None)]
struct Cli {
    /// GatewayのURL
    #[arg(long, global = true, default_value = "http://localhost:3000")]
    gateway: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ファイルのKeccak-256ハッシュを表示する
    Hash { file: PathBuf },
    /// 証明書画像を描画してファイル名にハッシュを埋め込んで書き出す
    Certify {
        file: PathBuf,
        /// 証明書に描く識別ラベル
        #[arg(long)]
        label: String,
        /// 撮影時刻（UNIX秒）。省略時は現在時刻
        #[arg(long)]
        timestamp: Option<u64>,
        /// 描画するレイアウト（horizontal, vertical, ghost）。省略時はすべて
        #[arg(long = "variant")]
        variants: Vec<CertificateVariant>,
        /// 出力先ディレクトリ
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// JPEGの代わりにPNGで書き出す
        #[arg(long)]
        png: bool,
    },
    /// Gatewayで来歴を照会する
    Verify {
        /// 照会するファイル
        #[arg(required_unless_present = "hash")]
        file: Option<PathBuf>,
        /// ファイルの代わりにハッシュで照会する
        #[arg(long, conflicts_with = "file")]
        hash: Option<ContentHash>,
    },
    /// Gatewayに来歴を登録する
    Register {
        /// 原本（撮影直後の画像）
        file: PathBuf,
        /// 証明書画像
        #[arg(long)]
        certificate: Option<PathBuf>,
        /// 利用者のウォレットアドレス
        #[arg(long)]
        wallet: String,
        /// 識別ラベル
        #[arg(long)]
        label: String,
        /// 撮影時刻（UNIX秒）。省略時は現在時刻
        #[arg(long)]
        timestamp: Option<u64>,
        /// World IDアプリが返した証明ペイロード（JSON）
        #[arg(long, required_unless_present = "mock_user")]
        proof: Option<PathBuf>,
        /// モックモードのGateway向けに証明を生成するユーザー
        #[arg(long, conflicts_with = "proof")]
        mock_user: Option<String>,
    },
    /// Gatewayのノード情報を表示する
    NodeInfo,
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = GatewayClient::new(&cli.gateway);

    match cli.command {
        Commands::Hash { file } => {
            println!("{}", local::hash_file(&file)?);
        }
        Commands::Certify {
            file,
            label,
            timestamp,
            variants,
            out_dir,
            png,
        } => {
            let variants = if variants.is_empty() {
                CertificateVariant::ALL.to_vec()
            } else {
                variants
            };
            let encoding = if png {
                OutputEncoding::Png
            } else {
                OutputEncoding::default()
            };
            let written = local::certify(
                &file,
                &out_dir,
                &label,
                timestamp.unwrap_or_else(now_unix),
                &variants,
                encoding,
            )
            .await?;
            println!("original\t{}\t{}", local::hash_file(&file)?, file.display());
            for certificate in written {
                println!(
                    "{}\t{}\t{}",
                    certificate.variant,
                    certificate.hash,
                    certificate.path.display()
                );
            }
        }
        Commands::Verify { file, hash } => {
            let response = match (file, hash) {
                (_, Some(hash)) => client.verify_hash(&hash).await?,
                (Some(file), None) => client.verify_file(&file).await?,
                (None, None) => anyhow::bail!("ファイルまたは--hashを指定してください"),
            };
            print_json(&response)?;
        }
        Commands::Register {
            file,
            certificate,
            wallet,
            label,
            timestamp,
            proof,
            mock_user,
        } => {
            let proof = match (&proof, &mock_user) {
                (Some(path), _) => ProofSource::File(path),
                (None, Some(user)) => ProofSource::Mock(user),
                (None, None) => anyhow::bail!("--proofまたは--mock-userを指定してください"),
            };
            let response = client
                .register(RegisterArgs {
                    original: &file,
                    certificate: certificate.as_deref(),
                    wallet_address: &wallet,
                    label: &label,
                    timestamp: timestamp.unwrap_or_else(now_unix),
                    proof,
                })
                .await?;
            print_json(&response)?;
        }
        Commands::NodeInfo => {
            print_json(&client.node_info().await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_certify_variants() {
        let cli = Cli::parse_from([
            "zzin", "certify", "photo.jpg", "--label", "alice", "--variant", "ghost", "--variant",
            "vertical",
        ]);
        match cli.command {
            Commands::Certify { variants, png, .. } => {
                assert_eq!(
                    variants,
                    vec![CertificateVariant::GhostMark, CertificateVariant::VerticalBand]
                );
                assert!(!png);
            }
            _ => panic!("certifyとして解釈されるべきです"),
        }
        assert_eq!(cli.gateway, "http://localhost:3000");
    }

    #[test]
    fn test_verify_requires_input() {
        assert!(Cli::try_parse_from(["zzin", "verify"]).is_err());
        let cli = Cli::try_parse_from([
            "zzin",
            "--gateway",
            "http://gw",
            "verify",
            "--hash",
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        ])
        .unwrap();
        assert_eq!(cli.gateway, "http://gw");
        assert!(matches!(cli.command, Commands::Verify { hash: Some(_), .. }));
    }

    #[test]
    fn test_register_requires_proof_source() {
        assert!(Cli::try_parse_from([
            "zzin", "register", "a.jpg", "--wallet", "0x1", "--label", "alice"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "zzin", "register", "a.jpg", "--wallet", "0x1", "--label", "alice", "--mock-user",
            "zzin-mock"
        ])
        .is_ok());
    }
}
