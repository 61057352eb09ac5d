//! # ローカルコマンド
//!
//! Gatewayに接続せずに実行できる処理（ハッシュ計算と証明書の描画）。

use std::path::{Path, PathBuf};

use anyhow::Context;
use zzin_core::media::{export_file_name, Image};
use zzin_core::{compose_concurrently, CertificateMetadata, CertificateVariant, OutputEncoding};
use zzin_crypto::ContentHash;

/// 描画した証明書ファイル。
#[derive(Debug)]
pub struct WrittenCertificate {
    pub variant: CertificateVariant,
    pub hash: ContentHash,
    pub path: PathBuf,
}

pub fn read_image(path: &Path) -> anyhow::Result<Image> {
    let bytes = std::fs::read(path).with_context(|| format!("{}を読み込めません", path.display()))?;
    Ok(Image::from(bytes))
}

/// ファイルのバイト列そのもののハッシュ。
pub fn hash_file(path: &Path) -> anyhow::Result<ContentHash> {
    Ok(read_image(path)?.content_hash())
}

/// 原本に証明書を合成し、画像自身のハッシュを含むファイル名で `out_dir` に書き出す。
pub async fn certify(
    input: &Path,
    out_dir: &Path,
    label: &str,
    timestamp: u64,
    variants: &[CertificateVariant],
    encoding: OutputEncoding,
) -> anyhow::Result<Vec<WrittenCertificate>> {
    let base = read_image(input)?;
    let metadata = CertificateMetadata {
        identity_label: label.to_string(),
        timestamp,
        original_hash: base.content_hash(),
    };
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("{}を作成できません", out_dir.display()))?;

    let rendered = compose_concurrently(&base, variants, &metadata, encoding).await?;
    let mut written = Vec::with_capacity(rendered.len());
    for (variant, image) in rendered {
        let path = out_dir.join(export_file_name(&image));
        std::fs::write(&path, image.bytes())
            .with_context(|| format!("{}に書き込めません", path.display()))?;
        tracing::info!(variant = %variant, path = %path.display(), "証明書を書き出しました");
        written.push(WrittenCertificate {
            variant,
            hash: image.content_hash(),
            path,
        });
    }
    Ok(written)
}
