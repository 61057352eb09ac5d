//! # 透かし合成
//!
//! 撮影した原本画像に来歴の帯（または透かしマーク）を合成し、証明書画像を生成する。
//!
//! ## 決定性
//! 証明書画像のハッシュはレジストリの検索キーになるため、同じ原本と同じ
//! メタデータからは常にバイト単位で同一の出力を得る必要がある。
//! - 時刻はすべて `CertificateMetadata` から受け取る（内部で時計を読まない）
//! - 乱数を使わない
//! - ラスタライズは整数演算のみ
//! - エンコード設定は `OutputEncoding` で明示する
//!
//! ## バリエーション
//! | バリエーション | キャンバス | 内容 |
//! |---------------|-----------|------|
//! | `HorizontalBand` | `w × (h + T)`、`T = max(1, w×6%)` | 下辺に帯 |
//! | `VerticalBand` | `(w + T) × h`、`T = max(1, h×6%)` | 右辺に帯（時計回りに90°回転） |
//! | `GhostMark` | `w × h` | 左下に `ZZIN:HUMAN:<原本ハッシュ>` のQRコードを半透明で重ねる |

pub mod font;
pub mod layout;
pub mod raster;

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, ExtendedColorType, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use zzin_crypto::ContentHash;

use crate::media::Image;

/// JPEGの最大辺長
pub const MAX_DIMENSION: u32 = 65_535;

/// 証明書画像の既定JPEG品質。
///
/// 品質はハッシュを左右するため固定値とする。
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// 合成処理のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    /// 画像のデコードに失敗
    #[error("画像のデコードに失敗しました: {0}")]
    Decode(String),
    /// 幅または高さが0
    #[error("画像の幅または高さが0です")]
    EmptyImage,
    /// 合成後のキャンバスが大きすぎる
    #[error("キャンバスサイズが上限を超えました: {width}x{height}")]
    CanvasTooLarge {
        /// 幅
        width: u64,
        /// 高さ
        height: u64,
    },
    /// 撮影時刻を日時に変換できない
    #[error("撮影時刻が不正です: {0}")]
    InvalidTimestamp(u64),
    /// JPEG品質が範囲外
    #[error("JPEG品質は1〜100で指定してください: {0}")]
    InvalidQuality(u8),
    /// エンコードに失敗
    #[error("画像のエンコードに失敗しました: {0}")]
    Encode(String),
    /// 描画タスクが異常終了した
    #[error("描画タスクが異常終了しました: {0}")]
    Worker(String),
}

/// 証明書のレイアウト。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateVariant {
    HorizontalBand,
    VerticalBand,
    GhostMark,
}

impl CertificateVariant {
    /// すべてのバリエーション
    pub const ALL: [CertificateVariant; 3] = [
        CertificateVariant::HorizontalBand,
        CertificateVariant::VerticalBand,
        CertificateVariant::GhostMark,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CertificateVariant::HorizontalBand => "horizontal",
            CertificateVariant::VerticalBand => "vertical",
            CertificateVariant::GhostMark => "ghost",
        }
    }
}

impl fmt::Display for CertificateVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CertificateVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CertificateVariant::ALL
            .into_iter()
            .find(|v| v.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("不明な証明書レイアウト: {s} (horizontal, vertical, ghost)"))
    }
}

/// 証明書に描く来歴情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMetadata {
    /// 識別ラベル（World IDユーザー名またはウォレットアドレス）
    pub identity_label: String,
    /// 撮影時刻（UNIX秒）
    pub timestamp: u64,
    /// 原本画像のハッシュ
    pub original_hash: ContentHash,
}

/// 出力形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    /// 非可逆。品質は1〜100。
    Jpeg { quality: u8 },
    /// 可逆。環境によらず同じバイト列が必要な場合に使う。
    Png,
}

impl Default for OutputEncoding {
    fn default() -> Self {
        OutputEncoding::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// 帯の太さ（基準となる辺の6%、最小1ピクセル）。
pub fn band_thickness(dimension: u32) -> u32 {
    (dimension * 6 / 100).max(1)
}

fn checked_canvas(width: u32, height: u32, extra_w: u32, extra_h: u32) -> Result<(u32, u32), ComposeError> {
    let w = width as u64 + extra_w as u64;
    let h = height as u64 + extra_h as u64;
    if w > MAX_DIMENSION as u64 || h > MAX_DIMENSION as u64 {
        return Err(ComposeError::CanvasTooLarge {
            width: w,
            height: h,
        });
    }
    Ok((w as u32, h as u32))
}

/// 原本画像に証明書を合成し、新しい画像を返す。
///
/// 原本は縮小せずそのまま配置し、`base` 自体は変更しない。
pub fn compose(
    base: &Image,
    variant: CertificateVariant,
    metadata: &CertificateMetadata,
    encoding: OutputEncoding,
) -> Result<Image, ComposeError> {
    let decoded = image::load_from_memory(base.bytes())
        .map_err(|e| ComposeError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ComposeError::EmptyImage);
    }

    let canvas = match variant {
        CertificateVariant::HorizontalBand => {
            let thickness = band_thickness(width);
            let (cw, ch) = checked_canvas(width, height, 0, thickness)?;
            let strip = raster::rasterize(&layout::certificate_band(metadata)?, width, thickness);
            let mut canvas = RgbImage::new(cw, ch);
            imageops::replace(&mut canvas, &decoded, 0, 0);
            imageops::replace(&mut canvas, &strip, 0, height as i64);
            canvas
        }
        CertificateVariant::VerticalBand => {
            let thickness = band_thickness(height);
            let (cw, ch) = checked_canvas(width, height, thickness, 0)?;
            let strip = raster::rasterize(&layout::certificate_band(metadata)?, height, thickness);
            let rotated = imageops::rotate90(&strip);
            let mut canvas = RgbImage::new(cw, ch);
            imageops::replace(&mut canvas, &decoded, 0, 0);
            imageops::replace(&mut canvas, &rotated, width as i64, 0);
            canvas
        }
        CertificateVariant::GhostMark => {
            // 日時が不正な場合は他のバリエーションと同じく拒否する
            layout::format_capture_time(metadata.timestamp)?;
            let mut canvas = decoded;
            raster::blend_ghost_mark(&mut canvas, &metadata.original_hash)?;
            canvas
        }
    };

    encode_rgb(&canvas, encoding)
}

/// RGB画像を指定形式でエンコードする。
pub fn encode_rgb(canvas: &RgbImage, encoding: OutputEncoding) -> Result<Image, ComposeError> {
    let (width, height) = canvas.dimensions();
    let mut buf = Cursor::new(Vec::new());
    match encoding {
        OutputEncoding::Jpeg { quality } => {
            if !(1..=100).contains(&quality) {
                return Err(ComposeError::InvalidQuality(quality));
            }
            JpegEncoder::new_with_quality(&mut buf, quality)
                .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ComposeError::Encode(e.to_string()))?;
        }
        OutputEncoding::Png => {
            PngEncoder::new(&mut buf)
                .write_image(canvas.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|e| ComposeError::Encode(e.to_string()))?;
        }
    }
    Ok(Image::from(buf.into_inner()))
}

/// 複数のバリエーションをブロッキングタスク上で並行に描画する。
///
/// 結果は `variants` と同じ順序で返す。
pub async fn compose_concurrently(
    base: &Image,
    variants: &[CertificateVariant],
    metadata: &CertificateMetadata,
    encoding: OutputEncoding,
) -> Result<Vec<(CertificateVariant, Image)>, ComposeError> {
    let handles: Vec<_> = variants
        .iter()
        .map(|&variant| {
            let base = base.clone();
            let metadata = metadata.clone();
            let handle = tokio::task::spawn_blocking(move || {
                compose(&base, variant, &metadata, encoding)
            });
            (variant, handle)
        })
        .collect();

    let mut rendered = Vec::with_capacity(handles.len());
    for (variant, handle) in handles {
        let image = handle
            .await
            .map_err(|e| ComposeError::Worker(e.to_string()))??;
        tracing::debug!(variant = %variant, bytes = image.len(), "証明書を描画しました");
        rendered.push((variant, image));
    }
    Ok(rendered)
}
