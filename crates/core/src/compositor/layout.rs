//! # 証明書帯のベクタ記述
//!
//! 帯に描く内容を固定小数点の図形列として組み立てる。
//! 座標単位は帯の太さを1000とした相対値で、x軸が帯の長手方向、y軸が太さ方向。
//! 時刻などの可変値はすべて呼び出し側から受け取るため、同じメタデータからは
//! 常に同じ記述が得られる。

use chrono::{DateTime, Utc};

use super::{CertificateMetadata, ComposeError};

/// 帯の太さに相当する座標単位
pub const UNITS_PER_THICKNESS: i64 = 1000;

/// RGB色。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BACKGROUND: Color = Color([0x00, 0x00, 0x00]);
    pub const ACCENT: Color = Color([0x00, 0xFF, 0xCC]);
    pub const TEXT: Color = Color([0xFF, 0xFF, 0xFF]);
    pub const MUTED: Color = Color([0x9A, 0x9A, 0x9A]);
}

/// 描画プリミティブ。後に並んだものが前のものを上書きする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    /// 軸平行の矩形（左上x, 左上y, 幅, 高さ）
    Rect {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        color: Color,
    },
    /// 塗りつぶし円
    Disc {
        cx: i64,
        cy: i64,
        radius: i64,
        color: Color,
    },
    /// 1行のテキスト。`size` はグリフの高さ（7モジュール分）。
    Text {
        x: i64,
        y: i64,
        size: i64,
        text: String,
        color: Color,
    },
}

/// 帯1本分の描画内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub background: Color,
    pub primitives: Vec<Primitive>,
}

const TITLE_SIZE: i64 = 630;
const DETAIL_SIZE: i64 = 280;
const TITLE_X: i64 = 1000;
const DETAIL_X: i64 = 3900;

/// 撮影時刻をUTCの表示用文字列に変換する。
pub fn format_capture_time(timestamp: u64) -> Result<String, ComposeError> {
    let secs = i64::try_from(timestamp).map_err(|_| ComposeError::InvalidTimestamp(timestamp))?;
    let datetime =
        DateTime::<Utc>::from_timestamp(secs, 0).ok_or(ComposeError::InvalidTimestamp(timestamp))?;
    Ok(datetime.format("%Y.%m.%d %H:%M:%S UTC").to_string())
}

/// 来歴の一文（例: `HUMAN CAPTURE - @ALICE - 0XC5D24601`）。
pub fn provenance_tagline(metadata: &CertificateMetadata) -> String {
    format!(
        "HUMAN CAPTURE - @{} - {}",
        metadata.identity_label.trim(),
        metadata.original_hash.short()
    )
    .to_uppercase()
}

/// 証明書帯のレイアウトを組み立てる。
///
/// 左端にロゴ（同心円）、続いて製品名、右側の2行に撮影日時と来歴の一文を置く。
pub fn certificate_band(metadata: &CertificateMetadata) -> Result<Layout, ComposeError> {
    let captured_at = format_capture_time(metadata.timestamp)?;

    let primitives = vec![
        Primitive::Disc {
            cx: 500,
            cy: 500,
            radius: 400,
            color: Color::ACCENT,
        },
        Primitive::Disc {
            cx: 500,
            cy: 500,
            radius: 280,
            color: Color::BACKGROUND,
        },
        Primitive::Disc {
            cx: 500,
            cy: 500,
            radius: 160,
            color: Color::ACCENT,
        },
        Primitive::Text {
            x: TITLE_X,
            y: (UNITS_PER_THICKNESS - TITLE_SIZE) / 2,
            size: TITLE_SIZE,
            text: "ZZIN.".to_string(),
            color: Color::TEXT,
        },
        // 見出しと詳細の区切り線
        Primitive::Rect {
            x: DETAIL_X - 200,
            y: 150,
            width: 30,
            height: 700,
            color: Color::MUTED,
        },
        Primitive::Text {
            x: DETAIL_X,
            y: 150,
            size: DETAIL_SIZE,
            text: captured_at,
            color: Color::MUTED,
        },
        Primitive::Text {
            x: DETAIL_X,
            y: 570,
            size: DETAIL_SIZE,
            text: provenance_tagline(metadata),
            color: Color::ACCENT,
        },
    ];

    Ok(Layout {
        background: Color::BACKGROUND,
        primitives,
    })
}
