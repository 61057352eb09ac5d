//! # 整数演算によるラスタライズ
//!
//! ピクセル中心を座標単位に写像し、各プリミティブの内外判定を整数のみで行う。
//! 浮動小数点を使わないため、どの環境でも同じピクセル列が得られる。

use image::{Rgb, RgbImage};
use qrcode::{Color as QrColor, QrCode};
use zzin_crypto::ContentHash;

use super::font::{self, ADVANCE_COLUMNS, GLYPH_ROWS};
use super::layout::{Color, Layout, Primitive, UNITS_PER_THICKNESS};
use super::ComposeError;

/// 帯を `length × thickness` ピクセルのストリップとして描画する。
pub fn rasterize(layout: &Layout, length: u32, thickness: u32) -> RgbImage {
    let mut strip = RgbImage::from_pixel(length, thickness, Rgb(layout.background.0));
    for primitive in &layout.primitives {
        draw(&mut strip, primitive, thickness);
    }
    strip
}

/// ピクセル番号 → その中心の座標単位
fn to_units(pixel: u32, thickness: u32) -> i64 {
    (2 * pixel as i64 + 1) * UNITS_PER_THICKNESS / (2 * thickness as i64)
}

/// 座標単位の区間 [start, end) に中心が入りうるピクセル範囲
fn pixel_span(start: i64, end: i64, thickness: u32, limit: u32) -> std::ops::Range<u32> {
    let t = thickness as i64;
    let lo = (start * t / UNITS_PER_THICKNESS - 1).clamp(0, limit as i64);
    let hi = (end * t / UNITS_PER_THICKNESS + 1).clamp(0, limit as i64);
    lo as u32..hi as u32
}

fn draw(strip: &mut RgbImage, primitive: &Primitive, thickness: u32) {
    let (width, height) = strip.dimensions();
    match primitive {
        Primitive::Rect {
            x,
            y,
            width: w,
            height: h,
            color,
        } => {
            for py in pixel_span(*y, y + h, thickness, height) {
                let uy = to_units(py, thickness);
                if uy < *y || uy >= y + h {
                    continue;
                }
                for px in pixel_span(*x, x + w, thickness, width) {
                    let ux = to_units(px, thickness);
                    if ux >= *x && ux < x + w {
                        put(strip, px, py, *color);
                    }
                }
            }
        }
        Primitive::Disc {
            cx,
            cy,
            radius,
            color,
        } => {
            let r2 = radius * radius;
            for py in pixel_span(cy - radius, cy + radius, thickness, height) {
                let dy = to_units(py, thickness) - cy;
                for px in pixel_span(cx - radius, cx + radius, thickness, width) {
                    let dx = to_units(px, thickness) - cx;
                    if dx * dx + dy * dy <= r2 {
                        put(strip, px, py, *color);
                    }
                }
            }
        }
        Primitive::Text {
            x,
            y,
            size,
            text,
            color,
        } => {
            let module = (size / GLYPH_ROWS).max(1);
            let glyphs: Vec<[u8; 7]> = text.chars().map(font::glyph).collect();
            let span = glyphs.len() as i64 * ADVANCE_COLUMNS * module;
            for py in pixel_span(*y, y + GLYPH_ROWS * module, thickness, height) {
                let uy = to_units(py, thickness) - y;
                if uy < 0 {
                    continue;
                }
                let row = uy / module;
                // 帯からはみ出した部分は pixel_span で切り捨てられる
                for px in pixel_span(*x, x + span, thickness, width) {
                    let ux = to_units(px, thickness) - x;
                    if ux < 0 {
                        continue;
                    }
                    let column = ux / module;
                    let index = (column / ADVANCE_COLUMNS) as usize;
                    let Some(glyph) = glyphs.get(index) else {
                        continue;
                    };
                    if font::is_lit(glyph, column % ADVANCE_COLUMNS, row) {
                        put(strip, px, py, *color);
                    }
                }
            }
        }
    }
}

fn put(strip: &mut RgbImage, x: u32, y: u32, color: Color) {
    strip.put_pixel(x, y, Rgb(color.0));
}

/// 透かしマークに埋め込む文字列 `ZZIN:HUMAN:<原本ハッシュ>`
pub fn ghost_mark_payload(original_hash: &ContentHash) -> String {
    format!("ZZIN:HUMAN:{}", original_hash.to_hex())
}

/// 原本ハッシュを埋め込んだQRコード。クワイエットゾーンは付けない。
pub fn ghost_mark_code(original_hash: &ContentHash) -> Result<QrCode, ComposeError> {
    QrCode::new(ghost_mark_payload(original_hash))
        .map_err(|e| ComposeError::Encode(format!("QRコードを生成できません: {e}")))
}

/// マークを置く正方形 `(x0, y0, 1辺)`。1辺は `max(1, 幅×12%)`、左下から幅の3%離す。
fn ghost_mark_square(width: u32, height: u32) -> (u64, u64, u64) {
    let side = (u64::from(width) * 12 / 100).max(1);
    let margin = u64::from(width) * 3 / 100;
    (margin, u64::from(height).saturating_sub(margin + side), side)
}

/// 原本ハッシュのQRコードを画像の左下に半透明で重ねる。
///
/// マークは1辺 `max(1, 幅×12%)`、余白は幅の3%。各ピクセルは最近傍のモジュールを取り、
/// 暗モジュールは黒、明モジュールは白との整数平均で合成する。
pub fn blend_ghost_mark(canvas: &mut RgbImage, original_hash: &ContentHash) -> Result<(), ComposeError> {
    let code = ghost_mark_code(original_hash)?;
    let modules = code.width() as u64;
    let colors = code.to_colors();

    let (width, height) = canvas.dimensions();
    let (x0, y0, side) = ghost_mark_square(width, height);
    let x_end = (x0 + side).min(u64::from(width));
    let y_end = (y0 + side).min(u64::from(height));

    for py in y0..y_end {
        let row = (py - y0) * modules / side;
        for px in x0..x_end {
            let column = (px - x0) * modules / side;
            let mark: u16 = match colors[(row * modules + column) as usize] {
                QrColor::Dark => 0,
                QrColor::Light => 255,
            };
            // x_end, y_end はキャンバス内に収まっている
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            for channel in pixel.0.iter_mut() {
                *channel = ((*channel as u16 + mark) / 2) as u8;
            }
        }
    }
    Ok(())
}
