//! # 画像バイト列
//!
//! 撮影・合成・アップロードで生成される画像は不変のバイト列として扱う。
//! 派生画像は常に新しい `Image` として作られ、元の値は変更されない。

use std::fmt;
use std::sync::Arc;

use zzin_crypto::{content_hash, ContentHash};

/// 不変の画像バイト列。クローンは参照カウントの増加のみ。
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    bytes: Arc<[u8]>,
}

impl Image {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// バイト列そのもののコンテンツハッシュ。再エンコードは行わない。
    pub fn content_hash(&self) -> ContentHash {
        content_hash(&self.bytes)
    }

    /// マジックバイトから判定したMIMEタイプ。
    pub fn mime_type(&self) -> &'static str {
        detect_mime_type(&self.bytes)
    }
}

impl From<Vec<u8>> for Image {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type())
            .finish()
    }
}

/// 利用者がアップロードしたファイル。
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// 端末上のファイル名（フォールバック照合に使用）
    pub name: Option<String>,
    pub image: Image,
}

/// コンテンツのMIMEタイプをマジックバイトから検出する。
pub fn detect_mime_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if data.len() >= 12 && data[8..12] == *b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

/// MIMEタイプに対応するファイル拡張子。
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// 保存・共有用のファイル名を組み立てる。
///
/// 写真アプリの再エンコードでバイト列が変わってもファイル名からハッシュを
/// 復元できるよう、画像自身のハッシュをファイル名に埋め込む。
pub fn export_file_name(image: &Image) -> String {
    let hash = image.content_hash().to_hex();
    format!("ZZIN_{}.{}", &hash[2..], extension_for(image.mime_type()))
}
