//! # 検証リゾルバ
//!
//! アップロードされたファイル（またはハッシュ文字列）がレジストリに登録されているかを調べ、
//! 表示用の来歴レコードを組み立てる。
//!
//! ## 処理フロー
//! 1. ファイルの場合は受け取ったバイト列そのもののハッシュを計算する（再エンコードしない）
//! 2. `resolveOriginalHash` で原本ハッシュに解決する
//! 3. ゼロハッシュ（未知）なら未登録として終了する
//! 4. 原本のメタデータと所有者を取得する。所有者がゼロアドレスなら未登録とみなす
//! 5. 解決結果が入力と異なれば、入力は証明書画像
//! 6. ファイルが未登録で、ファイル名に64桁の16進数が含まれていれば、それをハッシュとして1回だけ再試行する
//!
//! 手順6は写真アプリの再エンコードへの対処であり、ベストエフォートの救済策にすぎない。
//! 使用した場合は必ず `fallback_used` で明示する。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use zzin_crypto::{Address, ContentHash};

use crate::media::UploadedFile;
use crate::registry::{RegistryError, RegistryReader};

/// 検証処理のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// レジストリの読み取りに失敗
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// 検証の入力。
#[derive(Debug, Clone)]
pub enum VerifyInput {
    /// 正規化済みのハッシュ
    Hash(ContentHash),
    /// アップロードされたファイル
    File(UploadedFile),
}

/// 入力が一致したのは原本か証明書か。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchKind {
    Original,
    Certificate,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Original => "original",
            MatchKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 来歴レコード。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub original_hash: ContentHash,
    /// 入力が証明書だった場合の証明書ハッシュ
    pub certificate_hash: Option<ContentHash>,
    pub identity_label: String,
    /// 撮影時刻（UNIX秒）
    pub capture_timestamp: u64,
    pub used_certification: bool,
    pub owner: Address,
    pub location: String,
}

/// 検証結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// 入力のハッシュ（ファイルの場合はバイト列のハッシュ）
    pub input_hash: ContentHash,
    pub registered: bool,
    pub resolved_original_hash: Option<ContentHash>,
    pub is_certificate: bool,
    pub matched: Option<MatchKind>,
    pub record: Option<ProvenanceRecord>,
    /// ファイル名からの再試行で見つかったか
    pub fallback_used: bool,
    /// 再試行で使ったハッシュ
    pub fallback_hash: Option<ContentHash>,
}

impl VerificationResult {
    fn not_found(input_hash: ContentHash) -> Self {
        Self {
            input_hash,
            registered: false,
            resolved_original_hash: None,
            is_certificate: false,
            matched: None,
            record: None,
            fallback_used: false,
            fallback_hash: None,
        }
    }
}

/// ファイル名から64桁の16進数を取り出す（ベストエフォート）。
///
/// 16進数の連続区間のうち、ちょうど64桁で、`exclude` と異なる最初のものを返す。
pub fn extract_hash_token(file_name: &str, exclude: &ContentHash) -> Option<ContentHash> {
    file_name
        .split(|c: char| !c.is_ascii_hexdigit())
        .filter(|run| run.len() == 64)
        .filter_map(|run| ContentHash::parse(&format!("0x{run}")).ok())
        .find(|hash| hash != exclude)
}

/// 検証リゾルバ。
pub struct VerificationResolver {
    reader: Arc<dyn RegistryReader>,
}

impl VerificationResolver {
    pub fn new(reader: Arc<dyn RegistryReader>) -> Self {
        Self { reader }
    }

    pub async fn verify(&self, input: VerifyInput) -> Result<VerificationResult, ResolveError> {
        match input {
            VerifyInput::Hash(hash) => self.lookup(hash).await,
            VerifyInput::File(file) => {
                let input_hash = file.image.content_hash();
                let direct = self.lookup(input_hash).await?;
                if direct.registered {
                    return Ok(direct);
                }
                match file.name.as_deref() {
                    Some(name) => self.filename_fallback(input_hash, name).await,
                    None => Ok(direct),
                }
            }
        }
    }

    /// 手順2〜5。
    async fn lookup(&self, input_hash: ContentHash) -> Result<VerificationResult, ResolveError> {
        let resolved = self.reader.resolve_original_hash(&input_hash).await?;
        if resolved.is_zero() {
            return Ok(VerificationResult::not_found(input_hash));
        }

        let metadata = self.reader.get_record_metadata(&resolved).await?;
        let owner = self.reader.get_owner(&resolved).await?;
        if !metadata.exists || owner.is_zero() {
            tracing::debug!(file_hash = %input_hash, "所有者のないレコードは未登録として扱います");
            return Ok(VerificationResult::not_found(input_hash));
        }

        let is_certificate = resolved != input_hash;
        let matched = if is_certificate {
            MatchKind::Certificate
        } else {
            MatchKind::Original
        };

        Ok(VerificationResult {
            input_hash,
            registered: true,
            resolved_original_hash: Some(resolved),
            is_certificate,
            matched: Some(matched),
            record: Some(ProvenanceRecord {
                original_hash: resolved,
                certificate_hash: is_certificate.then_some(input_hash),
                identity_label: metadata.identity_label,
                capture_timestamp: metadata.timestamp,
                used_certification: metadata.used_certification,
                owner,
                location: metadata.location,
            }),
            fallback_used: false,
            fallback_hash: None,
        })
    }

    /// 手順6。ファイル名のハッシュで1回だけ再試行する。
    async fn filename_fallback(
        &self,
        input_hash: ContentHash,
        file_name: &str,
    ) -> Result<VerificationResult, ResolveError> {
        let Some(token) = extract_hash_token(file_name, &input_hash) else {
            return Ok(VerificationResult::not_found(input_hash));
        };

        let retried = self.lookup(token).await?;
        if !retried.registered {
            tracing::debug!(file_hash = %input_hash, fallback_hash = %token, "ファイル名のハッシュも未登録でした");
            return Ok(VerificationResult::not_found(input_hash));
        }

        tracing::info!(
            file_hash = %input_hash,
            fallback_hash = %token,
            "ファイル名のハッシュで登録を確認しました"
        );
        Ok(VerificationResult {
            input_hash,
            fallback_used: true,
            fallback_hash: Some(token),
            ..retried
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{compose, CertificateMetadata, CertificateVariant, OutputEncoding};
    use crate::identity::MockIdentity;
    use crate::media::Image;
    use crate::registration::RegistrationCoordinator;
    use crate::registry::InMemoryRegistry;
    use image::{Rgb, RgbImage};
    use rand::RngCore;

    struct Fixture {
        registry: Arc<InMemoryRegistry>,
        coordinator: RegistrationCoordinator,
        resolver: VerificationResolver,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryRegistry::new(Address::from_bytes([7; 20])));
        let identity = Arc::new(MockIdentity::new("alice"));
        Fixture {
            coordinator: RegistrationCoordinator::new(identity, registry.clone(), registry.clone()),
            resolver: VerificationResolver::new(registry.clone()),
            registry,
        }
    }

    async fn register(f: &Fixture, final_image: &Image, base: &Image, label: &str, timestamp: u64) {
        let submission = f
            .coordinator
            .register(final_image, base, label, timestamp)
            .await
            .unwrap();
        f.coordinator
            .confirm(submission.pending.as_ref().unwrap())
            .await
            .unwrap();
    }

    fn file(name: Option<&str>, image: &Image) -> VerifyInput {
        VerifyInput::File(UploadedFile {
            name: name.map(str::to_string),
            image: image.clone(),
        })
    }

    fn photo() -> Image {
        let pixels = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8 * 6, y as u8 * 8, 90]));
        crate::compositor::encode_rgb(&pixels, OutputEncoding::Jpeg { quality: 100 }).unwrap()
    }

    /// 原本のバイト列で検証すると原本として一致することを確認
    #[tokio::test]
    async fn test_round_trip_original() {
        let f = fixture();
        let base = photo();
        register(&f, &base, &base, "alice", 1_700_000_000).await;

        let result = f.resolver.verify(file(Some("photo.jpg"), &base)).await.unwrap();
        assert!(result.registered);
        assert!(!result.is_certificate);
        assert_eq!(result.matched, Some(MatchKind::Original));
        assert_eq!(result.resolved_original_hash, Some(base.content_hash()));
        assert!(!result.fallback_used);
    }

    /// 証明書画像で検証すると原本に解決されることを確認
    #[tokio::test]
    async fn test_round_trip_certificate() {
        let f = fixture();
        let base = photo();
        let metadata = CertificateMetadata {
            identity_label: "alice".into(),
            timestamp: 1_700_000_000,
            original_hash: base.content_hash(),
        };
        let certificate = compose(
            &base,
            CertificateVariant::HorizontalBand,
            &metadata,
            OutputEncoding::default(),
        )
        .unwrap();
        register(&f, &certificate, &base, "alice", 1_700_000_000).await;

        let result = f.resolver.verify(file(None, &certificate)).await.unwrap();
        assert!(result.registered);
        assert!(result.is_certificate);
        assert_eq!(result.matched, Some(MatchKind::Certificate));
        assert_eq!(result.input_hash, certificate.content_hash());
        assert_eq!(result.resolved_original_hash, Some(base.content_hash()));

        let record = result.record.unwrap();
        assert_eq!(record.identity_label, "alice");
        assert_eq!(record.capture_timestamp, 1_700_000_000);
        assert!(record.used_certification);
        assert_eq!(record.certificate_hash, Some(certificate.content_hash()));
        assert_eq!(record.owner, f.registry.owner());
    }

    /// 無関係なハッシュは未登録で、レコードが空であることを確認
    #[tokio::test]
    async fn test_random_hash_not_found() {
        let f = fixture();
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let hash = ContentHash::from_bytes(bytes);

        let result = f.resolver.verify(VerifyInput::Hash(hash)).await.unwrap();
        assert_eq!(result, VerificationResult::not_found(hash));
        assert!(result.record.is_none());
        assert!(result.resolved_original_hash.is_none());
    }

    /// バイト列が変わってもファイル名のハッシュで見つかり、そのことが明示されることを確認
    #[tokio::test]
    async fn test_filename_fallback() {
        let f = fixture();
        let base = photo();
        register(&f, &base, &base, "alice", 1_700_000_000).await;

        let reencoded = Image::from(b"re-encoded by the photo library".to_vec());
        let name = format!("ZZIN_{}.jpg", &base.content_hash().to_hex()[2..]);
        let result = f.resolver.verify(file(Some(&name), &reencoded)).await.unwrap();

        assert!(result.registered);
        assert!(result.fallback_used);
        assert_eq!(result.fallback_hash, Some(base.content_hash()));
        assert_eq!(result.input_hash, reencoded.content_hash());
        assert_eq!(result.resolved_original_hash, Some(base.content_hash()));
        assert!(!result.is_certificate);
    }

    /// ファイル名のハッシュも未登録なら通常の未登録になることを確認
    #[tokio::test]
    async fn test_fallback_exhausted() {
        let f = fixture();
        let upload = Image::from(b"unknown".to_vec());
        let name = format!("ZZIN_{}.jpg", "ab".repeat(32));
        let result = f.resolver.verify(file(Some(&name), &upload)).await.unwrap();
        assert_eq!(result, VerificationResult::not_found(upload.content_hash()));
    }

    #[tokio::test]
    async fn test_registry_failure_propagates() {
        let f = fixture();
        f.registry.set_unavailable(true).await;
        let err = f
            .resolver
            .verify(VerifyInput::Hash(ContentHash::from_bytes([1; 32])))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Registry(RegistryError::Unavailable(_))));
    }

    #[test]
    fn test_extract_hash_token() {
        let a = "a".repeat(64);
        let b = "b".repeat(64);
        let ha = ContentHash::parse(&format!("0x{a}")).unwrap();
        let hb = ContentHash::parse(&format!("0x{b}")).unwrap();

        assert_eq!(extract_hash_token(&format!("ZZIN_{a}.jpg"), &ContentHash::ZERO), Some(ha));
        // 0xプレフィックス付きでも取り出せる
        assert_eq!(extract_hash_token(&format!("0x{a}.png"), &ContentHash::ZERO), Some(ha));
        // 計算済みハッシュと同じものは飛ばす
        assert_eq!(extract_hash_token(&format!("{a}_{b}"), &ha), Some(hb));
        // 65桁や63桁は対象外
        assert_eq!(extract_hash_token(&format!("x{a}f.jpg"), &ContentHash::ZERO), None);
        assert_eq!(extract_hash_token(&format!("x{}.jpg", &a[1..]), &ContentHash::ZERO), None);
        assert_eq!(extract_hash_token("IMG_0001.jpg", &ContentHash::ZERO), None);
    }
}
