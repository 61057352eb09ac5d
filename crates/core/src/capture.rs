//! # カメラ
//!
//! ライブ映像の取得と静止画の切り出し。
//!
//! カメラストリームは `LiveStream` が所有し、ドロップ時に必ず停止する。
//! 撮影画面から抜けるすべての経路（撮影、戻る、エラー、カメラ切り替え）で
//! ストリームが解放される。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops, RgbImage};

use crate::compositor::{encode_rgb, OutputEncoding};
use crate::media::Image;

/// 撮影した静止画のJPEG品質
pub const SNAPSHOT_JPEG_QUALITY: u8 = 100;

/// カメラのエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    /// カメラ権限が拒否されている
    #[error("カメラへのアクセスが拒否されました。端末の設定でカメラ権限を許可してください")]
    PermissionDenied,
    /// カメラを開けない
    #[error("カメラを起動できません: {0}")]
    Unavailable(String),
    /// フレームを取得できない
    #[error("カメラ映像を取得できません: {0}")]
    Frame(String),
    /// 静止画のエンコードに失敗
    #[error("静止画のエンコードに失敗しました: {0}")]
    Encode(String),
}

impl CameraError {
    /// 再試行で回復できるか。権限拒否は端末の設定変更が必要。
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CameraError::PermissionDenied)
    }
}

/// カメラの向き。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// 背面カメラ
    #[default]
    Environment,
    /// 前面カメラ（自撮り）
    User,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }
}

/// 取得中のカメラストリーム。
pub trait FrameStream: Send {
    fn facing(&self) -> FacingMode;

    /// 現在のフレーム
    fn current_frame(&mut self) -> Result<RgbImage, CameraError>;

    /// すべてのトラックを停止する。複数回呼ばれても安全であること。
    fn stop(&mut self);
}

/// カメラデバイス。
#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn FrameStream>, CameraError>;
}

/// ストリームの所有者。ドロップ時にストリームを停止する。
pub struct LiveStream {
    inner: Box<dyn FrameStream>,
}

impl LiveStream {
    pub async fn open(camera: &dyn Camera, facing: FacingMode) -> Result<Self, CameraError> {
        let inner = camera.acquire(facing).await?;
        tracing::debug!(facing = ?facing, "カメラを取得しました");
        Ok(Self { inner })
    }

    pub fn facing(&self) -> FacingMode {
        self.inner.facing()
    }

    /// 現在のフレームを静止画として切り出す。
    ///
    /// 前面カメラは鏡像で表示しているため、保存する画像も左右反転する。
    /// 反転とJPEGエンコードはブロッキングスレッドで行う。
    pub async fn snapshot(&mut self) -> Result<Image, CameraError> {
        let frame = self.inner.current_frame()?;
        let facing = self.inner.facing();
        tokio::task::spawn_blocking(move || still_image(frame, facing))
            .await
            .map_err(|e| CameraError::Encode(format!("エンコードタスクが異常終了しました: {e}")))?
    }
}

fn still_image(frame: RgbImage, facing: FacingMode) -> Result<Image, CameraError> {
    let frame = match facing {
        FacingMode::User => imageops::flip_horizontal(&frame),
        FacingMode::Environment => frame,
    };
    encode_rgb(
        &frame,
        OutputEncoding::Jpeg {
            quality: SNAPSHOT_JPEG_QUALITY,
        },
    )
    .map_err(|e| CameraError::Encode(e.to_string()))
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.inner.stop();
        tracing::debug!("カメラを解放しました");
    }
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("facing", &self.inner.facing())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// 固定フレームのカメラ
// ---------------------------------------------------------------------------

/// 常に同じフレームを返すカメラ。CLIとテストで使用する。
///
/// 同時に開いているストリーム数を数え、解放漏れを検出できる。
#[derive(Clone)]
pub struct StillCamera {
    frame: RgbImage,
    deny: bool,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    acquisitions: Arc<AtomicUsize>,
}

impl StillCamera {
    pub fn new(frame: RgbImage) -> Self {
        Self {
            frame,
            deny: false,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            acquisitions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 権限が拒否された端末を模擬する。
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::new(RgbImage::new(1, 1))
        }
    }

    /// 現在開いているストリーム数
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 同時に開いていたストリーム数の最大値
    pub fn peak_streams(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// 取得した回数
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for StillCamera {
    async fn acquire(&self, facing: FacingMode) -> Result<Box<dyn FrameStream>, CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StillStream {
            frame: self.frame.clone(),
            facing,
            active: Arc::clone(&self.active),
            stopped: false,
        }))
    }
}

struct StillStream {
    frame: RgbImage,
    facing: FacingMode,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl FrameStream for StillStream {
    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn current_frame(&mut self) -> Result<RgbImage, CameraError> {
        if self.stopped {
            return Err(CameraError::Frame("ストリームは停止済みです".to_string()));
        }
        Ok(self.frame.clone())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(4, 2, |x, _| Rgb([x as u8 * 60, 0, 0]))
    }

    /// ドロップでストリームが停止することを確認
    #[tokio::test]
    async fn test_live_stream_released_on_drop() {
        let camera = StillCamera::new(gradient());
        {
            let _stream = LiveStream::open(&camera, FacingMode::Environment).await.unwrap();
            assert_eq!(camera.active_streams(), 1);
        }
        assert_eq!(camera.active_streams(), 0);
    }

    /// 前面カメラの静止画は左右反転されることを確認
    #[tokio::test]
    async fn test_snapshot_mirrors_user_facing() {
        let camera = StillCamera::new(gradient());

        let mut back = LiveStream::open(&camera, FacingMode::Environment).await.unwrap();
        let back_shot = back.snapshot().await.unwrap();
        drop(back);
        let mut front = LiveStream::open(&camera, FacingMode::User).await.unwrap();
        let front_shot = front.snapshot().await.unwrap();

        assert_eq!(back_shot.mime_type(), "image/jpeg");
        assert_ne!(back_shot.content_hash(), front_shot.content_hash());

        let decoded = image::load_from_memory(front_shot.bytes()).unwrap().to_rgb8();
        // 左端が元の右端（最も明るい列）になる
        assert!(decoded.get_pixel(0, 0).0[0] > decoded.get_pixel(3, 0).0[0]);
    }

    #[tokio::test]
    async fn test_permission_denied_is_unrecoverable() {
        let camera = StillCamera::denied();
        let err = LiveStream::open(&camera, FacingMode::User).await.unwrap_err();
        assert_eq!(err, CameraError::PermissionDenied);
        assert!(!err.is_recoverable());
        assert!(CameraError::Unavailable("busy".into()).is_recoverable());
    }

    #[test]
    fn test_facing_toggle() {
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
    }
}
