//! # 時刻ソース
//!
//! 撮影時刻は証明書に描画され、オンチェーンにも記録されるため、
//! 呼び出し側が明示的に供給する。テストでは固定時刻を使う。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 現在時刻を返すトレイト。
pub trait Clock: Send + Sync {
    /// 現在時刻（UNIXミリ秒）
    fn now_millis(&self) -> u64;

    /// 現在時刻（UNIX秒）
    fn now_unix(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// システム時計。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// 固定時刻。`advance` で進められる。
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    pub fn from_unix(secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(secs * 1000),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
