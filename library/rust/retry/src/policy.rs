use std::time::Duration;

use rand::Rng;

/// RetryConfig は送信バッチの再試行方針。
/// 待機時間は base_delay * factor^n を max_delay で頭打ちにした値。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 初回を含む試行回数。0 は 1 として扱う。
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// 待機時間のばらつきの割合（0.1 なら ±10%）。0 で無効。
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// 再試行しない。
    pub fn once() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    #[must_use]
    pub fn jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// 待機時間を固定にする（テストや決定的な再現向け）。
    #[must_use]
    pub fn no_jitter(self) -> Self {
        self.jitter(0.0)
    }

    /// 再試行ごとの待機時間を順に返すイテレーター。
    /// 要素数は attempts - 1 で、尽きた時点で再試行を打ち切る。
    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            config: self,
            retries: 0,
        }
    }

    /// retry 回目（0 始まり）の再試行前に待機する時間。
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        let capped = Duration::try_from_secs_f64(scaled)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay));

        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio > 0.0 {
            capped.mul_f64(rand::thread_rng().gen_range(1.0 - ratio..=1.0 + ratio))
        } else {
            capped
        }
    }
}

/// Backoff は [`RetryConfig::backoff`] が返す待機時間の列。
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.attempts.max(1) {
            return None;
        }
        let delay = self.config.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }
}
