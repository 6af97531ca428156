//! 活性看门狗：跟踪距上次匹配的耗时，并对超限做限频上报。

use std::time::Instant;

/// 基准间隔低于该值（秒）时倍数下限提升为 [`SHORT_INTERVAL_MIN_MULTIPLIER`]。
const SHORT_INTERVAL_SECS: f64 = 1.5;
/// 短间隔下的最小倍数；1 秒采样时设备实际间隔常为 2-3 秒。
const SHORT_INTERVAL_MIN_MULTIPLIER: f64 = 5.0;

/// 匹配模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolPattern {
    /// 任意收到的字节
    Any,
    /// 指定字节
    Exact(u8),
}

impl SymbolPattern {
    /// `None` 表示读超时，不匹配任何模式。
    pub fn matches(self, symbol: Option<u8>) -> bool {
        match (self, symbol) {
            (_, None) => false,
            (Self::Any, Some(_)) => true,
            (Self::Exact(expected), Some(actual)) => expected == actual,
        }
    }
}

/// 单次检查结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogCheck {
    pub within_limit: bool,
    pub relative_delay: f64,
    pub should_report: bool,
}

/// 活性看门狗
#[derive(Debug, Clone)]
pub struct LivenessWatchdog {
    multiplier: f64,
    base_interval: f64,
    limit: f64,
    last_match_at: Option<Instant>,
    last_reported_multiple: i64,
}

impl LivenessWatchdog {
    /// `base_interval` 单位为秒。
    pub fn new(multiplier: f64, base_interval: f64) -> Self {
        let mut watchdog = Self {
            multiplier,
            base_interval,
            limit: 0.0,
            last_match_at: None,
            last_reported_multiple: 0,
        };
        watchdog.update_limit(base_interval);
        watchdog
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn base_interval(&self) -> f64 {
        self.base_interval
    }

    /// 重新计算上限，不重置 `last_match_at`。
    pub fn update_limit(&mut self, base_interval: f64) {
        let multiplier = if base_interval < SHORT_INTERVAL_SECS {
            self.multiplier.max(SHORT_INTERVAL_MIN_MULTIPLIER)
        } else {
            self.multiplier
        };
        self.base_interval = base_interval;
        self.limit = multiplier * base_interval;
    }

    pub fn check(&mut self, symbol: Option<u8>, pattern: SymbolPattern) -> WatchdogCheck {
        self.check_at(symbol, pattern, Instant::now())
    }

    pub fn check_at(
        &mut self,
        symbol: Option<u8>,
        pattern: SymbolPattern,
        now: Instant,
    ) -> WatchdogCheck {
        let last = *self.last_match_at.get_or_insert(now);
        let last = if pattern.matches(symbol) {
            self.last_match_at = Some(now);
            now
        } else {
            last
        };

        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        let relative_delay = if self.base_interval > 0.0 {
            (elapsed / self.base_interval * 10.0).round() / 10.0
        } else {
            0.0
        };

        if elapsed < self.limit {
            self.last_reported_multiple = 0;
            return WatchdogCheck {
                within_limit: true,
                relative_delay,
                should_report: false,
            };
        }

        let multiple = relative_delay.floor() as i64;
        let should_report = multiple != self.last_reported_multiple;
        if should_report {
            self.last_reported_multiple = multiple;
        }
        WatchdogCheck {
            within_limit: false,
            relative_delay,
            should_report,
        }
    }
}
