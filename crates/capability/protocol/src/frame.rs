//! 帧解码状态机
//!
//! 拉取式读取：每次 [`FrameDecoder::poll`] 只消费一次读取，便于在测试中逐步驱动。

use crate::error::ProtocolError;
use crate::transport::Transport;
use crate::types::{DecodedLine, WatchdogKind, WatchdogReport, END_MARKER, START_MARKER};
use crate::watchdog::{LivenessWatchdog, SymbolPattern};
use std::time::Instant;
use tracing::{debug, error, warn};

/// 单帧最大长度，超过视为失步并丢弃。
pub const MAX_FRAME_LEN: usize = 8192;

/// 看门狗默认倍数
const DEFAULT_MULTIPLIER: f64 = 3.0;
/// 看门狗默认基准间隔（秒），设置采样间隔后更新。
const DEFAULT_BASE_INTERVAL: f64 = 10.0;

/// 解码状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Seeking,
    InFrame,
}

/// 帧解码器
pub struct FrameDecoder<T: Transport> {
    transport: T,
    state: FrameState,
    buffer: Vec<u8>,
    data_watchdog: LivenessWatchdog,
    frame_watchdog: LivenessWatchdog,
    reports: Vec<WatchdogReport>,
}

impl<T: Transport> FrameDecoder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: FrameState::Seeking,
            buffer: Vec::new(),
            data_watchdog: LivenessWatchdog::new(DEFAULT_MULTIPLIER, DEFAULT_BASE_INTERVAL),
            frame_watchdog: LivenessWatchdog::new(DEFAULT_MULTIPLIER, DEFAULT_BASE_INTERVAL),
            reports: Vec::new(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 同步更新两个看门狗的基准间隔（秒）。
    pub fn update_interval(&mut self, base_interval: f64) {
        self.data_watchdog.update_limit(base_interval);
        self.frame_watchdog.update_limit(base_interval);
    }

    /// 取出自上次调用以来的超时上报。
    pub fn take_reports(&mut self) -> Vec<WatchdogReport> {
        std::mem::take(&mut self.reports)
    }

    /// 丢弃未完成的帧并回到 Seeking。
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = FrameState::Seeking;
    }

    pub fn poll(&mut self) -> Result<Option<DecodedLine>, ProtocolError> {
        self.poll_at(Instant::now())
    }

    /// 消费一次读取；帧完整时返回解码行。
    pub fn poll_at(&mut self, now: Instant) -> Result<Option<DecodedLine>, ProtocolError> {
        let symbol = self.transport.read_byte()?;
        match self.state {
            FrameState::Seeking => {
                self.observe(WatchdogKind::Data, symbol, SymbolPattern::Any, now);
                self.observe(
                    WatchdogKind::Frame,
                    symbol,
                    SymbolPattern::Exact(START_MARKER),
                    now,
                );
                if symbol == Some(START_MARKER) {
                    self.buffer.clear();
                    self.state = FrameState::InFrame;
                } else if let Some(byte) = symbol {
                    // 帧外的数据只保留用于诊断。
                    if self.buffer.len() < MAX_FRAME_LEN {
                        self.buffer.push(byte);
                    }
                }
                Ok(None)
            }
            FrameState::InFrame => {
                self.observe(
                    WatchdogKind::Frame,
                    symbol,
                    SymbolPattern::Exact(END_MARKER),
                    now,
                );
                match symbol {
                    None => Ok(None),
                    Some(END_MARKER) => {
                        // 去掉尾部控制字符。
                        self.buffer.pop();
                        let line = String::from_utf8_lossy(&self.buffer).into_owned();
                        self.buffer.clear();
                        self.state = FrameState::Seeking;
                        mu_telemetry::record_frame_decoded();
                        Ok(Some(DecodedLine::new(line)))
                    }
                    Some(byte) => {
                        self.buffer.push(byte);
                        if self.buffer.len() > MAX_FRAME_LEN {
                            warn!(
                                target: "mu.frame",
                                len = self.buffer.len(),
                                "frame_too_long_discarded"
                            );
                            mu_telemetry::record_frame_discarded();
                            self.reset();
                        }
                        Ok(None)
                    }
                }
            }
        }
    }

    /// 读取直到得到一个完整帧。
    pub fn next_line(&mut self) -> Result<DecodedLine, ProtocolError> {
        loop {
            if let Some(line) = self.poll()? {
                return Ok(line);
            }
        }
    }

    fn observe(
        &mut self,
        kind: WatchdogKind,
        symbol: Option<u8>,
        pattern: SymbolPattern,
        now: Instant,
    ) {
        let watchdog = match kind {
            WatchdogKind::Data => &mut self.data_watchdog,
            WatchdogKind::Frame => &mut self.frame_watchdog,
        };
        let check = watchdog.check_at(symbol, pattern, now);
        if !check.should_report {
            return;
        }
        let waiting_for = match pattern {
            SymbolPattern::Exact(marker) => marker,
            SymbolPattern::Any => 0,
        };
        let report = WatchdogReport {
            kind,
            waiting_for,
            relative_delay: check.relative_delay,
        };
        error!(
            target: "mu.frame",
            watchdog = kind.as_str(),
            relative_delay = check.relative_delay,
            "{}",
            report.message()
        );
        if kind == WatchdogKind::Frame && waiting_for == START_MARKER {
            debug!(
                target: "mu.frame",
                buffer = %String::from_utf8_lossy(&self.buffer),
                "seeking_buffer_state"
            );
        }
        mu_telemetry::record_watchdog_report();
        self.reports.push(report);
    }
}
