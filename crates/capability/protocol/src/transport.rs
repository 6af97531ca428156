//! 传输层抽象：逐字节读取，读超时返回 `None`。

use crate::error::ProtocolError;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// 串口单字节读写超时
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// 设备传输抽象
pub trait Transport: Send {
    /// 读取一个字节；读超时返回 `Ok(None)`。
    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError>;

    /// 写入全部数据。
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// 接收缓冲区中可立即读取的字节数。
    fn bytes_available(&mut self) -> Result<usize, ProtocolError>;

    /// 清空收发缓冲区。
    fn clear_buffers(&mut self) -> Result<(), ProtocolError>;

    /// 读出当前已到达的全部字节。
    fn drain_available(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        while self.bytes_available()? > 0 {
            match self.read_byte()? {
                Some(byte) => out.push(byte),
                None => break,
            }
        }
        Ok(out)
    }
}

/// 串口传输（8-N-1，RTS/CTS 硬件流控）
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let mut port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Hardware)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        // 设备在 DTR 拉高时会复位。
        port.write_data_terminal_ready(false)?;
        port.clear(ClearBuffer::All)?;
        info!(target: "mu.serial", path, baud_rate, "serial_opened");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        let mut buf = [0u8; 1];
        let result = self.port.read(&mut buf);
        read_outcome(result, buf[0])
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, ProtocolError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn clear_buffers(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

/// 单字节读取结果：读超时与信号中断都视为本次未收到数据。
fn read_outcome(result: std::io::Result<usize>, byte: u8) -> Result<Option<u8>, ProtocolError> {
    match result {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte)),
        Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// 内存模拟传输
///
/// 读队列中的 `None` 模拟一次读超时；队列耗尽后返回 [`ProtocolError::TransportClosed`]。
/// 克隆共享同一缓冲区，测试可在传输被移交后继续注入数据。
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    read_queue: VecDeque<Option<u8>>,
    written: Vec<u8>,
    clears: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注入待读取的字节。
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_queue.extend(data.iter().copied().map(Some));
    }

    /// 注入 `count` 次读超时。
    pub fn inject_timeouts(&self, count: usize) {
        self.lock()
            .read_queue
            .extend(std::iter::repeat(None).take(count));
    }

    /// 以 `'A'` + payload + 控制字符 + `'Z'` 注入一帧。
    pub fn inject_frame(&self, payload: &str) {
        let mut frame = Vec::with_capacity(payload.len() + 3);
        frame.push(b'A');
        frame.extend_from_slice(payload.as_bytes());
        frame.push(b'\r');
        frame.push(b'Z');
        self.inject_read(&frame);
    }

    /// 已写入的全部数据。
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    /// `clear_buffers` 被调用的次数。
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    pub fn pending(&self) -> usize {
        self.lock().read_queue.len()
    }
}

impl Transport for MockTransport {
    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        self.lock()
            .read_queue
            .pop_front()
            .ok_or(ProtocolError::TransportClosed)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.lock().written.extend_from_slice(data);
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, ProtocolError> {
        // 只统计连续可读的字节，遇到模拟超时即停止。
        Ok(self
            .lock()
            .read_queue
            .iter()
            .take_while(|symbol| symbol.is_some())
            .count())
    }

    fn clear_buffers(&mut self) -> Result<(), ProtocolError> {
        let mut inner = self.lock();
        inner.read_queue.clear();
        inner.clears += 1;
        Ok(())
    }
}
