//! # 设备通信能力模块
//!
//! 负责与串口测量设备（MU）的全部交互：
//! - **Transport**：逐字节带超时读取的传输抽象（串口 / 内存模拟）
//! - **LivenessWatchdog**：距上次匹配的耗时跟踪，区分“设备静默”与“帧失步”
//! - **FrameDecoder**：`'A'` … `'Z'` 帧状态机，输出 [`DecodedLine`]
//! - **Device**：控制命令与状态报文解析
//!
//! ## 数据流
//!
//! ```text
//! serial bytes
//!       │
//!       ▼
//! FrameDecoder (Seeking ⇄ InFrame)
//!   ├── data watchdog  (Any)
//!   └── frame watchdog (Exact('A') / Exact('Z'))
//!       │
//!       ▼
//! DecodedLine → RecordClassifier (ingest)
//! ```
//!
//! ## 帧格式
//!
//! `'A'` + payload + 控制字符 + `'Z'`，输出的行不含两端标记与控制字符。

mod device;
mod error;
mod frame;
mod transport;
mod types;
mod watchdog;

pub use device::{
    parse_device_info, parse_status_response, Device, DeviceInfo, DeviceSettings,
    DEFAULT_SETTLE_TIME,
};
pub use error::ProtocolError;
pub use frame::{FrameDecoder, FrameState, MAX_FRAME_LEN};
pub use transport::{MockTransport, SerialTransport, Transport, SERIAL_TIMEOUT};
pub use types::*;
pub use watchdog::{LivenessWatchdog, SymbolPattern, WatchdogCheck};
