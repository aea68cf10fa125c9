//! LogX - 可配置的多 sink 异步日志库
//!
//! 提供分级、格式化的日志投递，以及把结构化日志记录转发到
//! 多种目的地的可插拔"传输器"。
//!
//! ## 模块
//!
//! - **level / record**: 日志级别与不可变的日志记录
//! - **format**: 默认格式化与深度受限的参数序列化
//! - **transport**: 传输器引擎（批量、重试、回落）与 console/file/http 落地
//! - **lock**: 进程内锁管理器与跨进程磁盘锁文件协议
//! - **logger**: 日志门面，独占持有传输器集合
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use logx::{Logger, LoggerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // 使用 json5::from_str 构建 LoggerConfig
//!     let config: LoggerConfig = json5::from_str(r#"
//!         {
//!             level: "info",
//!             environment: "production",
//!             transports: [
//!                 { type: "console", options: {} },
//!                 {
//!                     type: "file",
//!                     options: {
//!                         filename: "app.log",
//!                         dirname: "/var/log/myapp",
//!                         max_size: "10m",
//!                         max_files: 5,
//!                         json: true
//!                     }
//!                 }
//!             ]
//!         }
//!     "#)?;
//!
//!     let logger = Logger::new(config)?;
//!     logger.init().await?;
//!
//!     logger.info("Application started").await?;
//!     logger.error("Connection failed").await?;
//!
//!     logger.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod format;
pub mod human;
pub mod level;
pub mod lock;
pub mod logger;
pub mod record;
pub mod transport;

// 重新导出主要的公共 API
pub use error::{ConfigError, TransportError};
pub use format::{default_entry, FormattedEntry};
pub use level::LogLevel;
pub use logger::{Logger, LoggerConfig};
pub use record::{ArgValue, Environment, LogRecord};

pub use transport::{
    console_transport, create_transport, create_transports, default_config, file_transport,
    http_transport, register_custom_sink, Transport, TransportConfig, TransportOptions,
    TransportSink, TransportStatus,
};

pub use lock::{LockManager, LockManagerConfig, LockfileConfig};
