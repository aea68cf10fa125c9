//! 传输器模块
//!
//! [`base::Transport`] 引擎统一负责生命周期、过滤、批量与重试；
//! 具体落地介质实现 [`trait_::TransportSink`]：
//!
//! - [`console_transport::ConsoleSink`]: 标准输出 / 标准错误
//! - [`file_transport::FileSink`]: 文件写入、轮转、保留清理、gzip 归档
//! - [`http_transport::HttpSink`]: HTTP 端点、认证、压缩、自适应批量
//!
//! [`registry`] 提供按类型名的工厂创建以及自定义类型注册。

pub mod base;
pub mod console_transport;
pub mod file_transport;
pub mod http_transport;
pub mod registry;
pub mod retry;
pub mod trait_;

pub use base::{FilterFn, FormatFn, Transport, TransportConfig, TransportStatus};
pub use console_transport::{console_transport, ConsoleSink, ConsoleTransportConfig};
pub use file_transport::{file_transport, FileSink, FileTransportConfig, JsonReplacerFn};
pub use http_transport::{
    http_transport, AdaptiveBatch, AdaptiveBatchConfig, AuthProviderFn, Endpoint, EndpointStats,
    HttpSink, HttpTransportConfig,
};
pub use registry::{
    create_transport, create_transports, default_config, register_custom_sink, CustomSinkFactory,
    TransportOptions,
};
pub use trait_::TransportSink;
