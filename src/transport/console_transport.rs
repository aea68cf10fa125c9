use crate::error::{ConfigError, TransportError};
use crate::format::FormattedEntry;
use crate::transport::base::{Transport, TransportConfig};
use crate::transport::trait_::TransportSink;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::io::Write;
use std::sync::Arc;

/// ConsoleTransport 配置
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ConsoleTransportConfig {
    /// 通用传输配置
    pub transport: TransportConfig,

    /// 输出目标: "stdout" 或 "stderr"
    #[default("stdout".to_string())]
    pub target: String,
}

/// 终端 sink
///
/// 把格式化后的条目逐行写到标准输出或标准错误。
/// 带样式的主题渲染由外部协作方负责，这里只做无样式输出。
pub struct ConsoleSink {
    stderr: bool,
}

impl ConsoleSink {
    pub fn new(config: &ConsoleTransportConfig) -> Result<Self, ConfigError> {
        let stderr = match config.target.as_str() {
            "stdout" => false,
            "stderr" => true,
            other => {
                return Err(ConfigError::InvalidOption {
                    option: "target",
                    message: format!("expected stdout or stderr, got {}", other),
                })
            }
        };
        Ok(Self { stderr })
    }
}

#[async_trait::async_trait]
impl TransportSink for ConsoleSink {
    fn kind(&self) -> &'static str {
        "console"
    }

    async fn write(&self, entry: &FormattedEntry) -> Result<(), TransportError> {
        let line = entry.render();
        if self.stderr {
            let mut out = std::io::stderr().lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
        } else {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        Ok(())
    }
}

/// 创建终端传输器
pub fn console_transport(config: ConsoleTransportConfig) -> Result<Transport, ConfigError> {
    let sink = Arc::new(ConsoleSink::new(&config)?);
    Transport::new(config.transport, sink)
}
