use crate::error::TransportError;
use crate::level::LogLevel;
use crate::record::{ArgValue, Environment, LogRecord};
use crate::transport::base::Transport;
use crate::transport::registry::{create_transports, TransportOptions};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use smart_default::SmartDefault;
use std::str::FromStr;
use tokio::sync::RwLock;

/// Logger 创建配置
#[derive(Debug, Clone, Deserialize, SmartDefault)]
#[serde(default)]
pub struct LoggerConfig {
    /// 门面级别，低于该级别的记录不会产生
    #[default("info".to_string())]
    pub level: String,

    /// 运行环境标签
    #[default("development".to_string())]
    pub environment: String,

    /// 传输器配置列表
    #[default(vec![TransportOptions { type_name: "console".to_string(), options: serde_json::json!({}) }])]
    pub transports: Vec<TransportOptions>,
}

/// 日志门面
///
/// 独占持有注册的传输器集合，每条记录对每个传输器恰好投递一次。
/// 传输器自身的 silent 策略决定失败如何呈现；非 silent 传输器的
/// 失败在所有传输器都投递完之后汇总抛出。
pub struct Logger {
    level: RwLock<LogLevel>,
    environment: Environment,
    transports: RwLock<Vec<Transport>>,
}

impl Logger {
    /// 从配置创建 Logger，传输器经由注册表逐个构建
    pub fn new(config: LoggerConfig) -> Result<Self> {
        let level = LogLevel::from_str(&config.level).map_err(|e| anyhow!(e))?;
        let environment = Environment::from_str(&config.environment).map_err(|e| anyhow!(e))?;
        let transports = create_transports(&config.transports)?;

        Ok(Self {
            level: RwLock::new(level),
            environment,
            transports: RwLock::new(transports),
        })
    }

    /// 初始化所有传输器
    pub async fn init(&self) -> Result<(), TransportError> {
        let transports = self.transports.read().await;
        for transport in transports.iter() {
            transport.init().await?;
        }
        Ok(())
    }

    /// 销毁所有传输器；单个失败不阻断其余的收尾
    pub async fn shutdown(&self) {
        let transports = self.transports.read().await;
        for transport in transports.iter() {
            if let Err(e) = transport.destroy().await {
                log::warn!("transport {} failed to destroy: {}", transport.id(), e);
            }
        }
    }

    /// 追加一个传输器
    pub async fn add_transport(&self, transport: Transport) {
        self.transports.write().await.push(transport);
    }

    /// 按 id 摘除一个传输器（不触发 destroy）
    pub async fn remove_transport(&self, id: &str) -> Option<Transport> {
        let mut transports = self.transports.write().await;
        let index = transports.iter().position(|t| t.id() == id)?;
        Some(transports.remove(index))
    }

    /// 设置门面级别
    pub async fn set_level(&self, level: LogLevel) {
        *self.level.write().await = level;
    }

    /// 获取门面级别
    pub async fn get_level(&self) -> LogLevel {
        *self.level.read().await
    }

    /// 投递一条记录到所有传输器
    pub async fn log(&self, record: LogRecord) -> Result<()> {
        if record.level < *self.level.read().await {
            return Ok(());
        }

        let transports = self.transports.read().await;
        let mut first_error: Option<TransportError> = None;
        for transport in transports.iter() {
            if let Err(e) = transport.log(&record).await {
                log::warn!("transport {} rejected record: {}", transport.id(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// 记录带参数的日志（通用方法）
    pub async fn log_with(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        args: impl IntoIterator<Item = ArgValue>,
    ) -> Result<()> {
        let record = LogRecord::new(level, message.into())
            .with_environment(self.environment)
            .with_args(args);
        self.log(record).await
    }

    /// 记录 DEBUG 级别日志
    pub async fn debug(&self, message: impl Into<String>) -> Result<()> {
        self.log_with(LogLevel::Debug, message, []).await
    }

    /// 记录 INFO 级别日志
    pub async fn info(&self, message: impl Into<String>) -> Result<()> {
        self.log_with(LogLevel::Info, message, []).await
    }

    /// 记录 WARN 级别日志
    pub async fn warn(&self, message: impl Into<String>) -> Result<()> {
        self.log_with(LogLevel::Warn, message, []).await
    }

    /// 记录 ERROR 级别日志
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.log_with(LogLevel::Error, message, []).await
    }
}
