use crate::error::ConfigError;
use crate::transport::base::{Transport, TransportConfig};
use crate::transport::console_transport::{console_transport, ConsoleTransportConfig};
use crate::transport::file_transport::{file_transport, FileTransportConfig};
use crate::transport::http_transport::{http_transport, HttpTransportConfig};
use crate::transport::trait_::TransportSink;
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 传输器类型选项
///
/// `{"type": "file", "options": {...}}` 形式的工厂入参
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub options: Value,
}

impl TransportOptions {
    /// 从 JSON 字符串创建（支持 JSON5 格式）
    pub fn from_json(json_str: &str) -> Result<Self> {
        Ok(json5::from_str(json_str)?)
    }
}

/// 自定义 sink 工厂
pub type CustomSinkFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn TransportSink>> + Send + Sync>;

/// 自定义传输器注册表
static CUSTOM_SINKS: Lazy<RwLock<HashMap<String, CustomSinkFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// 注册自定义传输器类型
///
/// 注册后 [`create_transport`] 可以按该类型名创建实例；
/// 工厂收到 options 整体，通用传输配置取自其中的 `transport` 键
pub fn register_custom_sink(type_name: &str, factory: CustomSinkFactory) -> Result<()> {
    let mut registry = CUSTOM_SINKS
        .write()
        .map_err(|_| anyhow!("Failed to acquire write lock"))?;
    registry.insert(type_name.to_string(), factory);
    Ok(())
}

/// 根据类型选项创建传输器
///
/// 内置类型: `console` / `file` / `http`；其余类型在自定义注册表中查找，
/// 都不存在时报未知类型的配置错误
pub fn create_transport(opts: &TransportOptions) -> Result<Transport> {
    match opts.type_name.as_str() {
        "console" => {
            let config: ConsoleTransportConfig = serde_json::from_value(opts.options.clone())?;
            Ok(console_transport(config)?)
        }
        "file" => {
            let config: FileTransportConfig = serde_json::from_value(opts.options.clone())?;
            Ok(file_transport(config)?)
        }
        "http" => {
            let config: HttpTransportConfig = serde_json::from_value(opts.options.clone())?;
            Ok(http_transport(config)?)
        }
        other => {
            let factory = {
                let registry = CUSTOM_SINKS
                    .read()
                    .map_err(|_| anyhow!("Failed to acquire read lock"))?;
                registry.get(other).cloned()
            };
            let factory =
                factory.ok_or_else(|| ConfigError::UnknownType(other.to_string()))?;

            let sink = factory(&opts.options)?;
            let transport_config: TransportConfig = match opts.options.get("transport") {
                Some(section) => serde_json::from_value(section.clone())?,
                None => TransportConfig::default(),
            };
            Ok(Transport::new(transport_config, sink)?)
        }
    }
}

/// 批量创建传输器
///
/// 任何一项失败则整体失败，错误信息带上出错项的序号
pub fn create_transports(configs: &[TransportOptions]) -> Result<Vec<Transport>> {
    let mut transports = Vec::with_capacity(configs.len());
    for (index, opts) in configs.iter().enumerate() {
        let transport = create_transport(opts)
            .map_err(|e| anyhow!("transport #{} ({}): {}", index, opts.type_name, e))?;
        transports.push(transport);
    }
    Ok(transports)
}

/// 校验传输器是否可用：有标识且未被销毁
pub async fn validate(transport: &Transport) -> bool {
    !transport.id().is_empty() && !transport.get_status().await.destroyed
}

/// 各内置类型的文档化默认配置
pub fn default_config(type_name: &str) -> Result<Value, ConfigError> {
    let value = match type_name {
        "console" => serde_json::to_value(ConsoleTransportConfig::default()),
        "file" => serde_json::to_value(FileTransportConfig::default()),
        "http" => serde_json::to_value(HttpTransportConfig::default()),
        other => return Err(ConfigError::UnknownType(other.to_string())),
    };
    value.map_err(|e| ConfigError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::format::FormattedEntry;
    use crate::level::LogLevel;
    use crate::record::LogRecord;

    #[tokio::test]
    async fn test_create_console_transport() -> Result<()> {
        let opts = TransportOptions::from_json(
            r#"
            {
                type: "console",
                options: {
                    target: "stdout",
                    transport: { name: "console-main" }
                }
            }
            "#,
        )?;

        let transport = create_transport(&opts)?;
        assert_eq!(transport.name(), "console-main");
        assert!(validate(&transport).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_file_transport() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let opts = TransportOptions::from_json(&format!(
            r#"
            {{
                type: "file",
                options: {{
                    filename: "app.log",
                    dirname: "{}",
                    max_size: "1m"
                }}
            }}
            "#,
            temp_dir.path().display()
        ))?;

        let transport = create_transport(&opts)?;
        transport
            .log(&LogRecord::new(LogLevel::Info, "via registry"))
            .await?;
        assert!(temp_dir.path().join("app.log").exists());
        Ok(())
    }

    #[test]
    fn test_create_http_transport() -> Result<()> {
        let opts = TransportOptions::from_json(
            r#"
            {
                type: "http",
                options: {
                    url: "https://logs.example.com/ingest",
                    auth_type: "bearer",
                    token: "t-1"
                }
            }
            "#,
        )?;

        let transport = create_transport(&opts)?;
        assert!(!transport.id().is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_type_rejected() {
        let opts = TransportOptions {
            type_name: "syslog".to_string(),
            options: serde_json::json!({}),
        };
        let result = create_transport(&opts);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unknown transport type"));
    }

    #[test]
    fn test_invalid_options_rejected() {
        // file 类型缺少必填的 filename
        let opts = TransportOptions {
            type_name: "file".to_string(),
            options: serde_json::json!({}),
        };
        assert!(create_transport(&opts).is_err());
    }

    #[tokio::test]
    async fn test_register_custom_sink() -> Result<()> {
        struct NullSink;

        #[async_trait::async_trait]
        impl TransportSink for NullSink {
            fn kind(&self) -> &'static str {
                "null"
            }

            async fn write(&self, _entry: &FormattedEntry) -> Result<(), TransportError> {
                Ok(())
            }
        }

        register_custom_sink(
            "null",
            Arc::new(|_options| Ok(Arc::new(NullSink) as Arc<dyn TransportSink>)),
        )?;

        let opts = TransportOptions::from_json(
            r#"
            {
                type: "null",
                options: {
                    transport: { name: "null-sink", batch_size: 0 }
                }
            }
            "#,
        )?;
        let transport = create_transport(&opts)?;
        assert_eq!(transport.name(), "null-sink");
        assert!(transport
            .log(&LogRecord::new(LogLevel::Info, "discarded"))
            .await?);
        Ok(())
    }

    #[test]
    fn test_create_transports_reports_failing_index() {
        let configs = vec![
            TransportOptions {
                type_name: "console".to_string(),
                options: serde_json::json!({}),
            },
            TransportOptions {
                type_name: "file".to_string(),
                options: serde_json::json!({}),
            },
        ];
        let err = create_transports(&configs).unwrap_err().to_string();
        assert!(err.contains("#1"));
    }

    #[test]
    fn test_default_config_shapes() {
        let console = default_config("console").unwrap();
        assert_eq!(console["target"], "stdout");

        let file = default_config("file").unwrap();
        assert_eq!(file["dirname"], ".");
        assert_eq!(file["append_newline"], true);

        let http = default_config("http").unwrap();
        assert_eq!(http["method"], "POST");
        assert_eq!(http["content_type"], "application/json");

        assert!(default_config("kafka").is_err());
    }
}
