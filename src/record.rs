use crate::level::LogLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 运行环境标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 开发环境
    Development,
    /// 测试环境
    Testing,
    /// 生产环境
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!("invalid environment: {}", s)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// 日志参数值
///
/// 日志记录携带的原始参数，支持文本、错误和任意 JSON 兼容数据
#[derive(Debug, Clone)]
pub enum ArgValue {
    /// 纯文本参数
    Text(String),
    /// 错误参数（保留错误名称、消息和可选的调用栈）
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// 任意 JSON 兼容的数据
    Value(Value),
}

impl ArgValue {
    /// 从实现了 std::error::Error 的错误构造参数
    ///
    /// 错误名称取类型名的末段，错误链展开进 stack
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }

        ArgValue::Error {
            name: std::any::type_name::<E>()
                .rsplit("::")
                .next()
                .unwrap_or("Error")
                .to_string(),
            message: err.to_string(),
            stack: if stack.is_empty() {
                None
            } else {
                Some(stack.join("\n"))
            },
        }
    }
}

impl Serialize for ArgValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ArgValue::Text(s) => serializer.serialize_str(s),
            ArgValue::Error {
                name,
                message,
                stack,
            } => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("name", name)?;
                map.serialize_entry("message", message)?;
                map.serialize_entry("stack", stack)?;
                map.end()
            }
            ArgValue::Value(v) => v.serialize(serializer),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Text(s) => write!(f, "{}", s),
            ArgValue::Error { name, message, .. } => write!(f, "{}: {}", name, message),
            ArgValue::Value(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        ArgValue::Value(Value::from(n))
    }
}

impl From<u64> for ArgValue {
    fn from(n: u64) -> Self {
        ArgValue::Value(Value::from(n))
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        ArgValue::Value(Value::from(n))
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Value(Value::from(b))
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        ArgValue::Value(v)
    }
}

/// 日志记录
///
/// 由日志门面创建，一经产生不可变，被所有启用的传输器消费
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// 日志级别
    pub level: LogLevel,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
    /// 运行环境
    pub environment: Environment,
    /// 消息（参数的字符串拼接渲染）
    pub message: String,
    /// 原始参数序列
    pub args: Vec<ArgValue>,
}

impl LogRecord {
    /// 创建新的日志记录
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            environment: Environment::default(),
            message: message.into(),
            args: Vec::new(),
        }
    }

    /// 附加单个参数
    pub fn with_arg(mut self, arg: impl Into<ArgValue>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 附加一组参数
    pub fn with_args(mut self, args: impl IntoIterator<Item = ArgValue>) -> Self {
        self.args.extend(args);
        self
    }

    /// 设置运行环境
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// 参数的纯文本渲染
    ///
    /// 带样式的终端渲染由外部协作方完成，这里只提供无样式的字符串形式
    pub fn formatted_args(&self) -> Vec<String> {
        self.args.iter().map(|a| a.to_string()).collect()
    }
}
