use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 日志级别
///
/// 级别之间存在全序关系：Debug < Info < Warn < Error < Silent。
/// Silent 是一个特殊级别：以 Silent 作为最低级别的传输器不会输出任何日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// 调试信息
    Debug = 0,
    /// 一般信息
    Info = 1,
    /// 警告信息
    Warn = 2,
    /// 错误信息
    Error = 3,
    /// 不输出任何日志
    Silent = 4,
}

impl LogLevel {
    /// 级别名称（大写）
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Silent => "SILENT",
        }
    }

    /// 该级别的记录是否可能被输出
    ///
    /// Silent 级别的记录永远不会被输出
    pub fn is_emittable(&self) -> bool {
        !matches!(self, LogLevel::Silent)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            _ => Err(format!("invalid log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("INFO").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("Warn").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("ERROR").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("silent").unwrap(), LogLevel::Silent);
    }

    #[test]
    fn test_log_level_from_str_invalid() {
        assert!(LogLevel::from_str("verbose").is_err());
        assert!(LogLevel::from_str("").is_err());
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
        assert_eq!(LogLevel::Silent.to_string(), "SILENT");
    }

    #[test]
    fn test_log_level_ordering() {
        // Silent 高于一切，永远不会被任何 min_level 放行
        assert!(LogLevel::Silent > LogLevel::Error);
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
    }

    #[test]
    fn test_log_level_emittable() {
        assert!(LogLevel::Debug.is_emittable());
        assert!(LogLevel::Error.is_emittable());
        assert!(!LogLevel::Silent.is_emittable());
    }

    #[test]
    fn test_log_level_serde_roundtrip() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, r#""WARN""#);
        let level: LogLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(level, LogLevel::Warn);
    }
}
