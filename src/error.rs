use std::path::PathBuf;
use thiserror::Error;

/// 配置错误
///
/// 在构造阶段同步抛出，出错的传输器不会被注册。
/// 配置错误不会在内部被捕获，总是直接返回给调用方。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("option {option} out of range: {message}")]
    OutOfRange {
        option: &'static str,
        message: String,
    },

    #[error("invalid option {option}: {message}")]
    InvalidOption {
        option: &'static str,
        message: String,
    },

    #[error("inconsistent options: {0}")]
    Inconsistent(String),

    #[error("unknown transport type: {0}")]
    UnknownType(String),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl From<garde::Report> for ConfigError {
    fn from(report: garde::Report) -> Self {
        ConfigError::Validation(report.to_string())
    }
}

/// 运行期错误
///
/// 在正常运行过程中抛出。先经过重试引擎，重试耗尽后要么返回给调用方，
/// 要么在 silent 模式下降级为诊断日志。
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport already destroyed")]
    Destroyed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("response too large: {size} bytes exceeds limit of {limit} (status {status})")]
    ResponseTooLarge { size: u64, limit: u64, status: u16 },

    #[error("http request failed with status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("lock acquisition timed out for {path}")]
    LockTimeout { path: PathBuf },

    #[error("auth provider failed: {message}")]
    AuthProvider { message: String },

    #[error("formatter failed: {0}")]
    Format(String),
}

impl TransportError {
    /// 该错误是否值得重试
    ///
    /// 序列化错误、超限负载、认证提供方失败属于确定性失败，重试无意义。
    /// HTTP 状态错误由 HTTP 传输器按状态码单独分类，不走这里。
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Io(_) => true,
            TransportError::Network { .. } => true,
            TransportError::LockTimeout { .. } => true,
            TransportError::Destroyed
            | TransportError::Serialization(_)
            | TransportError::PayloadTooLarge { .. }
            | TransportError::AuthProvider { .. }
            | TransportError::Format(_) => false,
            TransportError::ResponseTooLarge { .. } => false,
            TransportError::HttpStatus { .. } => false,
        }
    }

    /// 从 reqwest 错误转换
    pub fn from_request<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TransportError::Network {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingOption("filename");
        assert_eq!(err.to_string(), "missing required option: filename");

        let err = ConfigError::UnknownType("kafka".to_string());
        assert_eq!(err.to_string(), "unknown transport type: kafka");
    }

    #[test]
    fn test_transport_error_retryable() {
        let err = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        assert!(err.is_retryable());

        let err = TransportError::Network {
            message: "connection refused".to_string(),
            source: None,
        };
        assert!(err.is_retryable());

        let err = TransportError::PayloadTooLarge {
            size: 1025,
            limit: 1024,
        };
        assert!(!err.is_retryable());

        let err = TransportError::AuthProvider {
            message: "token expired".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ResponseTooLarge {
            size: 2 * 1024 * 1024,
            limit: 1024 * 1024,
            status: 200,
        };
        let msg = err.to_string();
        assert!(msg.contains("2097152"));
        assert!(msg.contains("1048576"));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = TransportError::Network {
            message: "send failed".to_string(),
            source: Some(Box::new(io)),
        };
        assert!(err.source().is_some());
    }
}
