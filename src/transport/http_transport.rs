use crate::error::{ConfigError, TransportError};
use crate::format::FormattedEntry;
use crate::human::HumanSize;
use crate::transport::base::{Transport, TransportConfig};
use crate::transport::retry::{jitter_upward, Backoff};
use crate::transport::trait_::TransportSink;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::serde_as;
use smart_default::SmartDefault;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// HTTP 重试的单向抖动幅度（0-30%）
const HTTP_RETRY_JITTER: f64 = 0.3;

/// HTTP 重试的延迟上限
const HTTP_RETRY_CAP: Duration = Duration::from_secs(60);

/// 自定义认证提供方
///
/// 返回的头表会被合并进请求头；失败不会被重试
pub type AuthProviderFn = Arc<
    dyn Fn() -> BoxFuture<'static, Result<HashMap<String, String>, TransportError>> + Send + Sync,
>;

/// 自适应批量参数
///
/// 三个旋钮保持显式：增长因子、收缩因子和上下限
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct AdaptiveBatchConfig {
    /// 快请求（duration < fast_threshold_ms）后的增长因子
    #[default(1.2)]
    pub grow_factor: f64,

    /// 慢请求（duration > slow_threshold_ms）后的收缩因子
    #[default(0.8)]
    pub shrink_factor: f64,

    /// 请求失败后的收缩因子
    #[default(0.5)]
    pub failure_factor: f64,

    /// 批量上限
    #[default(10_000)]
    pub max_size: usize,

    /// 失败收缩的批量下限
    #[default(1000)]
    pub min_size: usize,

    /// 初始批量
    #[default(1000)]
    pub initial_size: usize,

    /// 快请求阈值（毫秒）
    #[default(200)]
    pub fast_threshold_ms: u64,

    /// 慢请求阈值（毫秒）
    #[default(2000)]
    pub slow_threshold_ms: u64,
}

/// 自适应批量状态机
#[derive(Debug)]
pub struct AdaptiveBatch {
    config: AdaptiveBatchConfig,
    size: usize,
}

impl AdaptiveBatch {
    pub fn new(config: AdaptiveBatchConfig) -> Self {
        let size = config.initial_size.max(1);
        Self { config, size }
    }

    /// 当前批量大小
    pub fn current(&self) -> usize {
        self.size
    }

    /// 成功请求：按耗时调整批量
    pub fn on_success(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        if millis < self.config.fast_threshold_ms {
            let grown = (self.size as f64 * self.config.grow_factor) as usize;
            self.size = grown.max(self.size + 1).min(self.config.max_size);
        } else if millis > self.config.slow_threshold_ms {
            let shrunk = (self.size as f64 * self.config.shrink_factor) as usize;
            self.size = shrunk.max(1);
        }
    }

    /// 失败请求：腰斩但不低于下限
    pub fn on_failure(&mut self) {
        let shrunk = (self.size as f64 * self.config.failure_factor) as usize;
        self.size = shrunk.max(self.config.min_size).min(self.config.max_size);
    }
}

/// HttpTransport 配置
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// 通用传输配置
    #[garde(skip)]
    pub transport: TransportConfig,

    // ========== 端点 ==========
    /// 完整 URL，优先于 host/port/path/ssl
    #[garde(skip)]
    #[default(None)]
    pub url: Option<String>,

    #[garde(skip)]
    #[default("localhost".to_string())]
    pub host: String,

    /// 端口，缺省按 ssl 取 80/443
    #[garde(skip)]
    #[default(None)]
    pub port: Option<u16>,

    #[garde(skip)]
    #[default("/".to_string())]
    pub path: String,

    #[garde(skip)]
    #[default(false)]
    pub ssl: bool,

    // ========== 请求 ==========
    #[garde(pattern("GET|POST|PUT|PATCH|DELETE"))]
    #[default("POST".to_string())]
    pub method: String,

    /// 额外请求头
    #[garde(skip)]
    #[default(HashMap::new())]
    pub headers: HashMap<String, String>,

    #[garde(skip)]
    #[default("application/json".to_string())]
    pub content_type: String,

    // ========== 认证 ==========
    #[garde(pattern("none|basic|bearer|custom"))]
    #[default("none".to_string())]
    pub auth_type: String,

    #[garde(skip)]
    #[default(None)]
    pub username: Option<String>,

    #[garde(skip)]
    #[default(None)]
    pub password: Option<String>,

    #[garde(skip)]
    #[default(None)]
    pub token: Option<String>,

    // ========== 压缩 ==========
    /// 请求体压缩: none / gzip / deflate
    #[garde(pattern("none|gzip|deflate"))]
    #[default("none".to_string())]
    pub compression: String,

    // ========== 重试 ==========
    #[garde(range(max = 100))]
    #[default(3)]
    pub max_retries: u32,

    #[garde(skip)]
    #[default(1000)]
    pub retry_delay_ms: u64,

    #[garde(skip)]
    #[default(true)]
    pub exponential_backoff: bool,

    /// 5xx 之外仍然重试的状态码
    #[garde(skip)]
    #[default(vec![408, 429])]
    pub retry_statuses: Vec<u16>,

    // ========== 边界 ==========
    /// 请求超时（毫秒），覆盖连接到响应体读完的全程
    #[garde(range(min = 1))]
    #[default(30_000)]
    pub timeout_ms: u64,

    /// 请求体上限
    #[serde_as(as = "HumanSize")]
    #[garde(skip)]
    #[default(5 * 1024 * 1024)]
    pub max_payload_size: u64,

    /// 响应体上限，超过即中止读取
    #[serde_as(as = "HumanSize")]
    #[garde(skip)]
    #[default(1024 * 1024)]
    pub max_response_size: u64,

    /// 接受无效证书（仅用于自签名端点）
    #[garde(skip)]
    #[default(false)]
    pub accept_invalid_certs: bool,

    // ========== 批量 ==========
    /// 自适应批量参数
    #[garde(skip)]
    pub adaptive: AdaptiveBatchConfig,
}

/// 解析后的端点
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub ssl: bool,
    pub url: String,
}

/// 端点计数器
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointStats {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub last_status: Option<u16>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_response_at: Option<DateTime<Utc>>,
}

/// 响应体
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// 成功响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
    pub duration: Duration,
}

/// HTTP sink
///
/// 负责 URL 解析、认证头、请求体压缩、带上限的流式响应读取、
/// 状态码重试分类以及批量请求的自适应尺寸
pub struct HttpSink {
    config: HttpTransportConfig,
    endpoint: Endpoint,
    method: reqwest::Method,
    client: reqwest::Client,
    auth_provider: Option<AuthProviderFn>,
    stats: Mutex<EndpointStats>,
    adaptive: Mutex<AdaptiveBatch>,
}

impl HttpSink {
    /// 创建 sink（auth_type 为 custom 时必须使用 [`HttpSink::with_provider`]）
    pub fn new(config: HttpTransportConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// 创建带自定义认证提供方的 sink
    pub fn with_provider(
        config: HttpTransportConfig,
        provider: AuthProviderFn,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(provider))
    }

    fn build(
        config: HttpTransportConfig,
        auth_provider: Option<AuthProviderFn>,
    ) -> Result<Self, ConfigError> {
        garde::Validate::validate(&config)?;

        match config.auth_type.as_str() {
            "basic" => {
                if config.username.is_none() || config.password.is_none() {
                    return Err(ConfigError::Inconsistent(
                        "basic auth requires both username and password".to_string(),
                    ));
                }
            }
            "bearer" => {
                if config.token.is_none() {
                    return Err(ConfigError::MissingOption("token"));
                }
            }
            "custom" => {
                if auth_provider.is_none() {
                    return Err(ConfigError::Inconsistent(
                        "custom auth requires an auth provider".to_string(),
                    ));
                }
            }
            _ => {}
        }

        let endpoint = resolve_endpoint(&config)?;
        let method = parse_method(&config.method)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let adaptive = AdaptiveBatch::new(config.adaptive.clone());

        Ok(Self {
            config,
            endpoint,
            method,
            client,
            auth_provider,
            stats: Mutex::new(EndpointStats::default()),
            adaptive: Mutex::new(adaptive),
        })
    }

    /// 解析后的端点信息
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 计数器快照
    pub async fn stats(&self) -> EndpointStats {
        self.stats.lock().await.clone()
    }

    /// 当前自适应批量大小
    pub async fn batch_size(&self) -> usize {
        self.adaptive.lock().await.current()
    }

    /// 组装认证头
    async fn auth_headers(&self) -> Result<Vec<(String, String)>, TransportError> {
        match self.config.auth_type.as_str() {
            "basic" => {
                let user = self.config.username.as_deref().unwrap_or_default();
                let pass = self.config.password.as_deref().unwrap_or_default();
                let encoded = BASE64.encode(format!("{}:{}", user, pass));
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Basic {}", encoded),
                )])
            }
            "bearer" => {
                let token = self.config.token.as_deref().unwrap_or_default();
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Bearer {}", token),
                )])
            }
            "custom" => {
                let provider = self.auth_provider.as_ref().ok_or_else(|| {
                    TransportError::AuthProvider {
                        message: "auth provider missing".to_string(),
                    }
                })?;
                let headers = provider().await.map_err(|e| TransportError::AuthProvider {
                    message: e.to_string(),
                })?;
                Ok(headers.into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// 请求体预处理：大小校验、可选压缩
    fn prepare_body(&self, body: Vec<u8>) -> Result<(Vec<u8>, Option<&'static str>), TransportError> {
        let size = body.len() as u64;
        if size > self.config.max_payload_size {
            return Err(TransportError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_size,
            });
        }
        compress_payload(&body, &self.config.compression)
    }

    /// 错误是否值得重试：无状态的网络错误、5xx 以及配置的补充状态码
    fn should_retry(&self, error: &TransportError) -> bool {
        match error {
            TransportError::Network { .. } => true,
            TransportError::HttpStatus { status, .. } => {
                *status >= 500 || self.config.retry_statuses.contains(status)
            }
            TransportError::ResponseTooLarge { status, .. } => {
                *status >= 500 || self.config.retry_statuses.contains(status)
            }
            _ => false,
        }
    }

    /// 单次请求：发送并流式读取有上限的响应
    async fn send_raw(
        &self,
        body: Vec<u8>,
        encoding: Option<&'static str>,
    ) -> Result<HttpResponse, TransportError> {
        {
            let mut stats = self.stats.lock().await;
            stats.requests_total += 1;
            stats.last_request_at = Some(Utc::now());
        }

        let started = Instant::now();
        let mut request = self
            .client
            .request(self.method.clone(), self.endpoint.url.as_str())
            .header("content-type", &self.config.content_type);

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if let Some(encoding) = encoding {
            request = request.header("content-encoding", encoding);
        }
        for (key, value) in self.auth_headers().await? {
            request = request.header(key, value);
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                self.note_failed(None).await;
                return Err(TransportError::from_request(e));
            }
        };

        let status = response.status().as_u16();
        {
            let mut stats = self.stats.lock().await;
            stats.last_status = Some(status);
            stats.last_response_at = Some(Utc::now());
        }

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        // 流式累积，超过上限立即中止
        let mut response = response;
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    self.note_failed(Some(status)).await;
                    return Err(TransportError::from_request(e));
                }
            };
            if (buf.len() + chunk.len()) as u64 > self.config.max_response_size {
                self.note_failed(Some(status)).await;
                return Err(TransportError::ResponseTooLarge {
                    size: (buf.len() + chunk.len()) as u64,
                    limit: self.config.max_response_size,
                    status,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        if !(200..300).contains(&status) {
            self.note_failed(Some(status)).await;
            return Err(TransportError::HttpStatus {
                status,
                message: String::from_utf8_lossy(&buf).chars().take(256).collect(),
            });
        }

        let is_json = headers
            .get("content-type")
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        let body = if is_json {
            match serde_json::from_slice(&buf) {
                Ok(value) => ResponseBody::Json(value),
                Err(_) => ResponseBody::Text(String::from_utf8_lossy(&buf).into_owned()),
            }
        } else {
            ResponseBody::Text(String::from_utf8_lossy(&buf).into_owned())
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
            duration: started.elapsed(),
        })
    }

    async fn note_failed(&self, status: Option<u16>) {
        let mut stats = self.stats.lock().await;
        stats.requests_failed += 1;
        if let Some(status) = status {
            stats.last_status = Some(status);
        }
    }

    /// 发送并按分类重试
    async fn send_with_retry(
        &self,
        body: Vec<u8>,
        encoding: Option<&'static str>,
    ) -> Result<HttpResponse, TransportError> {
        let backoff = Backoff::new(
            Duration::from_millis(self.config.retry_delay_ms),
            2.0,
            HTTP_RETRY_CAP,
        );

        let mut attempt: u32 = 0;
        loop {
            match self.send_raw(body.clone(), encoding).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.config.max_retries || !self.should_retry(&e) {
                        return Err(e);
                    }
                    let delay = if self.config.exponential_backoff {
                        jitter_upward(backoff.delay(attempt), HTTP_RETRY_JITTER)
                    } else {
                        Duration::from_millis(self.config.retry_delay_ms)
                    };
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 序列化、预处理并发送一个 JSON 负载
    async fn dispatch(&self, payload: &Value) -> Result<HttpResponse, TransportError> {
        let body = serde_json::to_vec(payload)?;
        let (body, encoding) = self.prepare_body(body)?;
        self.send_with_retry(body, encoding).await
    }
}

#[async_trait::async_trait]
impl TransportSink for HttpSink {
    fn kind(&self) -> &'static str {
        "http"
    }

    /// 一次性 init 探测
    async fn open(&self) -> Result<(), TransportError> {
        let probe = json!({
            "type": "init",
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.dispatch(&probe).await.map(|_| ())
    }

    /// 尽力而为的 shutdown 通知，失败被忽略
    async fn close(&self) -> Result<(), TransportError> {
        let notice = json!({
            "type": "shutdown",
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.dispatch(&notice).await {
            log::debug!("shutdown notice to {} failed: {}", self.endpoint.url, e);
        }
        Ok(())
    }

    async fn write(&self, entry: &FormattedEntry) -> Result<(), TransportError> {
        let body = match entry {
            // 字符串负载原样透传
            FormattedEntry::Text(s) => s.clone().into_bytes(),
            FormattedEntry::Json(v) => serde_json::to_vec(v)?,
        };
        let (body, encoding) = self.prepare_body(body)?;
        self.send_with_retry(body, encoding).await.map(|_| ())
    }

    /// 批量写：按自适应尺寸分片，每片一个 `{logs: [...]}` 请求，
    /// 片失败回落为逐条发送
    async fn write_batch(&self, entries: &[FormattedEntry]) -> Result<(), TransportError> {
        let chunk_size = self.adaptive.lock().await.current().max(1);

        for chunk in entries.chunks(chunk_size) {
            let payload = json!({
                "logs": chunk.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
            });
            let started = Instant::now();
            match self.dispatch(&payload).await {
                Ok(_) => {
                    self.adaptive.lock().await.on_success(started.elapsed());
                }
                Err(e) => {
                    self.adaptive.lock().await.on_failure();
                    log::warn!("batch request failed, falling back per record: {}", e);
                    for entry in chunk {
                        self.write(entry).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 创建 HTTP 传输器
pub fn http_transport(config: HttpTransportConfig) -> Result<Transport, ConfigError> {
    let sink = Arc::new(HttpSink::new(config.clone())?);
    Transport::new(config.transport, sink)
}

/// 从配置解析端点；url 优先并可内嵌协议与端口
fn resolve_endpoint(config: &HttpTransportConfig) -> Result<Endpoint, ConfigError> {
    if let Some(url) = &config.url {
        let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidOption {
            option: "url",
            message: e.to_string(),
        })?;

        let ssl = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ConfigError::InvalidOption {
                    option: "url",
                    message: format!("unsupported scheme: {}", other),
                })
            }
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidOption {
                option: "url",
                message: "missing host".to_string(),
            })?
            .to_string();
        let port = parsed.port().unwrap_or(if ssl { 443 } else { 80 });

        return Ok(Endpoint {
            protocol: parsed.scheme().to_string(),
            host,
            port,
            path: parsed.path().to_string(),
            ssl,
            url: parsed.to_string(),
        });
    }

    let ssl = config.ssl;
    let protocol = if ssl { "https" } else { "http" }.to_string();
    let port = config.port.unwrap_or(if ssl { 443 } else { 80 });
    let path = if config.path.starts_with('/') {
        config.path.clone()
    } else {
        format!("/{}", config.path)
    };
    let url = format!("{}://{}:{}{}", protocol, config.host, port, path);

    Ok(Endpoint {
        protocol,
        host: config.host.clone(),
        port,
        path,
        ssl,
        url,
    })
}

fn parse_method(method: &str) -> Result<reqwest::Method, ConfigError> {
    match method.to_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "POST" => Ok(reqwest::Method::POST),
        "PUT" => Ok(reqwest::Method::PUT),
        "PATCH" => Ok(reqwest::Method::PATCH),
        "DELETE" => Ok(reqwest::Method::DELETE),
        other => Err(ConfigError::InvalidOption {
            option: "method",
            message: format!("unsupported method: {}", other),
        }),
    }
}

/// 压缩请求体，返回压缩后的字节和 Content-Encoding 值
fn compress_payload(
    body: &[u8],
    compression: &str,
) -> Result<(Vec<u8>, Option<&'static str>), TransportError> {
    use std::io::Write;

    match compression {
        "gzip" => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(body)?;
            Ok((encoder.finish()?, Some("gzip")))
        }
        "deflate" => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(body)?;
            Ok((encoder.finish()?, Some("deflate")))
        }
        _ => Ok((body.to_vec(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_config(url: &str) -> HttpTransportConfig {
        HttpTransportConfig {
            url: Some(url.to_string()),
            transport: TransportConfig {
                retry_delay_ms: 1,
                ..Default::default()
            },
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_from_url_with_defaults() {
        let sink = HttpSink::new(url_config("https://logs.example.com/ingest")).unwrap();
        let endpoint = sink.endpoint();
        assert_eq!(endpoint.protocol, "https");
        assert_eq!(endpoint.host, "logs.example.com");
        assert_eq!(endpoint.port, 443);
        assert_eq!(endpoint.path, "/ingest");
        assert!(endpoint.ssl);
    }

    #[test]
    fn test_endpoint_from_url_with_explicit_port() {
        let sink = HttpSink::new(url_config("http://127.0.0.1:8080/v1/logs")).unwrap();
        let endpoint = sink.endpoint();
        assert_eq!(endpoint.port, 8080);
        assert!(!endpoint.ssl);
    }

    #[test]
    fn test_endpoint_from_parts() {
        let config = HttpTransportConfig {
            host: "collector".to_string(),
            path: "ingest".to_string(),
            ssl: true,
            ..Default::default()
        };
        let sink = HttpSink::new(config).unwrap();
        assert_eq!(sink.endpoint().url, "https://collector:443/ingest");
    }

    #[test]
    fn test_endpoint_rejects_bad_scheme() {
        assert!(HttpSink::new(url_config("ftp://example.com/logs")).is_err());
    }

    #[test]
    fn test_basic_auth_requires_credentials() {
        let config = HttpTransportConfig {
            auth_type: "basic".to_string(),
            username: Some("a".to_string()),
            ..url_config("http://example.com/")
        };
        assert!(HttpSink::new(config).is_err());
    }

    #[test]
    fn test_custom_auth_requires_provider() {
        let config = HttpTransportConfig {
            auth_type: "custom".to_string(),
            ..url_config("http://example.com/")
        };
        assert!(HttpSink::new(config).is_err());
    }

    #[tokio::test]
    async fn test_basic_auth_header_encoding() {
        let config = HttpTransportConfig {
            auth_type: "basic".to_string(),
            username: Some("a".to_string()),
            password: Some("b".to_string()),
            ..url_config("https://x/y")
        };
        let sink = HttpSink::new(config).unwrap();
        let headers = sink.auth_headers().await.unwrap();
        assert_eq!(
            headers,
            vec![("authorization".to_string(), "Basic YTpi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_bearer_auth_header() {
        let config = HttpTransportConfig {
            auth_type: "bearer".to_string(),
            token: Some("secret-token".to_string()),
            ..url_config("https://x/y")
        };
        let sink = HttpSink::new(config).unwrap();
        let headers = sink.auth_headers().await.unwrap();
        assert_eq!(headers[0].1, "Bearer secret-token");
    }

    #[tokio::test]
    async fn test_custom_auth_provider_headers_merged() {
        let provider: AuthProviderFn = Arc::new(|| {
            Box::pin(async {
                let mut headers = HashMap::new();
                headers.insert("x-api-key".to_string(), "k-123".to_string());
                Ok(headers)
            })
        });
        let config = HttpTransportConfig {
            auth_type: "custom".to_string(),
            ..url_config("https://x/y")
        };
        let sink = HttpSink::with_provider(config, provider).unwrap();
        let headers = sink.auth_headers().await.unwrap();
        assert_eq!(headers, vec![("x-api-key".to_string(), "k-123".to_string())]);
    }

    #[test]
    fn test_compress_payload_gzip_magic() {
        let (bytes, encoding) = compress_payload(b"hello logs", "gzip").unwrap();
        assert_eq!(encoding, Some("gzip"));
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_compress_payload_deflate() {
        let (bytes, encoding) = compress_payload(b"hello logs", "deflate").unwrap();
        assert_eq!(encoding, Some("deflate"));
        // zlib 头
        assert_eq!(bytes[0], 0x78);
    }

    #[test]
    fn test_compress_payload_none_passthrough() {
        let (bytes, encoding) = compress_payload(b"raw", "none").unwrap();
        assert_eq!(encoding, None);
        assert_eq!(bytes, b"raw");
    }

    #[test]
    fn test_payload_size_boundary() {
        let config = HttpTransportConfig {
            max_payload_size: 8,
            ..url_config("http://example.com/")
        };
        let sink = HttpSink::new(config).unwrap();

        // 恰好等于上限：接受
        assert!(sink.prepare_body(vec![0u8; 8]).is_ok());
        // 超出一个字节：拒绝
        match sink.prepare_body(vec![0u8; 9]) {
            Err(TransportError::PayloadTooLarge { size, limit }) => {
                assert_eq!(size, 9);
                assert_eq!(limit, 8);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_retry_classifier() {
        let sink = HttpSink::new(url_config("http://example.com/")).unwrap();

        let retryable = |status: u16| {
            sink.should_retry(&TransportError::HttpStatus {
                status,
                message: String::new(),
            })
        };
        assert!(retryable(503));
        assert!(retryable(500));
        assert!(retryable(429));
        assert!(retryable(408));
        assert!(!retryable(400));
        assert!(!retryable(404));

        // 无状态的网络错误总是重试
        assert!(sink.should_retry(&TransportError::Network {
            message: "refused".to_string(),
            source: None,
        }));
        // 确定性错误不重试
        assert!(!sink.should_retry(&TransportError::PayloadTooLarge { size: 2, limit: 1 }));
    }

    #[test]
    fn test_retry_statuses_configurable() {
        let config = HttpTransportConfig {
            retry_statuses: vec![418],
            ..url_config("http://example.com/")
        };
        let sink = HttpSink::new(config).unwrap();
        assert!(sink.should_retry(&TransportError::HttpStatus {
            status: 418,
            message: String::new(),
        }));
        assert!(!sink.should_retry(&TransportError::HttpStatus {
            status: 429,
            message: String::new(),
        }));
    }

    #[test]
    fn test_adaptive_batch_grows_on_fast_requests() {
        let mut batch = AdaptiveBatch::new(AdaptiveBatchConfig::default());
        assert_eq!(batch.current(), 1000);

        batch.on_success(Duration::from_millis(50));
        assert_eq!(batch.current(), 1200);
        batch.on_success(Duration::from_millis(100));
        assert_eq!(batch.current(), 1440);
    }

    #[test]
    fn test_adaptive_batch_grow_is_capped() {
        let mut batch = AdaptiveBatch::new(AdaptiveBatchConfig::default());
        for _ in 0..100 {
            batch.on_success(Duration::from_millis(10));
        }
        assert_eq!(batch.current(), 10_000);
    }

    #[test]
    fn test_adaptive_batch_shrinks_on_slow_requests() {
        let mut batch = AdaptiveBatch::new(AdaptiveBatchConfig {
            initial_size: 5000,
            ..Default::default()
        });
        batch.on_success(Duration::from_millis(2500));
        assert_eq!(batch.current(), 4000);
        // 阈值之间不变
        batch.on_success(Duration::from_millis(1000));
        assert_eq!(batch.current(), 4000);
    }

    #[test]
    fn test_adaptive_batch_failure_halves_with_floor() {
        let mut batch = AdaptiveBatch::new(AdaptiveBatchConfig {
            initial_size: 3000,
            ..Default::default()
        });
        batch.on_failure();
        assert_eq!(batch.current(), 1500);
        batch.on_failure();
        // 腰斩到 750，但下限 1000 兜底
        assert_eq!(batch.current(), 1000);
        batch.on_failure();
        assert_eq!(batch.current(), 1000);
    }

    #[test]
    fn test_adaptive_batch_duration_sequence() {
        // 快、快、慢、失败 的序列
        let mut batch = AdaptiveBatch::new(AdaptiveBatchConfig {
            initial_size: 2000,
            ..Default::default()
        });
        batch.on_success(Duration::from_millis(100)); // 2400
        batch.on_success(Duration::from_millis(150)); // 2880
        batch.on_success(Duration::from_millis(3000)); // 2304
        batch.on_failure(); // 1152
        assert_eq!(batch.current(), 1152);
    }

    #[tokio::test]
    async fn test_write_success_against_mock() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-type", "application/json")
            .with_status(200)
            .create_async()
            .await;

        let sink = HttpSink::new(url_config(&format!("{}/logs", server.url()))).unwrap();
        sink.write(&FormattedEntry::Json(json!({"message": "hi"})))
            .await
            .unwrap();

        mock.assert_async().await;
        let stats = sink.stats().await;
        assert_eq!(stats.requests_total, 1);
        assert_eq!(stats.requests_failed, 0);
        assert_eq!(stats.last_status, Some(200));
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let sink = HttpSink::new(url_config(&format!("{}/logs", server.url()))).unwrap();
        let result = sink
            .write(&FormattedEntry::Json(json!({"message": "bad"})))
            .await;

        assert!(matches!(
            result,
            Err(TransportError::HttpStatus { status: 400, .. })
        ));
        mock.assert_async().await;

        let stats = sink.stats().await;
        assert_eq!(stats.requests_total, 1);
        assert_eq!(stats.requests_failed, 1);
    }

    #[tokio::test]
    async fn test_init_probe_sent_on_open() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"type": "init"}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let sink = HttpSink::new(url_config(&format!("{}/logs", server.url()))).unwrap();
        sink.open().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_shutdown_notice_failure_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logs")
            .with_status(500)
            .create_async()
            .await;

        let config = HttpTransportConfig {
            max_retries: 0,
            ..url_config(&format!("{}/logs", server.url()))
        };
        let sink = HttpSink::new(config).unwrap();
        // shutdown 通知失败不冒泡
        sink.close().await.unwrap();
    }
}
