use crate::error::{ConfigError, TransportError};
use crate::format::{default_entry, FormattedEntry};
use crate::level::LogLevel;
use crate::record::LogRecord;
use crate::transport::retry::{jitter_symmetric, uniform_extra, Backoff};
use crate::transport::trait_::TransportSink;
use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// 过滤谓词：返回 false 的记录被丢弃
pub type FilterFn = Arc<dyn Fn(&LogRecord) -> bool + Send + Sync>;

/// 格式化钩子：把日志记录转换为 sink 可消费的条目
pub type FormatFn = Arc<dyn Fn(&LogRecord) -> Result<FormattedEntry, TransportError> + Send + Sync>;

/// 批量失败回落时最多切分的组数
const FALLBACK_MAX_GROUPS: usize = 5;

/// 回落时组间的间隔
const FALLBACK_GROUP_DELAY: Duration = Duration::from_millis(200);

/// 回落到逐条写入时的条间延迟
const FALLBACK_RECORD_DELAY: Duration = Duration::from_millis(25);

/// 批量重试的延迟上限
const BATCH_RETRY_CAP: Duration = Duration::from_secs(60);

/// 批量重试的对称抖动幅度（±50%）
const BATCH_RETRY_JITTER: f64 = 0.5;

/// 批量重试额外叠加的网络抖动上限（0-100ms）
const BATCH_NETWORK_JITTER: Duration = Duration::from_millis(100);

/// 通用传输配置
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate)]
#[serde(default)]
pub struct TransportConfig {
    /// 传输器名称
    #[default("transport".to_string())]
    #[garde(skip)]
    pub name: String,

    /// 最低日志级别，低于该级别的记录被丢弃
    #[default("debug".to_string())]
    #[garde(pattern("debug|info|warn|error|silent"))]
    pub level: String,

    /// 是否启用
    #[default(true)]
    #[garde(skip)]
    pub enabled: bool,

    // ========== 批量 ==========
    /// 批量大小，0 表示关闭批量
    #[default(0)]
    #[garde(range(max = 100_000))]
    pub batch_size: usize,

    /// 批量超时（毫秒），队列非空且未满时定时器到期强制刷出
    #[default(5000)]
    #[garde(range(min = 1))]
    pub batch_timeout_ms: u64,

    // ========== 重试 ==========
    /// 单条写入的最大重试次数
    #[default(3)]
    #[garde(range(max = 100))]
    pub max_retries: u32,

    /// 重试延迟（毫秒）
    #[default(1000)]
    #[garde(skip)]
    pub retry_delay_ms: u64,

    /// 批量写入的最大重试次数
    #[default(3)]
    #[garde(range(max = 100))]
    pub batch_retries: u32,

    // ========== 错误策略 ==========
    /// 静默模式：错误降级为诊断日志而不向调用方抛出
    #[default(false)]
    #[garde(skip)]
    pub silent: bool,
}

/// 传输器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct TransportStatus {
    pub id: String,
    pub name: String,
    pub kind: &'static str,
    pub enabled: bool,
    pub ready: bool,
    pub destroyed: bool,
    pub min_level: LogLevel,
    pub queue_size: usize,
    pub error_count: u64,
    pub last_error: Option<String>,
}

struct TransportState {
    min_level: LogLevel,
    enabled: bool,
    ready: bool,
    destroyed: bool,
    queue: Vec<LogRecord>,
    timer: Option<JoinHandle<()>>,
    error_count: u64,
    last_error: Option<String>,
}

struct TransportInner {
    id: String,
    config: TransportConfig,
    sink: Arc<dyn TransportSink>,
    formatter: RwLock<Option<FormatFn>>,
    filter: RwLock<Option<FilterFn>>,
    state: Mutex<TransportState>,
}

/// 进程内传输器 id 计数
static TRANSPORT_SEQ: AtomicU64 = AtomicU64::new(0);

/// 传输器引擎
///
/// 包装一个 [`TransportSink`]，统一提供生命周期、级别与谓词过滤、
/// 格式化钩子、批量队列和重试退避。克隆是浅拷贝，指向同一个实例。
///
/// 状态机：`constructed → init() → ready → destroy() → destroyed`。
/// `disable()` 与状态机正交且可逆，`destroy()` 是终态。
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}

impl Transport {
    /// 创建传输器
    ///
    /// 配置错误在这里同步抛出，出错的传输器不会产生任何副作用
    pub fn new(config: TransportConfig, sink: Arc<dyn TransportSink>) -> Result<Self, ConfigError> {
        garde::Validate::validate(&config)?;

        let min_level = LogLevel::from_str(&config.level).map_err(|e| {
            ConfigError::InvalidOption {
                option: "level",
                message: e,
            }
        })?;

        let seq = TRANSPORT_SEQ.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", config.name, seq);

        Ok(Self {
            inner: Arc::new(TransportInner {
                id,
                config,
                sink,
                formatter: RwLock::new(None),
                filter: RwLock::new(None),
                state: Mutex::new(TransportState {
                    min_level,
                    enabled: true,
                    ready: false,
                    destroyed: false,
                    queue: Vec::new(),
                    timer: None,
                    error_count: 0,
                    last_error: None,
                }),
            }),
        })
    }

    /// 进程内唯一的传输器标识
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// 配置的名称
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// 设置格式化钩子（None 恢复默认格式）
    pub async fn set_formatter(&self, formatter: Option<FormatFn>) {
        *self.inner.formatter.write().await = formatter;
    }

    /// 设置过滤谓词（None 表示不过滤）
    pub async fn set_filter(&self, filter: Option<FilterFn>) {
        *self.inner.filter.write().await = filter;
    }

    /// 准备底层 sink，幂等
    pub async fn init(&self) -> Result<(), TransportError> {
        {
            let state = self.inner.state.lock().await;
            if state.destroyed {
                return Err(TransportError::Destroyed);
            }
            if state.ready {
                return Ok(());
            }
        }
        self.inner.sink.open().await?;
        self.inner.state.lock().await.ready = true;
        Ok(())
    }

    /// 销毁传输器：刷出在途批量、取消定时器、释放 sink 资源
    ///
    /// 幂等；销毁后的 log 调用被静默丢弃
    pub async fn destroy(&self) -> Result<(), TransportError> {
        let pending = {
            let mut state = self.inner.state.lock().await;
            if state.destroyed {
                return Ok(());
            }
            state.destroyed = true;
            state.ready = false;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.queue)
        };

        if !pending.is_empty() {
            if let Err(e) = self.inner.deliver_batch(pending).await {
                log::warn!("transport {} failed to flush on destroy: {}", self.id(), e);
            }
        }

        self.inner.sink.close().await
    }

    /// 启用传输器
    pub async fn enable(&self) {
        self.inner.state.lock().await.enabled = true;
    }

    /// 停用传输器（可逆）
    pub async fn disable(&self) {
        self.inner.state.lock().await.enabled = false;
    }

    /// 更新最低日志级别
    pub async fn set_level(&self, level: LogLevel) {
        self.inner.state.lock().await.min_level = level;
    }

    /// 解析并更新最低日志级别，非法的级别名被拒绝
    pub async fn set_level_str(&self, level: &str) -> Result<(), ConfigError> {
        let level = LogLevel::from_str(level).map_err(|e| ConfigError::InvalidOption {
            option: "level",
            message: e,
        })?;
        self.set_level(level).await;
        Ok(())
    }

    /// 遥测与生命周期快照
    pub async fn get_status(&self) -> TransportStatus {
        let state = self.inner.state.lock().await;
        TransportStatus {
            id: self.inner.id.clone(),
            name: self.inner.config.name.clone(),
            kind: self.inner.sink.kind(),
            enabled: state.enabled,
            ready: state.ready,
            destroyed: state.destroyed,
            min_level: state.min_level,
            queue_size: state.queue.len(),
            error_count: state.error_count,
            last_error: state.last_error.clone(),
        }
    }

    /// 当前批量队列长度
    pub async fn queue_size(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// 消费一条日志记录
    ///
    /// 返回 Ok(true) 表示记录被写入或入队；Ok(false) 表示被过滤、
    /// 被丢弃或在 silent 模式下写入失败。非 silent 模式的最终失败
    /// 会抛给调用方。
    pub async fn log(&self, record: &LogRecord) -> Result<bool, TransportError> {
        if !self.inner.admit(record).await {
            return Ok(false);
        }

        if self.inner.config.batch_size > 0 {
            return self.enqueue(record.clone()).await;
        }

        let entry = match self.inner.format(record).await {
            Ok(entry) => entry,
            Err(e) => return self.inner.fail(e).await.map(|_| false),
        };

        match self.inner.write_with_retry(&entry).await {
            Ok(()) => Ok(true),
            Err(e) => self.inner.fail(e).await.map(|_| false),
        }
    }

    /// 消费一批日志记录
    ///
    /// 过滤逐条进行，通过过滤的记录作为一个批量交给 sink
    pub async fn bulk_log(&self, records: &[LogRecord]) -> Result<bool, TransportError> {
        let mut admitted = Vec::with_capacity(records.len());
        for record in records {
            if self.inner.admit(record).await {
                admitted.push(record.clone());
            }
        }
        if admitted.is_empty() {
            return Ok(false);
        }

        match self.inner.deliver_batch(admitted).await {
            Ok(()) => Ok(true),
            Err(e) => self.inner.fail(e).await.map(|_| false),
        }
    }

    /// 立即刷出批量队列并取消定时器
    pub async fn flush(&self) -> Result<(), TransportError> {
        let pending = {
            let mut state = self.inner.state.lock().await;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.queue)
        };

        if pending.is_empty() {
            return Ok(());
        }
        match self.inner.deliver_batch(pending).await {
            Ok(()) => Ok(()),
            Err(e) => self.inner.fail(e).await,
        }
    }

    async fn enqueue(&self, record: LogRecord) -> Result<bool, TransportError> {
        let to_flush = {
            let mut state = self.inner.state.lock().await;
            state.queue.push(record);

            if state.queue.len() >= self.inner.config.batch_size {
                // 满批立即刷出，撤掉定时器
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                Some(std::mem::take(&mut state.queue))
            } else {
                if state.timer.is_none() {
                    let inner = Arc::clone(&self.inner);
                    let timeout = Duration::from_millis(self.inner.config.batch_timeout_ms);
                    state.timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        inner.timer_fire().await;
                    }));
                }
                None
            }
        };

        match to_flush {
            None => Ok(true),
            Some(batch) => match self.inner.deliver_batch(batch).await {
                Ok(()) => Ok(true),
                Err(e) => self.inner.fail(e).await.map(|_| false),
            },
        }
    }
}

impl TransportInner {
    /// 准入判定: enabled ∧ ¬destroyed ∧ level ≥ min_level ∧ 谓词通过
    async fn admit(&self, record: &LogRecord) -> bool {
        {
            let state = self.state.lock().await;
            if !state.enabled
                || state.destroyed
                || !record.level.is_emittable()
                || record.level < state.min_level
            {
                return false;
            }
        }

        match self.filter.read().await.as_ref() {
            Some(filter) => filter(record),
            None => true,
        }
    }

    async fn format(&self, record: &LogRecord) -> Result<FormattedEntry, TransportError> {
        match self.formatter.read().await.as_ref() {
            Some(formatter) => formatter(record),
            None => Ok(default_entry(record)),
        }
    }

    /// 单条写入，失败时以固定间隔重试
    async fn write_with_retry(&self, entry: &FormattedEntry) -> Result<(), TransportError> {
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt: u32 = 0;
        loop {
            match self.sink.write(entry).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 批量投递：指数退避重试，耗尽后进入分组回落
    async fn deliver_batch(&self, records: Vec<LogRecord>) -> Result<(), TransportError> {
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            match self.format(record).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // 格式化失败是确定性错误，丢弃该条并记录
                    self.note_failure(&e).await;
                    log::warn!("transport {} dropped unformattable record: {}", self.id, e);
                }
            }
        }
        if entries.is_empty() {
            return Ok(());
        }

        let backoff = Backoff::new(
            Duration::from_millis(self.config.retry_delay_ms),
            2.0,
            BATCH_RETRY_CAP,
        );

        let mut attempt: u32 = 0;
        loop {
            match self.sink.write_batch(&entries).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.config.batch_retries {
                        self.note_failure(&e).await;
                        break;
                    }
                    let delay = jitter_symmetric(backoff.delay(attempt), BATCH_RETRY_JITTER)
                        + uniform_extra(BATCH_NETWORK_JITTER);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.fallback_batch(&entries).await
    }

    /// 批量最终失败后的回落：至多切成五组，组失败再逐条
    async fn fallback_batch(&self, entries: &[FormattedEntry]) -> Result<(), TransportError> {
        let group_size = entries.len().div_ceil(FALLBACK_MAX_GROUPS).max(1);
        let mut dropped: usize = 0;

        for (i, group) in entries.chunks(group_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(FALLBACK_GROUP_DELAY).await;
            }
            if self.sink.write_batch(group).await.is_ok() {
                continue;
            }

            for entry in group {
                tokio::time::sleep(FALLBACK_RECORD_DELAY).await;
                if let Err(e) = self.sink.write(entry).await {
                    dropped += 1;
                    self.note_failure(&e).await;
                    log::warn!("transport {} dropped record after fallback: {}", self.id, e);
                }
            }
        }

        if dropped > 0 {
            Err(TransportError::Network {
                message: format!("{} record(s) dropped after batch fallback", dropped),
                source: None,
            })
        } else {
            Ok(())
        }
    }

    /// 定时器到期：无条件刷出队列
    async fn timer_fire(self: Arc<Self>) {
        let pending = {
            let mut state = self.state.lock().await;
            state.timer = None;
            std::mem::take(&mut state.queue)
        };

        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.deliver_batch(pending).await {
            log::warn!("transport {} batch flush failed: {}", self.id, e);
        }
    }

    /// 更新遥测
    async fn note_failure(&self, error: &TransportError) {
        let mut state = self.state.lock().await;
        state.error_count += 1;
        state.last_error = Some(error.to_string());
    }

    /// 错误出口：遥测总是更新；silent 模式降级为诊断日志
    async fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.note_failure(&error).await;
        if self.config.silent {
            log::warn!("transport {} error (silent): {}", self.id, error);
            Ok(())
        } else {
            Err(error)
        }
    }
}
