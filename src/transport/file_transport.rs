use crate::error::{ConfigError, TransportError};
use crate::format::FormattedEntry;
use crate::human::HumanSize;
use crate::lock::{self, with_lockfile, LockfileConfig};
use crate::transport::base::{Transport, TransportConfig};
use crate::transport::retry::Backoff;
use crate::transport::trait_::TransportSink;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;
use smart_default::SmartDefault;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// 写入失败的重试退避：200ms 起步，因子 1.5，上限 3s
const WRITE_BACKOFF: Backoff = Backoff::new(Duration::from_millis(200), 1.5, Duration::from_secs(3));

/// JSON 替换钩子
///
/// 对序列化出的每个对象键值调用；返回 None 时该键被移除
pub type JsonReplacerFn = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// FileTransport 配置
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct FileTransportConfig {
    /// 通用传输配置
    pub transport: TransportConfig,

    // ========== 路径 ==========
    /// 日志文件名（必填）
    #[default("".to_string())]
    pub filename: String,

    /// 输出目录
    #[default(".".to_string())]
    pub dirname: String,

    /// 扩展名（可带或不带前导点）
    #[default("".to_string())]
    pub extension: String,

    /// init 时创建缺失的父目录
    #[default(true)]
    pub create_directory: bool,

    // ========== 轮转 ==========
    /// 大小阈值，支持 "100b"/"10m"/"1g" 或字节数
    #[serde_as(as = "Option<HumanSize>")]
    #[default(None)]
    pub max_size: Option<u64>,

    /// 保留文件总数（含当前文件），最旧的先删
    #[default(None)]
    pub max_files: Option<usize>,

    /// 按大小轮转
    #[default(true)]
    pub rotate_by_size: bool,

    /// 按日历段轮转
    #[default(false)]
    pub rotate_by_date: bool,

    /// 日历段格式（chrono 格式串）
    #[default("%Y-%m-%d".to_string())]
    pub date_pattern: String,

    // ========== 压缩 ==========
    /// gzip 压缩轮转出的文件
    #[serde(alias = "zipped_archive")]
    #[default(false)]
    pub compress: bool,

    // ========== 序列化 ==========
    /// 单行 JSON 输出
    #[default(false)]
    pub json: bool,

    /// JSON 缩进空格数，0 为单行
    #[default(0)]
    pub json_space: usize,

    /// 行尾序列
    #[default("\n".to_string())]
    pub eol: String,

    /// 缺少行尾时自动补齐
    #[default(true)]
    pub append_newline: bool,

    // ========== 写入 ==========
    /// 每次追加都走磁盘锁文件协议（跨进程写入者）
    #[default(false)]
    pub use_locking: bool,

    /// 单次写入的重试次数（与引擎层的重试相互独立）
    #[default(3)]
    pub max_retries: u32,

    /// 磁盘锁文件配置
    pub lockfile: LockfileConfig,
}

struct FileState {
    file: Option<tokio::fs::File>,
    path: PathBuf,
    size: u64,
    period: String,
}

/// 文件 sink
///
/// 负责路径解析、大小与日历段轮转、保留清理、gzip 归档以及
/// 可选的跨进程锁文件写入协议
pub struct FileSink {
    config: FileTransportConfig,
    dir: PathBuf,
    replacer: Option<JsonReplacerFn>,
    state: Mutex<FileState>,
}

impl FileSink {
    pub fn new(config: FileTransportConfig) -> Result<Self, ConfigError> {
        if config.filename.is_empty() {
            return Err(ConfigError::MissingOption("filename"));
        }
        if config.rotate_by_date && config.date_pattern.is_empty() {
            return Err(ConfigError::Inconsistent(
                "rotate_by_date requires a non-empty date_pattern".to_string(),
            ));
        }
        if config.rotate_by_size && config.max_size == Some(0) {
            return Err(ConfigError::OutOfRange {
                option: "max_size",
                message: "must be at least 1 byte".to_string(),
            });
        }

        let dir = PathBuf::from(&config.dirname);
        Ok(Self {
            config,
            dir,
            replacer: None,
            state: Mutex::new(FileState {
                file: None,
                path: PathBuf::new(),
                size: 0,
                period: String::new(),
            }),
        })
    }

    /// 设置 JSON 替换钩子
    pub fn with_json_replacer(mut self, replacer: JsonReplacerFn) -> Self {
        self.replacer = Some(replacer);
        self
    }

    /// 当前活跃的日历段（未启用日期轮转时为空串）
    fn current_segment(&self) -> String {
        if self.config.rotate_by_date {
            Local::now().format(&self.config.date_pattern).to_string()
        } else {
            String::new()
        }
    }

    /// 归一化扩展名: "log" / ".log" -> ".log"，空串保持为空
    fn normalized_extension(&self) -> String {
        let ext = &self.config.extension;
        if ext.is_empty() || ext.starts_with('.') {
            ext.clone()
        } else {
            format!(".{}", ext)
        }
    }

    /// 解析当前目标路径；启用日期轮转时文件名编码活跃日历段
    fn current_path(&self) -> PathBuf {
        let ext = self.normalized_extension();
        let name = if self.config.rotate_by_date {
            format!("{}.{}{}", self.config.filename, self.current_segment(), ext)
        } else {
            format!("{}{}", self.config.filename, ext)
        };
        self.dir.join(name)
    }

    /// 序列化单条日志为落盘字节
    fn serialize_entry(&self, entry: &FormattedEntry) -> Result<Vec<u8>, TransportError> {
        let mut line = if self.config.json {
            let mut value = entry.to_json();
            if let Some(replacer) = &self.replacer {
                value = apply_replacer(&value, replacer);
            }
            if self.config.json_space > 0 {
                to_pretty(&value, self.config.json_space)?
            } else {
                value.to_string()
            }
        } else {
            entry.render()
        };

        if self.config.append_newline && !line.ends_with(&self.config.eol) {
            line.push_str(&self.config.eol);
        }
        Ok(line.into_bytes())
    }

    /// 确保输出流已打开；按需创建父目录并同步磁盘上的现有大小
    async fn ensure_open(&self, state: &mut FileState) -> Result<(), TransportError> {
        if state.file.is_some() {
            return Ok(());
        }

        if self.config.create_directory {
            tokio::fs::create_dir_all(&self.dir).await?;
        }

        let path = self.current_path();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        state.size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        state.path = path;
        state.period = self.current_segment();
        state.file = Some(file);
        Ok(())
    }

    /// 重新打开当前目标路径（轮转后或跨进程同步）
    async fn reopen(&self, state: &mut FileState) -> Result<(), TransportError> {
        state.file = None;
        self.ensure_open(state).await
    }

    fn should_rotate(&self, state: &FileState) -> bool {
        let size_due = self.config.rotate_by_size
            && self
                .config
                .max_size
                .map_or(false, |max| state.size >= max);
        let date_due = self.config.rotate_by_date && self.current_segment() != state.period;
        size_due || date_due
    }

    /// 轮转锁保护下的完整轮转流程
    async fn rotate(&self, state: &mut FileState) -> Result<(), TransportError> {
        let path = state.path.clone();
        let owner = lock::global().acquire_rotation(&path).await?;

        let result = self.rotate_locked(state).await;
        lock::global().release_rotation(&path, Some(&owner)).await;

        if let Err(e) = &result {
            log::warn!("rotation of {} unwound: {}", path.display(), e);
        }
        result
    }

    async fn rotate_locked(&self, state: &mut FileState) -> Result<(), TransportError> {
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }

        // 跨进程检查：别的写入者可能已经完成了这次轮转
        match tokio::fs::metadata(&state.path).await {
            Ok(meta) if meta.len() < state.size => return self.reopen(state).await,
            Err(_) => return self.reopen(state).await,
            Ok(_) => {}
        }

        let date_due = self.config.rotate_by_date && self.current_segment() != state.period;
        let old_path = state.path.clone();

        // 日历段变化时旧文件名已编码旧段名，原地归档；
        // 大小轮转则重命名为时间戳后缀
        let archived = if date_due {
            old_path.clone()
        } else {
            let target = rotated_target(&old_path);
            tokio::fs::rename(&old_path, &target).await?;
            target
        };

        if self.config.compress {
            self.compress_file(&archived).await?;
        }

        self.reopen(state).await?;
        self.prune(&state.path).await?;
        Ok(())
    }

    /// gzip 归档并删除原始文件
    async fn compress_file(&self, path: &Path) -> Result<(), TransportError> {
        use std::io::Write;

        let content = tokio::fs::read(path).await?;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;

        let gz_path = PathBuf::from(format!("{}.gz", path.display()));
        tokio::fs::write(&gz_path, compressed).await?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    /// 保留清理：按 mtime 从旧到新删除，直到轮转出的文件不超过 max_files - 1。
    /// 当前文件永远不会被删除。
    async fn prune(&self, current: &Path) -> Result<(), TransportError> {
        let max_files = match self.config.max_files {
            Some(n) => n,
            None => return Ok(()),
        };
        let keep = max_files.saturating_sub(1);

        let prefix = format!("{}.", self.config.filename);
        let current_name = current.file_name().map(|n| n.to_os_string());

        let mut rotated: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = match path.file_name() {
                Some(n) => n.to_os_string(),
                None => continue,
            };
            if Some(&name) == current_name.as_ref() {
                continue;
            }
            let name_str = name.to_string_lossy();
            // 活跃写入者的锁文件不属于轮转集合
            if !name_str.starts_with(&prefix) || name_str.ends_with(".lock") {
                continue;
            }
            let mtime = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::now());
            rotated.push((mtime, path));
        }

        rotated.sort_by_key(|(mtime, _)| *mtime);
        while rotated.len() > keep {
            let (_, oldest) = rotated.remove(0);
            if let Err(e) = tokio::fs::remove_file(&oldest).await {
                log::warn!("retention failed to remove {}: {}", oldest.display(), e);
            }
        }
        Ok(())
    }

    /// 追加字节；use_locking 时整个追加处于磁盘锁文件保护之下
    async fn append(&self, state: &mut FileState, bytes: &[u8]) -> Result<(), TransportError> {
        let path = state.path.clone();
        let file = state.file.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "log file is not open",
            ))
        })?;

        if self.config.use_locking {
            with_lockfile(&path, &self.config.lockfile, || async move {
                file.write_all(bytes).await?;
                file.flush().await?;
                Ok(())
            })
            .await
        } else {
            file.write_all(bytes).await?;
            file.flush().await?;
            Ok(())
        }
    }

    /// 单次完整写入：开流、轮转检查、追加、计数
    async fn write_once(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&mut state).await?;

        if self.should_rotate(&state) {
            self.rotate(&mut state).await?;
        }

        self.append(&mut state, bytes).await?;
        state.size += bytes.len() as u64;
        Ok(())
    }

    async fn write_bytes_with_retry(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut attempt: u32 = 0;
        loop {
            match self.write_once(bytes).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if !e.is_retryable() || attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    tokio::time::sleep(WRITE_BACKOFF.delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl TransportSink for FileSink {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn open(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        self.ensure_open(&mut state).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    async fn write(&self, entry: &FormattedEntry) -> Result<(), TransportError> {
        let bytes = self.serialize_entry(entry)?;
        self.write_bytes_with_retry(&bytes).await
    }

    /// 批量写：拼成一个连续缓冲区做一次加锁追加，
    /// 失败耗尽自身重试预算后回落为逐条写入
    async fn write_batch(&self, entries: &[FormattedEntry]) -> Result<(), TransportError> {
        let mut buf = Vec::new();
        for entry in entries {
            buf.extend(self.serialize_entry(entry)?);
        }

        match self.write_bytes_with_retry(&buf).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("combined batch write failed, falling back per entry: {}", e);
                for entry in entries {
                    self.write(entry).await?;
                }
                Ok(())
            }
        }
    }
}

/// 创建文件传输器
pub fn file_transport(config: FileTransportConfig) -> Result<Transport, ConfigError> {
    let sink = Arc::new(FileSink::new(config.clone())?);
    Transport::new(config.transport, sink)
}

/// 轮转目标路径: `<path>.<unix-millis>`，已占用时毫秒数递增
fn rotated_target(path: &Path) -> PathBuf {
    let mut ts = chrono::Utc::now().timestamp_millis();
    loop {
        let candidate = PathBuf::from(format!("{}.{}", path.display(), ts));
        let gz = PathBuf::from(format!("{}.gz", candidate.display()));
        if !candidate.exists() && !gz.exists() {
            return candidate;
        }
        ts += 1;
    }
}

/// 递归应用 JSON 替换钩子
fn apply_replacer(value: &Value, replacer: &JsonReplacerFn) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter_map(|(k, v)| {
                    replacer(k, v).map(|replaced| (k.clone(), apply_replacer(&replaced, replacer)))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| apply_replacer(v, replacer)).collect(),
        ),
        other => other.clone(),
    }
}

/// 指定缩进宽度的 JSON 序列化
fn to_pretty(value: &Value, space: usize) -> Result<String, TransportError> {
    use serde::Serialize;

    let indent = " ".repeat(space);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| TransportError::Format(e.to_string()))
}
