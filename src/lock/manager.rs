use crate::error::TransportError;
use crate::transport::retry::{jitter_symmetric, Backoff};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::Deserialize;
use smart_default::SmartDefault;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// 写锁重试退避：因子 1.5，上限 1s，抖动 ±20%
const WRITE_BACKOFF: Backoff = Backoff::new(Duration::from_millis(100), 1.5, Duration::from_secs(1));
const WRITE_JITTER: f64 = 0.2;

/// 轮转锁重试退避：因子 2，上限 2s，抖动 ±30%
const ROTATION_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(2));
const ROTATION_JITTER: f64 = 0.3;

/// LockManager 配置
#[derive(Debug, Clone, Deserialize, SmartDefault)]
#[serde(default)]
pub struct LockManagerConfig {
    /// 等待锁的总超时（毫秒），超过后进入重试阶段
    #[default(5000)]
    pub wait_timeout_ms: u64,

    /// 锁的过期时间（毫秒），持有超过该时长的锁视为废弃
    #[default(30_000)]
    pub lock_expiry_ms: u64,

    /// 等待期间的轮询间隔（毫秒）
    #[default(100)]
    pub retry_interval_ms: u64,

    /// 重试阶段的最大重试次数
    #[default(5)]
    pub max_retries: u32,
}

/// 锁记录
#[derive(Debug, Clone)]
struct LockEntry {
    owner_id: String,
    acquired_at: Instant,
}

/// 文件锁管理器
///
/// 维护按绝对路径索引的两个独立命名空间：写锁和轮转锁。
/// 同一路径在任一命名空间内同时最多存在一个持有者；
/// 过期的锁会被驱逐，不会无限阻塞后来者。
///
/// 进程内通常只使用 [`global`] 返回的单例。
pub struct LockManager {
    config: LockManagerConfig,
    write_locks: Mutex<HashMap<PathBuf, LockEntry>>,
    rotation_locks: Mutex<HashMap<PathBuf, LockEntry>>,
}

/// 生成进程内唯一的持有者标识
pub fn new_owner_id() -> String {
    format!(
        "{}-{:016x}",
        std::process::id(),
        rand::thread_rng().gen::<u64>()
    )
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            write_locks: Mutex::new(HashMap::new()),
            rotation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 获取写锁，返回持有者标识
    pub async fn acquire_write(&self, path: &Path) -> Result<String, TransportError> {
        self.acquire_in(&self.write_locks, path, WRITE_BACKOFF, WRITE_JITTER)
            .await
    }

    /// 获取轮转锁，返回持有者标识
    pub async fn acquire_rotation(&self, path: &Path) -> Result<String, TransportError> {
        self.acquire_in(&self.rotation_locks, path, ROTATION_BACKOFF, ROTATION_JITTER)
            .await
    }

    /// 释放写锁
    ///
    /// 提供 owner_id 时只有持有者本人可以释放；返回是否真正移除了锁
    pub async fn release_write(&self, path: &Path, owner_id: Option<&str>) -> bool {
        Self::release_in(&self.write_locks, path, owner_id).await
    }

    /// 释放轮转锁
    pub async fn release_rotation(&self, path: &Path, owner_id: Option<&str>) -> bool {
        Self::release_in(&self.rotation_locks, path, owner_id).await
    }

    /// 当前是否存在指定路径的写锁（含未过期判断）
    pub async fn is_write_locked(&self, path: &Path) -> bool {
        self.is_locked_in(&self.write_locks, path).await
    }

    /// 当前是否存在指定路径的轮转锁（含未过期判断）
    pub async fn is_rotation_locked(&self, path: &Path) -> bool {
        self.is_locked_in(&self.rotation_locks, path).await
    }

    /// 清空两个命名空间（进程退出前的收尾）
    pub async fn teardown(&self) {
        self.write_locks.lock().await.clear();
        self.rotation_locks.lock().await.clear();
    }

    fn expiry(&self) -> Duration {
        Duration::from_millis(self.config.lock_expiry_ms)
    }

    async fn is_locked_in(&self, locks: &Mutex<HashMap<PathBuf, LockEntry>>, path: &Path) -> bool {
        let map = locks.lock().await;
        match map.get(path) {
            Some(entry) => entry.acquired_at.elapsed() < self.expiry(),
            None => false,
        }
    }

    async fn release_in(
        locks: &Mutex<HashMap<PathBuf, LockEntry>>,
        path: &Path,
        owner_id: Option<&str>,
    ) -> bool {
        let mut map = locks.lock().await;
        match (map.get(path), owner_id) {
            (Some(entry), Some(owner)) if entry.owner_id != owner => false,
            (Some(_), _) => {
                map.remove(path);
                true
            }
            (None, _) => false,
        }
    }

    async fn acquire_in(
        &self,
        locks: &Mutex<HashMap<PathBuf, LockEntry>>,
        path: &Path,
        backoff: Backoff,
        jitter: f64,
    ) -> Result<String, TransportError> {
        let started = Instant::now();
        let wait_timeout = Duration::from_millis(self.config.wait_timeout_ms);
        let poll = Duration::from_millis(self.config.retry_interval_ms.min(100));
        let mut retry_attempt: u32 = 0;

        loop {
            {
                let mut map = locks.lock().await;
                match map.get(path) {
                    None => {
                        let owner_id = new_owner_id();
                        map.insert(
                            path.to_path_buf(),
                            LockEntry {
                                owner_id: owner_id.clone(),
                                acquired_at: Instant::now(),
                            },
                        );
                        return Ok(owner_id);
                    }
                    Some(entry) if entry.acquired_at.elapsed() >= self.expiry() => {
                        log::warn!(
                            "evicting expired lock on {} held by {}",
                            path.display(),
                            entry.owner_id
                        );
                        let owner_id = new_owner_id();
                        map.insert(
                            path.to_path_buf(),
                            LockEntry {
                                owner_id: owner_id.clone(),
                                acquired_at: Instant::now(),
                            },
                        );
                        return Ok(owner_id);
                    }
                    Some(_) => {}
                }
            }

            if started.elapsed() > wait_timeout {
                if retry_attempt >= self.config.max_retries {
                    return Err(TransportError::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
                let delay = jitter_symmetric(backoff.delay(retry_attempt), jitter);
                retry_attempt += 1;
                tokio::time::sleep(delay).await;
            } else {
                tokio::time::sleep(poll).await;
            }
        }
    }
}

/// 进程级单例
static GLOBAL_LOCK_MANAGER: Lazy<LockManager> =
    Lazy::new(|| LockManager::new(LockManagerConfig::default()));

/// 获取进程级的锁管理器单例
pub fn global() -> &'static LockManager {
    &GLOBAL_LOCK_MANAGER
}
