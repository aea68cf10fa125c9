use crate::error::TransportError;
use crate::lock::manager::new_owner_id;
use crate::transport::retry::{jitter_symmetric, Backoff};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// 锁文件获取失败的退避：因子 2，上限 1s，抖动 ±20%
const LOCKFILE_BACKOFF: Backoff =
    Backoff::new(Duration::from_millis(50), 2.0, Duration::from_secs(1));
const LOCKFILE_JITTER: f64 = 0.2;

/// 磁盘锁文件配置
///
/// 同一文件系统上的多个写入进程通过 `<path>.lock` 协调写入
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct LockfileConfig {
    /// 锁文件的过期时间（毫秒），mtime 超过该时长的锁文件视为废弃并被强制移除
    #[default(10_000)]
    pub lock_timeout_ms: u64,

    /// 获取失败的最大重试次数
    #[default(5)]
    pub max_retries: u32,
}

/// 目标路径对应的锁文件路径: `app.log` -> `app.log.lock`
pub fn lockfile_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// 在锁文件保护下执行一段工作
///
/// 获取 `<path>.lock` 后运行 work，无论 work 成功与否都保证移除锁文件。
/// 获取失败（重试耗尽）返回 LockTimeout。
pub async fn with_lockfile<T, F, Fut>(
    path: &Path,
    config: &LockfileConfig,
    work: F,
) -> Result<T, TransportError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let lock_path = lockfile_path(path);
    acquire_lockfile(&lock_path, config).await?;

    let result = work().await;

    // 所有退出路径都移除锁文件，包括 work 失败
    if let Err(e) = tokio::fs::remove_file(&lock_path).await {
        log::warn!("failed to remove lockfile {}: {}", lock_path.display(), e);
    }

    result
}

/// 创建锁文件（原子 create_new），内容为持有者令牌
async fn acquire_lockfile(lock_path: &Path, config: &LockfileConfig) -> Result<(), TransportError> {
    let stale_after = Duration::from_millis(config.lock_timeout_ms);

    for attempt in 0..=config.max_retries {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
            .await
        {
            Ok(mut file) => {
                let token = new_owner_id();
                file.write_all(token.as_bytes()).await?;
                file.flush().await?;
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(lock_path, stale_after).await {
                    log::warn!(
                        "reclaiming stale lockfile {} (older than {}ms)",
                        lock_path.display(),
                        config.lock_timeout_ms
                    );
                    let _ = tokio::fs::remove_file(lock_path).await;
                    continue;
                }

                if attempt == config.max_retries {
                    break;
                }
                let delay = jitter_symmetric(LOCKFILE_BACKOFF.delay(attempt), LOCKFILE_JITTER);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }

    Err(TransportError::LockTimeout {
        path: lock_path.to_path_buf(),
    })
}

/// 锁文件的 mtime 是否超过了废弃阈值
async fn is_stale(lock_path: &Path, stale_after: Duration) -> bool {
    match tokio::fs::metadata(lock_path).await {
        Ok(meta) => match meta.modified() {
            Ok(mtime) => mtime
                .elapsed()
                .map(|age| age >= stale_after)
                .unwrap_or(false),
            Err(_) => false,
        },
        // 已经被别的持有者移除，视作可重试
        Err(_) => true,
    }
}
