use crate::error::TransportError;
use crate::format::FormattedEntry;

/// 日志落地 trait
///
/// 负责把格式化后的日志条目写入具体介质（控制台、文件、HTTP 端点等）。
/// 生命周期和批量、重试逻辑由 [`Transport`](crate::transport::Transport) 引擎统一驱动，
/// 实现方只关心单条与批量写入本身。
#[async_trait::async_trait]
pub trait TransportSink: Send + Sync {
    /// sink 类型名，用于状态汇报与诊断
    fn kind(&self) -> &'static str;

    /// 打开底层资源（幂等由引擎保证，只在首次 init 时调用）
    async fn open(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// 释放底层资源
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// 写入单条日志
    async fn write(&self, entry: &FormattedEntry) -> Result<(), TransportError>;

    /// 批量写入（默认实现逐条回落）
    async fn write_batch(&self, entries: &[FormattedEntry]) -> Result<(), TransportError> {
        for entry in entries {
            self.write(entry).await?;
        }
        Ok(())
    }
}
