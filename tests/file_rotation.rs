//! 文件传输器的端到端轮转测试

use logx::format::FormattedEntry;
use logx::transport::file_transport::{FileSink, FileTransportConfig};
use logx::transport::TransportSink;
use logx::{LogLevel, LogRecord, Transport, TransportConfig};
use serial_test::serial;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

async fn sibling_files(dir: &TempDir, prefix: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) {
            files.push(entry.path());
        }
    }
    files.sort();
    files
}

/// 按大小轮转 + 保留清理的完整场景：
/// 100 字节阈值下写入 10 条 35 字节的记录，期望最终两个轮转文件
/// 加当前文件，第四个文件出现时最旧的被删除
#[tokio::test]
#[serial]
async fn rotation_by_size_with_retention() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileTransportConfig {
        filename: "app.log".to_string(),
        dirname: temp_dir.path().to_string_lossy().to_string(),
        max_size: Some(100),
        max_files: Some(3),
        json: true,
        append_newline: true,
        ..Default::default()
    };
    let transport = Transport::new(
        TransportConfig {
            retry_delay_ms: 1,
            ..Default::default()
        },
        Arc::new(FileSink::new(config).unwrap()),
    )
    .unwrap();

    // 每条 JSON 恰为 35 字节（超过 20 字节），3 条填满一个文件
    transport
        .set_formatter(Some(Arc::new(|record: &LogRecord| {
            Ok(FormattedEntry::Json(serde_json::json!({
                "msg": record.message,
            })))
        })))
        .await;

    for i in 0..10 {
        transport
            .log(&LogRecord::new(
                LogLevel::Info,
                format!("record-{:02}-aaaaaaaaaaaaaa", i),
            ))
            .await
            .unwrap();
    }
    transport.destroy().await.unwrap();

    let files = sibling_files(&temp_dir, "app.log").await;
    assert_eq!(
        files.len(),
        3,
        "expected two rotated files plus the current one, got {:?}",
        files
    );

    // 当前文件存在且在轮转后未超过阈值
    let current = temp_dir.path().join("app.log");
    assert!(current.exists());
    assert!(tokio::fs::metadata(&current).await.unwrap().len() <= 100);

    // 轮转出的文件名形如 app.log.<unix-millis>
    for file in files.iter().filter(|p| **p != current) {
        let name = file.file_name().unwrap().to_string_lossy().to_string();
        let suffix = name.strip_prefix("app.log.").unwrap();
        assert!(
            suffix.chars().all(|c| c.is_ascii_digit()),
            "unexpected rotated name: {}",
            name
        );
    }

    // 每个留存文件都是完整的 JSON 行
    for file in &files {
        let content = tokio::fs::read_to_string(file).await.unwrap();
        for line in content.trim_end().lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value["msg"].as_str().unwrap().starts_with("record-"));
        }
    }
}

/// 跨写入者轮转：同一路径上的两个文件 sink 都越过大小阈值，
/// 只有一个执行重命名，另一个发现轮转已完成后重新打开继续追加
#[tokio::test]
#[serial]
async fn concurrent_writers_rotate_once() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileTransportConfig {
        filename: "shared.log".to_string(),
        dirname: temp_dir.path().to_string_lossy().to_string(),
        max_size: Some(120),
        max_files: Some(3),
        ..Default::default()
    };

    let writer_a = FileSink::new(config.clone()).unwrap();
    let writer_b = FileSink::new(config).unwrap();

    let entry = |tag: &str, i: usize| {
        FormattedEntry::Text(format!("{} line {:02} with some padding", tag, i))
    };

    // 交替写入，让两个 sink 的计数器都越过阈值
    for i in 0..10 {
        writer_a.write(&entry("a", i)).await.unwrap();
        writer_b.write(&entry("b", i)).await.unwrap();
    }

    let files = sibling_files(&temp_dir, "shared.log").await;
    assert!(files.len() > 1, "expected at least one rotation: {:?}", files);
    assert!(
        files.len() <= 3,
        "retention exceeded max_files: {:?}",
        files
    );

    // 轮转后两个写入者都还能继续追加
    writer_a.write(&entry("a", 99)).await.unwrap();
    writer_b.write(&entry("b", 99)).await.unwrap();
    assert!(temp_dir.path().join("shared.log").exists());
}

/// 锁文件协议下的追加：写入期间持锁，结束后锁文件消失
#[tokio::test]
#[serial]
async fn locked_writes_clean_up_lockfiles() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileTransportConfig {
        filename: "locked.log".to_string(),
        dirname: temp_dir.path().to_string_lossy().to_string(),
        use_locking: true,
        ..Default::default()
    };
    let sink = FileSink::new(config).unwrap();

    for i in 0..5 {
        sink.write(&FormattedEntry::Text(format!("locked line {}", i)))
            .await
            .unwrap();
    }

    let content = tokio::fs::read_to_string(temp_dir.path().join("locked.log"))
        .await
        .unwrap();
    assert_eq!(content.lines().count(), 5);
    assert!(!temp_dir.path().join("locked.log.lock").exists());
}
