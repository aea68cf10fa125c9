use crate::record::{ArgValue, LogRecord};
use serde_json::{json, Value};

/// 参数序列化的默认最大深度
///
/// 超过深度的子树被截断为哨兵字符串，保证任意深的参数图都能安全落盘
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// 截断哨兵
pub const TRUNCATED_SENTINEL: &str = "[Truncated]";

/// 格式化后的日志条目
///
/// 传输器经过格式化钩子之后看到的记录形态。默认钩子产出 Json 形态；
/// 自定义格式化器可以返回任意下游 sink 能消费的形态。
#[derive(Debug, Clone)]
pub enum FormattedEntry {
    /// 纯文本条目
    Text(String),
    /// 结构化条目
    Json(Value),
}

impl FormattedEntry {
    /// 渲染为单行字符串
    ///
    /// Json 形态序列化为单行 JSON，Text 形态原样返回
    pub fn render(&self) -> String {
        match self {
            FormattedEntry::Text(s) => s.clone(),
            FormattedEntry::Json(v) => v.to_string(),
        }
    }

    /// 转换为 JSON 值（Text 形态包装为 JSON 字符串）
    pub fn to_json(&self) -> Value {
        match self {
            FormattedEntry::Text(s) => Value::String(s.clone()),
            FormattedEntry::Json(v) => v.clone(),
        }
    }

    /// 序列化后的字节长度
    pub fn byte_len(&self) -> usize {
        self.render().len()
    }
}

/// 默认格式化
///
/// 产出形如 `{timestamp, level, environment, message, args}` 的结构化条目，
/// 时间戳为 ISO-8601，错误参数展开为 `{name, message, stack}`
pub fn default_entry(record: &LogRecord) -> FormattedEntry {
    FormattedEntry::Json(json!({
        "timestamp": record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "level": record.level.as_str(),
        "environment": record.environment.to_string(),
        "message": record.message,
        "args": render_args(&record.args, DEFAULT_MAX_DEPTH),
    }))
}

/// 纯文本格式化
///
/// `2026-08-05T12:00:00.000Z [INFO] [production] message arg1 arg2`
pub fn render_text(record: &LogRecord) -> String {
    let mut line = format!(
        "{} [{}] [{}] {}",
        record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        record.level.as_str(),
        record.environment,
        record.message,
    );
    for arg in &record.args {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    line
}

/// 渲染参数序列
pub fn render_args(args: &[ArgValue], max_depth: usize) -> Vec<Value> {
    args.iter()
        .map(|arg| match arg {
            ArgValue::Text(s) => Value::String(s.clone()),
            ArgValue::Error {
                name,
                message,
                stack,
            } => json!({
                "name": name,
                "message": message,
                "stack": stack,
            }),
            ArgValue::Value(v) => bounded_value(v, max_depth),
        })
        .collect()
}

/// 深度受限的值拷贝
///
/// 所有权模型下参数树不存在真正的环，深度上限覆盖了环检测的职责：
/// 任何超过 max_depth 的子树都被替换为截断哨兵
pub fn bounded_value(value: &Value, max_depth: usize) -> Value {
    if max_depth == 0 {
        return Value::String(TRUNCATED_SENTINEL.to_string());
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| bounded_value(v, max_depth - 1))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), bounded_value(v, max_depth - 1)))
                .collect(),
        ),
        other => other.clone(),
    }
}
