use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serializer};

// 重新导出 serde_with
pub use serde_with::{serde_as, DeserializeAs, SerializeAs};

/// 字节大小的人性化格式化器
///
/// 支持格式: "100b", "10k", "10m", "1g"（不区分大小写，可带 "kb"/"mb"/"gb" 后缀），
/// 也接受裸数字表示字节数
pub struct HumanSize;

impl SerializeAs<u64> for HumanSize {
    fn serialize_as<S>(source: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_size(*source))
    }
}

impl<'de> DeserializeAs<'de, u64> for HumanSize {
    fn deserialize_as<D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| serde::de::Error::custom(format!("invalid size: {}", n))),
            serde_json::Value::String(s) => parse_size(&s).map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!(
                "expected size string or number, got {}",
                other
            ))),
        }
    }
}

/// 解析大小字符串: "10m" -> 10485760
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("empty size string"));
    }

    let digits_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_str, unit_str) = s.split_at(digits_end);

    if num_str.is_empty() {
        return Err(anyhow!("expected a number in size string: {}", s));
    }

    let value: f64 = num_str
        .parse()
        .map_err(|_| anyhow!("invalid number: {}", num_str))?;

    let multiplier: u64 = match unit_str.trim() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => return Err(anyhow!("unsupported size unit: {}", other)),
    };

    Ok((value * multiplier as f64) as u64)
}

/// 字节数格式化为字符串: 10485760 -> "10m"
pub fn format_size(size: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if size >= GB && size % GB == 0 {
        format!("{}g", size / GB)
    } else if size >= MB && size % MB == 0 {
        format!("{}m", size / MB)
    } else if size >= KB && size % KB == 0 {
        format!("{}k", size / KB)
    } else {
        format!("{}b", size)
    }
}
