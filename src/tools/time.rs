//! 时间工具：查询当前时间
//!
//! 支持固定偏移形式的时区（UTC、UTC+9、UTC-05:30）；无法识别的时区回退 UTC 并在结果中注明。

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::Value;

use crate::tools::Tool;

/// 时间工具
#[derive(Default)]
pub struct TimeTool;

/// 解析 "UTC" / "UTC+9" / "UTC-05:30" 形式的偏移；None 表示无法识别
fn parse_offset(timezone: &str) -> Option<FixedOffset> {
    let tz = timezone.trim().to_uppercase();
    if tz.is_empty() || tz == "UTC" || tz == "Z" {
        return FixedOffset::east_opt(0);
    }

    let rest = tz.strip_prefix("UTC").unwrap_or(&tz);
    let (sign, body) = match rest.chars().next()? {
        '+' => (1i32, &rest[1..]),
        '-' => (-1i32, &rest[1..]),
        _ => return None,
    };

    let (hours, minutes) = match body.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (body.parse::<i32>().ok()?, 0),
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Args: {\"timezone\": \"UTC\" | \"UTC+9\" | \"UTC-05:30\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let timezone = args
            .get("timezone")
            .and_then(|v| v.as_str())
            .unwrap_or("UTC")
            .trim();

        match parse_offset(timezone) {
            Some(offset) => {
                let now = Utc::now().with_timezone(&offset);
                Ok(format!(
                    "{} ({})",
                    now.format("%Y-%m-%d %H:%M:%S"),
                    if timezone.is_empty() { "UTC" } else { timezone }
                ))
            }
            None => {
                let now = Utc::now();
                Ok(format!(
                    "{} (UTC, fallback: unrecognized timezone '{}')",
                    now.format("%Y-%m-%d %H:%M:%S"),
                    timezone
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offsets() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("UTC+9").unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(
            parse_offset("UTC-05:30").unwrap().local_minus_utc(),
            -(5 * 3600 + 30 * 60)
        );
        assert!(parse_offset("Mars/Olympus").is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_timezone_falls_back_to_utc() {
        let tool = TimeTool;
        let result = tool
            .execute(serde_json::json!({"timezone": "Nowhere/City"}))
            .await
            .unwrap();
        assert!(result.contains("fallback"));
    }

    #[tokio::test]
    async fn test_default_timezone_is_utc() {
        let tool = TimeTool;
        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.contains("UTC"));
    }
}
