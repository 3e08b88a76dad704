//! 天气工具：wttr.in JSON 接口（免费，无需 API key）
//!
//! GET https://wttr.in/{location}?format=j1，取 current_condition[0] 拼装摘要文本；
//! 支持 unit=fahrenheit，默认摄氏。网络错误与响应结构异常均转为 Err。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Tool;

#[derive(Debug, Deserialize)]
struct WttrResponse {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(rename = "temp_F")]
    temp_f: String,
    humidity: String,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    #[serde(rename = "windspeedKmph")]
    windspeed_kmph: String,
    #[serde(rename = "weatherDesc")]
    weather_desc: Vec<WeatherDesc>,
}

#[derive(Debug, Deserialize)]
struct WeatherDesc {
    value: String,
}

/// 天气工具
pub struct WeatherTool {
    client: Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_base_url("https://wttr.in", timeout_secs)
    }

    /// 自定义 base_url（测试时指向本地 stub）
    pub fn with_base_url(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("curl/7.0")
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, location: &str, unit: &str) -> Result<String, String> {
        let url = format!("{}/{}?format=j1", self.base_url, location);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("API request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let data: WttrResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid API response: {}", e))?;

        let current = data
            .current_condition
            .first()
            .ok_or("Invalid API response: empty current_condition")?;

        let temperature = if unit == "fahrenheit" {
            format!("{}°F", current.temp_f)
        } else {
            format!("{}°C", current.temp_c)
        };
        let condition = current
            .weather_desc
            .first()
            .map(|d| d.value.as_str())
            .unwrap_or("unknown");

        Ok(format!(
            "{}: {} ({}), humidity {}%, feels like {}°C, wind {} km/h",
            location, temperature, condition, current.humidity, current.feels_like_c, current.windspeed_kmph
        ))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get current weather for a city via wttr.in. Args: {\"location\": \"Seoul\", \"unit\": \"celsius|fahrenheit\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if location.is_empty() {
            return Err("Missing location".to_string());
        }
        let unit = args
            .get("unit")
            .and_then(|v| v.as_str())
            .unwrap_or("celsius");

        tracing::info!(location = %location, "weather tool fetch");
        self.fetch(location, unit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_location_rejected() {
        let tool = WeatherTool::new(5);
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.unwrap_err().contains("Missing location"));
    }

    #[test]
    fn test_wttr_response_shape_parses() {
        let raw = r#"{
            "current_condition": [{
                "temp_C": "15", "temp_F": "59", "humidity": "60",
                "FeelsLikeC": "14", "windspeedKmph": "10",
                "weatherDesc": [{"value": "Partly cloudy"}]
            }]
        }"#;
        let parsed: WttrResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.current_condition[0].temp_c, "15");
        assert_eq!(parsed.current_condition[0].weather_desc[0].value, "Partly cloudy");
    }
}
