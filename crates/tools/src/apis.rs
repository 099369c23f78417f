//! Thin wrappers over public JSON APIs: weather (wttr.in), ip_info
//! (ipapi.co), exchange_rate (exchangerate-api.com), plus config-defined
//! custom API tools.

use async_trait::async_trait;
use std::time::Duration;

use relayclaw_config::CustomApiConfig;
use relayclaw_core::error::ToolError;
use relayclaw_core::tool::Tool;

fn api_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client")
}

async fn fetch_text(client: &reqwest::Client, tool: &str, url: &str) -> Result<String, ToolError> {
    let response = client.get(url).send().await.map_err(|e| {
        ToolError::ExecutionFailed {
            tool: tool.into(),
            reason: format!("request failed: {e}"),
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::ExecutionFailed {
            tool: tool.into(),
            reason: format!("API returned status {}", status.as_u16()),
        });
    }

    response.text().await.map_err(|e| ToolError::ExecutionFailed {
        tool: tool.into(),
        reason: e.to_string(),
    })
}

pub struct WeatherTool {
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new() -> Self {
        Self {
            client: api_client(Duration::from_secs(10)),
        }
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Look up the weather for a city via wttr.in. No API key required."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "City name, e.g. Berlin, Tokyo"
                },
                "format": {
                    "type": "string",
                    "description": "Detail level: 1 (brief), 2, or 3 (full); default 1"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let city = args["city"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("city is required".into()))?;
        let format = args["format"].as_str().filter(|f| !f.is_empty()).unwrap_or("1");

        let url = format!("https://wttr.in/{city}?format={format}");
        fetch_text(&self.client, "weather", &url).await
    }
}

pub struct IpInfoTool {
    client: reqwest::Client,
}

impl IpInfoTool {
    pub fn new() -> Self {
        Self {
            client: api_client(Duration::from_secs(10)),
        }
    }
}

impl Default for IpInfoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for IpInfoTool {
    fn name(&self) -> &str {
        "ip_info"
    }

    fn description(&self) -> &str {
        "Look up geolocation info for an IP address (or the host's own IP when omitted)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ip": {
                    "type": "string",
                    "description": "IP address; empty queries the host's own"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let url = match args["ip"].as_str().filter(|ip| !ip.is_empty()) {
            Some(ip) => format!("https://ipapi.co/{ip}/json/"),
            None => "https://ipapi.co/json/".to_string(),
        };
        fetch_text(&self.client, "ip_info", &url).await
    }
}

pub struct ExchangeRateTool {
    client: reqwest::Client,
}

impl ExchangeRateTool {
    pub fn new() -> Self {
        Self {
            client: api_client(Duration::from_secs(10)),
        }
    }
}

impl Default for ExchangeRateTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExchangeRateTool {
    fn name(&self) -> &str {
        "exchange_rate"
    }

    fn description(&self) -> &str {
        "Look up currency exchange rates via exchangerate-api.com."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "from": {
                    "type": "string",
                    "description": "Source currency code, e.g. USD"
                },
                "to": {
                    "type": "string",
                    "description": "Target currency code, e.g. EUR"
                }
            },
            "required": ["from", "to"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let from = args["from"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("from currency is required".into()))?
            .to_uppercase();
        // `to` is validated even though the full table is returned, so the
        // model gets an early error for a malformed call.
        let _to = args["to"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("to currency is required".into()))?
            .to_uppercase();

        let url = format!("https://api.exchangerate-api.com/v4/latest/{from}");
        fetch_text(&self.client, "exchange_rate", &url).await
    }
}

/// A config-defined HTTP API exposed as a tool.
pub struct CustomApiTool {
    config: CustomApiConfig,
    client: reqwest::Client,
}

impl CustomApiTool {
    pub fn new(config: CustomApiConfig) -> Self {
        let client = api_client(Duration::from_secs(config.timeout_s));
        Self { config, client }
    }
}

#[async_trait]
impl Tool for CustomApiTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Appended to the configured URL as the query string"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let mut url = self.config.url.clone();
        if let Some(query) = args["query"].as_str().filter(|q| !q.is_empty()) {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str("q=");
            url.push_str(&urlencode(query));
        }

        let mut request = match self.config.method.to_uppercase().as_str() {
            "POST" => self.client.post(&url),
            _ => self.client.get(&url),
        };
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request.send().await.map_err(|e| ToolError::ExecutionFailed {
            tool: self.config.name.clone(),
            reason: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed {
                tool: self.config.name.clone(),
                reason: format!("API returned status {}", status.as_u16()),
            });
        }

        response.text().await.map_err(|e| ToolError::ExecutionFailed {
            tool: self.config.name.clone(),
            reason: e.to_string(),
        })
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
