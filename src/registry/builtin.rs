//! 内置参考客户端
//!
//! CryptoCompareClient 走真实 HTTP（可配置 base_url，测试可指向本地桩）；
//! StaticClient 返回预置 JSON，用于演示注册表与测试。其余三十来个第三方客户端
//! 是外部协作者，只需实现 ApiClient 即可挂进注册表。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::registry::{ApiClient, ApiRegistry, OperationDescriptor};

/// CryptoCompare 风格行情客户端：get_price / get_top_volume
pub struct CryptoCompareClient {
    client: Client,
    base_url: String,
    operations: Vec<OperationDescriptor>,
}

impl CryptoCompareClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self::with_base_url("https://min-api.cryptocompare.com", timeout_secs)
    }

    pub fn with_base_url(base_url: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            operations: vec![
                OperationDescriptor::new(
                    "get_price",
                    "Current price of a cryptocurrency in one or more fiat currencies",
                    &["fsym", "tsyms"],
                ),
                OperationDescriptor::new(
                    "get_top_volume",
                    "Top cryptocurrencies by 24h trading volume in a fiat currency",
                    &["tsym", "limit"],
                ),
            ],
        }
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP status {}", resp.status()));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("Invalid JSON response: {}", e))
    }
}

fn arg_str(args: &Map<String, Value>, key: &str) -> Result<String, String> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v) => Ok(v.to_string()),
        None => Err(format!("Missing argument: {}", key)),
    }
}

#[async_trait]
impl ApiClient for CryptoCompareClient {
    fn name(&self) -> &str {
        "crypto_compare_api"
    }

    fn description(&self) -> &str {
        "Cryptocurrency market data: prices, volumes"
    }

    fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    async fn invoke(&self, operation: &str, args: &Map<String, Value>) -> Result<Value, String> {
        match operation {
            "get_price" => {
                let fsym = arg_str(args, "fsym")?;
                let tsyms = arg_str(args, "tsyms")?;
                self.get_json("/data/price", &[("fsym", fsym), ("tsyms", tsyms)])
                    .await
            }
            "get_top_volume" => {
                let tsym = arg_str(args, "tsym")?;
                let limit = arg_str(args, "limit")?;
                self.get_json("/data/top/totalvolfull", &[("tsym", tsym), ("limit", limit)])
                    .await
            }
            other => Err(format!("Unknown operation: {}", other)),
        }
    }
}

/// 预置响应客户端：操作 -> 固定 JSON；可选地对指定操作返回错误（测试失败路径）
pub struct StaticClient {
    name: String,
    description: String,
    operations: Vec<OperationDescriptor>,
    responses: HashMap<String, Value>,
    failures: HashMap<String, String>,
    invocations: std::sync::atomic::AtomicUsize,
}

impl StaticClient {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            operations: Vec::new(),
            responses: HashMap::new(),
            failures: HashMap::new(),
            invocations: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_operation(mut self, descriptor: OperationDescriptor, response: Value) -> Self {
        self.responses.insert(descriptor.name.clone(), response);
        self.operations.push(descriptor);
        self
    }

    /// 注册一个总是失败的操作
    pub fn with_failing_operation(
        mut self,
        descriptor: OperationDescriptor,
        error: impl Into<String>,
    ) -> Self {
        self.failures.insert(descriptor.name.clone(), error.into());
        self.operations.push(descriptor);
        self
    }

    /// 实际发生的调用次数（测试校验「需要输入时不调用」等属性）
    pub fn invocations(&self) -> usize {
        self.invocations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClient for StaticClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    async fn invoke(&self, operation: &str, _args: &Map<String, Value>) -> Result<Value, String> {
        self.invocations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(err) = self.failures.get(operation) {
            return Err(err.clone());
        }
        self.responses
            .get(operation)
            .cloned()
            .ok_or_else(|| format!("Unknown operation: {}", operation))
    }
}

/// 默认注册表：行情客户端走 HTTP，其余叶子先挂演示客户端
pub fn default_registry() -> ApiRegistry {
    let mut registry = ApiRegistry::new();

    registry.register(CryptoCompareClient::new(15));

    registry.register(
        StaticClient::new("binance_api", "Exchange account and order data").with_operation(
            OperationDescriptor::new("get_ticker", "24h ticker statistics for a symbol", &["symbol"]),
            json!({"symbol": "BTCUSDT", "lastPrice": "0"}),
        ),
    );
    registry.register(
        StaticClient::new("alpha_vantage_api", "Stock quotes and time series").with_operation(
            OperationDescriptor::new("get_quote", "Latest quote for a stock symbol", &["symbol"]),
            json!({"Global Quote": {}}),
        ),
    );
    registry.register(
        StaticClient::new("github_api", "Repositories, issues and commits")
            .with_operation(
                OperationDescriptor::new("list_repos", "Public repositories of a user", &["username"]),
                json!([]),
            )
            .with_operation(
                OperationDescriptor::new("list_issues", "Open issues of a repository", &["owner", "repo"]),
                json!([]),
            ),
    );
    registry.register(
        StaticClient::new("stack_exchange_api", "Programming questions and answers").with_operation(
            OperationDescriptor::new("search_questions", "Search questions by keywords", &["intitle", "tagged"]),
            json!({"items": []}),
        ),
    );
    registry.register(
        StaticClient::new("slack_api", "Team messaging").with_operation(
            OperationDescriptor::new("post_message", "Post a message to a channel", &["channel", "text"]),
            json!({"ok": true}),
        ),
    );
    registry.register(
        StaticClient::new("twilio_api", "SMS and voice messaging").with_operation(
            OperationDescriptor::new("send_sms", "Send an SMS message", &["to", "body"]),
            json!({"status": "queued"}),
        ),
    );
    registry.register(
        StaticClient::new("news_api", "Headlines and article search").with_operation(
            OperationDescriptor::new("top_headlines", "Top headlines for a country or topic", &["country", "category"]),
            json!({"articles": []}),
        ),
    );
    registry.register(
        StaticClient::new("reddit_api", "Subreddit posts and comments").with_operation(
            OperationDescriptor::new("hot_posts", "Hot posts of a subreddit", &["subreddit", "limit"]),
            json!({"data": {"children": []}}),
        ),
    );
    registry.register(
        StaticClient::new("open_weather_api", "Current weather and forecasts").with_operation(
            OperationDescriptor::new("current_weather", "Current weather for a city", &["city", "units"]),
            json!({"weather": []}),
        ),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_default_tree() {
        let registry = default_registry();
        for leaf in crate::registry::default_tree().leaves() {
            assert!(registry.contains(&leaf), "missing client for {}", leaf);
        }
    }

    #[tokio::test]
    async fn test_static_client_counts_invocations() {
        let client = StaticClient::new("x", "x").with_operation(
            OperationDescriptor::new("op", "d", &[]),
            json!(1),
        );
        assert_eq!(client.invocations(), 0);
        client.invoke("op", &Map::new()).await.unwrap();
        client.invoke("op", &Map::new()).await.unwrap();
        assert_eq!(client.invocations(), 2);
    }

    #[tokio::test]
    async fn test_crypto_client_rejects_missing_args() {
        let client = CryptoCompareClient::with_base_url("http://127.0.0.1:9", 1);
        let err = client.invoke("get_price", &Map::new()).await.unwrap_err();
        assert!(err.contains("fsym"));
    }
}
