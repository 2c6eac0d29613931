//! rord-client
//!
//! `reqwest` adapter implementing [`RuleOrderApi`] against a REST rule API.
//!
//! Endpoints, relative to `api.base_url`:
//! - `GET  {collection}`      -> JSON array of every rule of the resource type
//! - `GET  {collection}/{id}` -> one rule object
//! - `PUT  {collection}/{id}` -> replace the rule object
//!
//! The API has no partial update, so `set_order` reads the rule, rewrites
//! `order`/`rank` and writes the whole object back.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rord_engine::{ApiError, OrderRule, RuleId, RuleOrderApi};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Connection settings read from `/api/*`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ClientSettings {
    /// - api.base_url (required, http:// or https://)
    /// - api.request_timeout_ms (default 10000, must be > 0)
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let base_url = match cfg.pointer("/api/base_url") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                bail!("api.base_url is required")
            }
            Some(other) => bail!("api.base_url must be a string (got {other})"),
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("api.base_url must start with http:// or https:// (got '{base_url}')");
        }

        let timeout_ms = match cfg.pointer("/api/request_timeout_ms") {
            None | Some(Value::Null) => DEFAULT_REQUEST_TIMEOUT_MS,
            Some(v) => match v.as_u64() {
                Some(0) => bail!("api.request_timeout_ms must be > 0"),
                Some(n) => n,
                None => bail!("api.request_timeout_ms must be a non-negative integer (got {v})"),
            },
        };

        Ok(Self {
            base_url,
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Rules of one resource type (`collection`) behind a REST API.
#[derive(Debug, Clone)]
pub struct HttpRuleOrderApi {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

impl HttpRuleOrderApi {
    pub fn new(settings: &ClientSettings, collection: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("http client build failed")?;
        Ok(Self::with_client(http, settings.base_url.clone(), collection))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            collection: collection.into().trim_matches('/').to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.collection)
    }

    fn rule_url(&self, rule_id: RuleId) -> String {
        format!("{}/{}", self.collection_url(), rule_id)
    }

    async fn read_rule(&self, rule_id: RuleId) -> Result<serde_json::Map<String, Value>, ApiError> {
        let resp = self
            .http
            .get(self.rule_url(rule_id))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        match resp.json::<Value>().await.map_err(decode)? {
            Value::Object(map) => Ok(map),
            other => Err(ApiError::Decode(format!(
                "rule {rule_id}: expected object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

#[async_trait]
impl RuleOrderApi for HttpRuleOrderApi {
    async fn rule_count(&self) -> Result<u32, ApiError> {
        let resp = self
            .http
            .get(self.collection_url())
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        let rules = match resp.json::<Value>().await.map_err(decode)? {
            Value::Array(rules) => rules,
            other => {
                return Err(ApiError::Decode(format!(
                    "{}: expected array, got {}",
                    self.collection,
                    json_kind(&other)
                )))
            }
        };
        let count = u32::try_from(rules.len())
            .map_err(|_| ApiError::Decode(format!("rule count {} overflows u32", rules.len())))?;
        debug!(collection = %self.collection, count, "fetched rule count");
        Ok(count)
    }

    async fn set_order(&self, rule_id: RuleId, order: OrderRule) -> Result<(), ApiError> {
        let mut rule = self.read_rule(rule_id).await?;
        rule.insert("order".to_string(), Value::from(order.order));
        rule.insert("rank".to_string(), Value::from(order.rank));

        let resp = self
            .http
            .put(self.rule_url(rule_id))
            .json(&rule)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await?;
        debug!(
            collection = %self.collection,
            %rule_id,
            order = order.order,
            rank = order.rank,
            "rule order written"
        );
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    };
    Err(ApiError::Api {
        status: Some(status.as_u16()),
        message,
    })
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

fn decode(e: reqwest::Error) -> ApiError {
    ApiError::Decode(e.to_string())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
