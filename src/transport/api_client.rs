use std::collections::BTreeMap;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, GenerationConfig};
use crate::error::{network_error_from_status, ChatError};
use crate::message::{Attachment, Role};

/// Multipart field carrying file attachments.
pub const FILES_FIELD: &str = "files";
/// Multipart field carrying the JSON-encoded message list.
pub const MESSAGES_FIELD: &str = "messages";

/// A role/content pair as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMessage {
    pub role: Role,
    pub content: String,
}

impl PayloadMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-call request body.
///
/// `fields` override base generation fields of the same name.
#[derive(Debug, Clone, Default)]
pub struct ChatPayload {
    pub messages: Vec<PayloadMessage>,
    pub files: Vec<Attachment>,
    pub fields: Map<String, Value>,
}

impl ChatPayload {
    #[must_use]
    pub fn new(messages: Vec<PayloadMessage>) -> Self {
        Self {
            messages,
            files: Vec::new(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with_files(mut self, files: Vec<Attachment>) -> Self {
        self.files = files;
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Base fields every request starts from.
#[must_use]
pub fn base_fields(generation: &GenerationConfig) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("stream".to_string(), Value::Bool(generation.stream));
    fields.insert("model".to_string(), Value::String(generation.model.clone()));
    fields.insert("temperature".to_string(), Value::from(generation.temperature));
    fields.insert("top_p".to_string(), Value::from(generation.top_p));
    fields.insert(
        "frequency_penalty".to_string(),
        Value::from(generation.frequency_penalty),
    );
    fields.insert(
        "presence_penalty".to_string(),
        Value::from(generation.presence_penalty),
    );
    if let Some(flow_id) = generation.chat_flow_id.as_ref() {
        fields.insert("chatFlowId".to_string(), Value::String(flow_id.clone()));
    }
    for (name, value) in &generation.extra {
        fields.insert(name.clone(), value.clone());
    }
    fields
}

/// Flatten JSON fields into multipart text values.
///
/// Nulls are skipped, strings pass through, other scalars are stringified and
/// arrays/objects are JSON-encoded.
#[must_use]
pub fn encode_form_fields(fields: &Map<String, Value>) -> Vec<(String, String)> {
    let mut encoded = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Array(_) | Value::Object(_) => value.to_string(),
        };
        encoded.push((name.clone(), text));
    }
    encoded
}

/// Integral floats print without a fractional part (`1.0` -> `1`).
fn format_number(n: &serde_json::Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{f:.0}");
            }
        }
    }
    n.to_string()
}

/// Build extra request headers from configured name/value pairs.
///
/// # Errors
///
/// Returns [`ChatError::Config`] for an invalid header name or value.
pub fn header_map_from_pairs<'a, I>(pairs: I) -> Result<HeaderMap, ChatError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ChatError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ChatError::Config(format!("invalid value for header '{name}': {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn build_reqwest_client(config: &ClientConfig) -> Result<reqwest::Client, ChatError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(timeout_secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ChatError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ChatError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Issues streaming chat requests as multipart form posts.
#[derive(Debug)]
pub struct ChatApiClient {
    client: reqwest::Client,
    url: url::Url,
    api_key: String,
    extra_headers: RwLock<HeaderMap>,
    base_fields: Map<String, Value>,
}

impl ChatApiClient {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the URL, headers or proxy are invalid
    /// or the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, generation: &GenerationConfig) -> Result<Self, ChatError> {
        let client = build_reqwest_client(config)?;
        Self::with_client(client, config, generation)
    }

    /// Like [`ChatApiClient::new`] but reuses an existing `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the URL or headers are invalid.
    pub fn with_client(
        client: reqwest::Client,
        config: &ClientConfig,
        generation: &GenerationConfig,
    ) -> Result<Self, ChatError> {
        let url = url::Url::parse(config.api_url.trim())
            .map_err(|err| ChatError::Config(format!("invalid api_url: {err}")))?;
        let extra_headers = headers_from_config(&config.headers)?;
        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            extra_headers: RwLock::new(extra_headers),
            base_fields: base_fields(generation),
        })
    }

    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    #[must_use]
    pub fn base_fields(&self) -> &Map<String, Value> {
        &self.base_fields
    }

    /// Replace the extra header set used by subsequent requests.
    pub fn set_headers(&self, headers: HeaderMap) {
        *self.extra_headers.write() = headers;
    }

    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.extra_headers.read().clone()
    }

    /// Base fields, then `messages`, then payload overrides.
    #[must_use]
    pub fn merged_fields(&self, payload: &ChatPayload) -> Map<String, Value> {
        let mut fields = self.base_fields.clone();
        let messages = payload
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        fields.insert(MESSAGES_FIELD.to_string(), Value::Array(messages));
        for (name, value) in &payload.fields {
            fields.insert(name.clone(), value.clone());
        }
        fields
    }

    fn build_form(&self, payload: &ChatPayload) -> Result<Form, ChatError> {
        let mut form = Form::new();
        for (name, value) in encode_form_fields(&self.merged_fields(payload)) {
            form = form.text(name, value);
        }
        for file in &payload.files {
            let part = Part::bytes(file.data.to_vec())
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)
                .map_err(|err| {
                    ChatError::InvalidRequest(format!(
                        "attachment '{}' has invalid MIME type: {err}",
                        file.name
                    ))
                })?;
            form = form.part(FILES_FIELD, part);
        }
        Ok(form)
    }

    /// Send `payload` and return the live response once headers arrive.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Abort`] when `cancel` fires before the response arrives.
    /// - [`ChatError::Network`] for transport failures and non-2xx statuses.
    /// - [`ChatError::InvalidRequest`] for an attachment with a bad MIME type.
    pub async fn create_chat_stream(
        &self,
        payload: &ChatPayload,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::aborted("request cancelled before send"));
        }

        let form = self.build_form(payload)?;
        let extra_headers = self.extra_headers.read().clone();
        let request = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .headers(extra_headers)
            .multipart(form);

        tracing::debug!(
            url = %self.url,
            messages = payload.messages.len(),
            files = payload.files.len(),
            "sending chat request"
        );

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(ChatError::aborted("request cancelled"));
            }
            result = request.send() => result.map_err(|err| {
                ChatError::network(format!("request failed: {}", err.without_url()))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "upstream rejected chat request");
            return Err(network_error_from_status(status));
        }
        Ok(response)
    }
}

fn headers_from_config(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ChatError> {
    header_map_from_pairs(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}
