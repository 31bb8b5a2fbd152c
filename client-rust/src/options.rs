use crate::{ClientError, ClientResult};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use std::{collections::HashMap, env, time::Duration};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_MAX_STREAM_DURATION: Duration = Duration::from_secs(300);
pub const ENV_BASE_URL: &str = "RAG_CLIENT_BASE_URL";
pub const ENV_MAX_STREAM_SECS: &str = "RAG_CLIENT_MAX_STREAM_SECS";

#[derive(Clone)]
pub struct ClientOptions {
    /// Server origin. Defaults to `RAG_CLIENT_BASE_URL`, then
    /// `http://localhost:8080`.
    pub base_url: Option<String>,
    /// Must keep cookies for token refresh to work. Defaults to a client with
    /// a cookie store.
    pub client: Option<Client>,
    /// Extra headers sent with every request.
    pub headers: Option<HashMap<String, String>>,
    /// A response stream running longer than this fails with
    /// [`ClientError::StreamTimeout`]. `None` disables the limit.
    pub max_stream_duration: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            client: None,
            headers: None,
            max_stream_duration: Some(DEFAULT_MAX_STREAM_DURATION),
        }
    }
}

impl ClientOptions {
    /// Reads `RAG_CLIENT_BASE_URL` and `RAG_CLIENT_MAX_STREAM_SECS`.
    /// `RAG_CLIENT_MAX_STREAM_SECS=0` disables the stream limit.
    pub fn from_env() -> ClientResult<Self> {
        let max_stream_duration = match env_non_empty(ENV_MAX_STREAM_SECS) {
            None => Some(DEFAULT_MAX_STREAM_DURATION),
            Some(raw) => {
                let seconds = raw.parse::<u64>().map_err(|error| {
                    ClientError::InvalidInput(format!(
                        "Invalid {ENV_MAX_STREAM_SECS} value '{raw}': {error}"
                    ))
                })?;
                (seconds > 0).then(|| Duration::from_secs(seconds))
            }
        };

        Ok(Self {
            base_url: env_non_empty(ENV_BASE_URL),
            max_stream_duration,
            ..Self::default()
        })
    }
}

/// Options with defaults applied and headers validated.
pub(crate) struct ResolvedOptions {
    pub base_url: String,
    pub client: Client,
    pub headers: HeaderMap,
    pub max_stream_duration: Option<Duration>,
}

impl TryFrom<ClientOptions> for ResolvedOptions {
    type Error = ClientError;

    fn try_from(options: ClientOptions) -> ClientResult<Self> {
        let ClientOptions {
            base_url,
            client,
            headers,
            max_stream_duration,
        } = options;

        let base_url = base_url
            .or_else(|| env_non_empty(ENV_BASE_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = normalize_base_url(&base_url)?;

        let client = match client {
            Some(client) => client,
            None => Client::builder().cookie_store(true).build()?,
        };

        Ok(Self {
            base_url,
            client,
            headers: header_map(headers.unwrap_or_default())?,
            max_stream_duration,
        })
    }
}

fn normalize_base_url(raw: &str) -> ClientResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_host = trimmed
        .split_once("://")
        .is_some_and(|(scheme, rest)| {
            matches!(scheme, "http" | "https") && !rest.is_empty() && !rest.starts_with('/')
        });
    if has_host {
        Ok(trimmed.to_string())
    } else {
        Err(ClientError::InvalidInput(format!(
            "Base URL must use http:// or https:// and include a host: '{raw}'"
        )))
    }
}

fn header_map(headers: HashMap<String, String>) -> ClientResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in &headers {
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|error| {
            ClientError::InvalidInput(format!("Invalid header name '{key}': {error}"))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|error| {
            ClientError::InvalidInput(format!("Invalid header value for '{key}': {error}"))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
