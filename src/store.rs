use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::QueryError;

/// Read access to a Redis-compatible key-value store.
///
/// Every multi-key verb answers positionally: entry `i` of the reply belongs to
/// key or field `i` of the request, and a missing entry is `None`.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, QueryError>;
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, QueryError>;
    fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, QueryError>;
    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, QueryError>;
    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, QueryError>;
    fn hlen(&self, key: &str) -> Result<u64, QueryError>;
}

impl<T: KvStore + ?Sized> KvStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, QueryError> {
        (**self).get(key)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        (**self).mget(keys)
    }

    fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        (**self).hmget(key, fields)
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, QueryError> {
        (**self).hgetall(key)
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, QueryError> {
        (**self).smembers(key)
    }

    fn hlen(&self, key: &str) -> Result<u64, QueryError> {
        (**self).hlen(key)
    }
}

/// Client for a store exposed over HTTP with the Webdis URL convention,
/// `<host>/<VERB>/<arg>/.../<arg>.json`, answering `{"<VERB>": reply}`.
#[derive(Clone)]
pub struct WebdisStore {
    client: Client,
    base_url: Url,
}

impl WebdisStore {
    pub fn new(hostname: &str, timeout: Duration) -> Result<Self, QueryError> {
        let base_url =
            Url::parse(hostname).map_err(|err| QueryError::InvalidHostname(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(QueryError::InvalidHostname(hostname.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-bq/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| QueryError::StoreHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| QueryError::StoreHttp(err.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the command URL. Each argument becomes one percent-encoded path
    /// segment, and the format suffix goes on the final segment so dots inside
    /// sample identifiers are not taken as an extension.
    pub fn command_url(&self, verb: &str, args: &[&str]) -> Result<Url, QueryError> {
        let mut segments = Vec::with_capacity(args.len() + 1);
        segments.push(verb.to_string());
        segments.extend(args.iter().map(|arg| arg.to_string()));
        if let Some(last) = segments.last_mut() {
            last.push_str(".json");
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| QueryError::InvalidHostname(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments.iter());
        Ok(url)
    }

    fn execute(&self, verb: &str, args: &[&str]) -> Result<Value, QueryError> {
        let url = self.command_url(verb, args)?;
        debug!(verb, args = args.len(), "store command");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| QueryError::StoreHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "store request failed".to_string());
            return Err(QueryError::StoreStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| QueryError::StoreResponse {
                verb: verb.to_string(),
                message: err.to_string(),
            })?;
        extract_reply(verb, body)
    }
}

impl KvStore for WebdisStore {
    fn get(&self, key: &str) -> Result<Option<String>, QueryError> {
        let reply = self.execute("GET", &[key])?;
        reply_to_optional("GET", reply)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let args = keys.iter().map(String::as_str).collect::<Vec<_>>();
        let reply = self.execute("MGET", &args)?;
        reply_to_positional("MGET", reply, keys.len())
    }

    fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>, QueryError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = Vec::with_capacity(fields.len() + 1);
        args.push(key);
        args.extend(fields.iter().map(String::as_str));
        let reply = self.execute("HMGET", &args)?;
        reply_to_positional("HMGET", reply, fields.len())
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, QueryError> {
        let reply = self.execute("HGETALL", &[key])?;
        reply_to_map("HGETALL", reply)
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>, QueryError> {
        let reply = self.execute("SMEMBERS", &[key])?;
        reply_to_positional("SMEMBERS", reply, usize::MAX).map(|items| {
            items.into_iter().flatten().collect()
        })
    }

    fn hlen(&self, key: &str) -> Result<u64, QueryError> {
        let reply = self.execute("HLEN", &[key])?;
        reply.as_u64().ok_or_else(|| unexpected("HLEN", &reply))
    }
}

fn unexpected(verb: &str, reply: &Value) -> QueryError {
    QueryError::StoreResponse {
        verb: verb.to_string(),
        message: format!("unexpected reply {reply}"),
    }
}

pub(crate) fn extract_reply(verb: &str, body: Value) -> Result<Value, QueryError> {
    match body {
        Value::Object(mut map) => map
            .remove(verb)
            .ok_or_else(|| QueryError::StoreResponse {
                verb: verb.to_string(),
                message: "reply is missing the command field".to_string(),
            }),
        other => Err(unexpected(verb, &other)),
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

pub(crate) fn reply_to_optional(verb: &str, reply: Value) -> Result<Option<String>, QueryError> {
    match reply {
        Value::Array(_) | Value::Object(_) => Err(unexpected(verb, &reply)),
        scalar => Ok(scalar_to_string(scalar)),
    }
}

/// Converts an array reply. `expected` is the request arity, or `usize::MAX`
/// when the reply length is not tied to the request.
pub(crate) fn reply_to_positional(
    verb: &str,
    reply: Value,
    expected: usize,
) -> Result<Vec<Option<String>>, QueryError> {
    let Value::Array(items) = reply else {
        return Err(unexpected(verb, &reply));
    };
    if expected != usize::MAX && items.len() != expected {
        return Err(QueryError::StoreResponse {
            verb: verb.to_string(),
            message: format!("expected {expected} values, got {}", items.len()),
        });
    }
    Ok(items.into_iter().map(scalar_to_string).collect())
}

pub(crate) fn reply_to_map(
    verb: &str,
    reply: Value,
) -> Result<BTreeMap<String, String>, QueryError> {
    match reply {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter_map(|(field, value)| scalar_to_string(value).map(|value| (field, value)))
            .collect()),
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(QueryError::StoreResponse {
                    verb: verb.to_string(),
                    message: "flat hash reply has an odd number of entries".to_string(),
                });
            }
            let mut map = BTreeMap::new();
            let mut iter = items.into_iter().map(scalar_to_string);
            while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                if let (Some(field), Some(value)) = (field, value) {
                    map.insert(field, value);
                }
            }
            Ok(map)
        }
        other => Err(unexpected(verb, &other)),
    }
}
