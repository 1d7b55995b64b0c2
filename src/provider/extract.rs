//! Result extraction from heterogeneous provider payloads
//!
//! Providers return the generated asset in many shapes: inline base64, data
//! URIs, a direct URL under one of several keys, or nested inside
//! `data`/`result`/`output`/`images` objects and lists. Each shape is one
//! [`Strategy`]; strategies run in a fixed order per object and the first hit
//! wins.

use super::Asset;
use base64::prelude::*;
use bytes::Bytes;
use serde_json::{Map, Value};

const WRAPPER_KEYS: [&str; 4] = ["response", "output", "data", "result"];
const BASE64_KEYS: [&str; 3] = ["images_base64", "image_base64", "b64"];
const DATA_URL_KEYS: [&str; 6] = ["file_data", "image_url", "image", "url", "result_url", "data"];
const URL_KEYS: [&str; 4] = ["image_url", "image", "url", "result_url"];
const CONTAINER_KEYS: [&str; 5] = ["data", "result", "output", "images", "image"];
const MAX_DEPTH: usize = 8;

/// A located asset before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    Url(String),
    DataUri(String),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Found(AssetRef),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    InlineBase64,
    DataUrl,
    DirectUrl,
    NestedObject,
    ListOfObjects,
}

impl Strategy {
    pub const ORDER: [Strategy; 5] = [
        Strategy::InlineBase64,
        Strategy::DataUrl,
        Strategy::DirectUrl,
        Strategy::NestedObject,
        Strategy::ListOfObjects,
    ];
}

/// Runs the strategies over a payload
pub struct Extractor<F> {
    is_internal: F,
}

impl<F> Extractor<F>
where
    F: Fn(&str) -> bool,
{
    /// `is_internal` flags queue API URLs that must never be returned as assets
    pub fn new(is_internal: F) -> Self {
        Self { is_internal }
    }

    /// Locate and decode the asset in `payload`
    pub fn extract(&self, payload: &Value) -> Option<Asset> {
        let root = unwrap_top(payload);
        let obj = root.as_object()?;
        let reference = self.from_object(obj, 0)?;
        decode(reference, first_file_name(obj))
    }

    pub fn locate(&self, payload: &Value) -> Option<AssetRef> {
        unwrap_top(payload)
            .as_object()
            .and_then(|obj| self.from_object(obj, 0))
    }

    fn from_object(&self, obj: &Map<String, Value>, depth: usize) -> Option<AssetRef> {
        if depth > MAX_DEPTH {
            return None;
        }
        Strategy::ORDER
            .into_iter()
            .find_map(|strategy| match self.apply(strategy, obj, depth) {
                Extraction::Found(found) => Some(found),
                Extraction::NotFound => None,
            })
    }

    fn apply(&self, strategy: Strategy, obj: &Map<String, Value>, depth: usize) -> Extraction {
        let found = match strategy {
            Strategy::InlineBase64 => inline_base64(obj),
            Strategy::DataUrl => DATA_URL_KEYS.iter().find_map(|key| {
                obj.get(*key)
                    .and_then(Value::as_str)
                    .filter(|s| s.starts_with("data:"))
                    .map(|s| AssetRef::DataUri(s.to_string()))
            }),
            Strategy::DirectUrl => URL_KEYS.iter().find_map(|key| {
                obj.get(*key)
                    .and_then(Value::as_str)
                    .filter(|s| is_http_url(s) && !(self.is_internal)(*s))
                    .map(|s| AssetRef::Url(s.to_string()))
            }),
            Strategy::NestedObject => CONTAINER_KEYS.iter().find_map(|key| {
                obj.get(*key)
                    .and_then(Value::as_object)
                    .and_then(|inner| self.from_object(inner, depth + 1))
            }),
            Strategy::ListOfObjects => CONTAINER_KEYS.iter().find_map(|key| {
                obj.get(*key)
                    .and_then(Value::as_array)
                    .and_then(|items| self.from_list(items, depth + 1))
            }),
        };

        match found {
            Some(reference) => Extraction::Found(reference),
            None => Extraction::NotFound,
        }
    }

    fn from_list(&self, items: &[Value], depth: usize) -> Option<AssetRef> {
        items.iter().find_map(|item| match item {
            Value::Object(inner) => inner
                .get("url")
                .and_then(Value::as_str)
                .and_then(|url| self.string_ref(url))
                .or_else(|| self.from_object(inner, depth)),
            Value::String(s) => self.string_ref(s),
            _ => None,
        })
    }

    fn string_ref(&self, s: &str) -> Option<AssetRef> {
        if s.starts_with("data:") {
            Some(AssetRef::DataUri(s.to_string()))
        } else if is_http_url(s) && !(self.is_internal)(s) {
            Some(AssetRef::Url(s.to_string()))
        } else {
            None
        }
    }
}

fn unwrap_top(payload: &Value) -> &Value {
    WRAPPER_KEYS
        .iter()
        .find_map(|key| payload.get(*key).filter(|v| v.is_object()))
        .unwrap_or(payload)
}

fn inline_base64(obj: &Map<String, Value>) -> Option<AssetRef> {
    let from_keys = BASE64_KEYS.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    });

    from_keys
        .or_else(|| {
            obj.get("file_data")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty() && !s.starts_with("data:"))
                .map(str::to_string)
        })
        .map(AssetRef::Base64)
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://")
}

fn first_file_name(obj: &Map<String, Value>) -> Option<String> {
    let name_of = |v: &Value| v.get("file_name").and_then(Value::as_str).map(str::to_string);

    CONTAINER_KEYS
        .iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|container| match container {
            Value::Array(items) => items.first().and_then(name_of),
            Value::Object(_) => name_of(container),
            _ => None,
        })
        .or_else(|| obj.get("file_name").and_then(Value::as_str).map(str::to_string))
}

/// Decode a located reference into an [`Asset`]
pub fn decode(reference: AssetRef, file_name: Option<String>) -> Option<Asset> {
    match reference {
        AssetRef::Url(url) => Some(Asset::Url { url, file_name }),
        AssetRef::DataUri(uri) => decode_data_uri(&uri, file_name),
        AssetRef::Base64(encoded) => {
            let data = BASE64_STANDARD.decode(encoded.trim()).ok()?;
            Some(Asset::Inline {
                data: Bytes::from(data),
                content_type: None,
                file_name,
            })
        }
    }
}

/// `data:[<mime>][;base64],<payload>`
pub fn decode_data_uri(uri: &str, file_name: Option<String>) -> Option<Asset> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    if payload.is_empty() {
        return None;
    }

    let mime = header.split(';').next().filter(|m| !m.is_empty());
    let data = if header.ends_with(";base64") {
        BASE64_STANDARD.decode(payload.trim()).ok()?
    } else {
        payload.as_bytes().to_vec()
    };

    let file_name = file_name.or_else(|| mime.map(|m| format!("image.{}", extension_for(m))));

    Some(Asset::Inline {
        data: Bytes::from(data),
        content_type: mime.map(str::to_string),
        file_name,
    })
}

fn extension_for(mime: &str) -> &'static str {
    if mime.contains("jpeg") || mime.contains("jpg") {
        "jpg"
    } else if mime.contains("webp") {
        "webp"
    } else {
        "png"
    }
}
