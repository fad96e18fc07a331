//! Codecs - named encode/decode pairs
//!
//! Typed values cross into a codec as `serde_json::Value`, which keeps
//! `Codec` object-safe so codecs can live in a registry by name. A type's
//! codec chain is an ordered list of these names (see `service`).

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde_json::Value;
use crate::{Error, Result};

/// Name of the JSON codec
pub const JSON: &str = "json";
/// Name of the plain UTF-8 text codec
pub const TEXT: &str = "text";
/// Name of the TOML codec
pub const TOML: &str = "toml";

/// A named encode/decode pair.
pub trait Codec: Send + Sync {
    /// Encode a value into bytes
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode bytes back into a value
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON via serde_json. Accepts any value.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Raw UTF-8 text. Only string values encode; decoding always yields a string.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(Error::Codec(format!("text codec cannot encode {}", kind_of(other)))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::Codec(format!("text codec: {}", e)))?;
        Ok(Value::String(s.to_string()))
    }
}

/// TOML documents. Only top-level tables encode.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        if !value.is_object() {
            return Err(Error::Codec(format!("toml codec cannot encode {}", kind_of(value))));
        }
        let s = toml::to_string(value).map_err(|e| Error::Codec(format!("toml codec: {}", e)))?;
        Ok(s.into_bytes())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::Codec(format!("toml codec: {}", e)))?;
        toml::from_str(s).map_err(|e| Error::Codec(format!("toml codec: {}", e)))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Name -> codec lookup table.
///
/// Usually filled once at start-up; reads and registration may race safely.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: RwLock<HashMap<String, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `json`, `text` and `toml` codecs
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(JSON, Arc::new(JsonCodec));
        registry.register(TEXT, Arc::new(TextCodec));
        registry.register(TOML, Arc::new(TomlCodec));
        registry
    }

    /// Register a codec under a name, replacing any previous one
    pub fn register(&self, name: impl Into<String>, codec: Arc<dyn Codec>) {
        let name = name.into();
        tracing::debug!("Registering codec {}", name);
        self.codecs.write().insert(name, codec);
    }

    /// Look up a codec by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.read().get(name).cloned()
    }

    /// All registered codec names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry").field("codecs", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["json", "text", "toml"]);
        assert!(registry.get("json").is_some());
        assert!(registry.get("yaml").is_none());
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec;
        let bytes = codec.encode(&json!({"n": 42})).unwrap();
        assert_eq!(bytes, br#"{"n":42}"#);
        assert_eq!(codec.decode(&bytes).unwrap(), json!({"n": 42}));
        assert!(codec.decode(b"not json").is_err());
    }

    #[test]
    fn test_text_codec_only_strings() {
        let codec = TextCodec;
        assert_eq!(codec.encode(&json!("hello")).unwrap(), b"hello");
        assert!(codec.encode(&json!({"a": 1})).is_err());
        assert_eq!(codec.decode(b"plain words").unwrap(), json!("plain words"));
        assert!(codec.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_toml_codec_tables_only() {
        let codec = TomlCodec;
        let bytes = codec.encode(&json!({"name": "svc", "port": 8080})).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("name = \"svc\""));
        assert_eq!(codec.decode(&bytes).unwrap(), json!({"name": "svc", "port": 8080}));
        assert!(codec.encode(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_register_replaces() {
        let registry = CodecRegistry::new();
        registry.register("x", Arc::new(TextCodec));
        registry.register("x", Arc::new(JsonCodec));
        let codec = registry.get("x").unwrap();
        // JsonCodec encodes strings with quotes, TextCodec would not
        assert_eq!(codec.encode(&json!("s")).unwrap(), b"\"s\"");
    }
}
