//! Cache categories and deterministic key derivation.
//!
//! A physical key is `"{prefix}:{sha256(canonical_json(logical_key))}"`.
//! Canonical JSON sorts object keys by byte order and carries no whitespace,
//! so structurally equal logical keys hash identically whatever their field
//! order in memory.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;

/// Kind of cached result; selects the key prefix and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Search,
    Intent,
    Embedding,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [Self::Search, Self::Intent, Self::Embedding];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Intent => "intent",
            Self::Embedding => "embedding",
        }
    }

    pub fn ttl(&self, config: &CacheConfig) -> Duration {
        let secs = match self {
            Self::Search => config.search_ttl_secs,
            Self::Intent => config.intent_ttl_secs,
            Self::Embedding => config.embedding_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    /// Pattern handed to `delete_matching` to drop the whole category.
    pub fn pattern(&self) -> String {
        format!("{}:", self.prefix())
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for CacheCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.prefix() == s)
            .ok_or_else(|| format!("unknown cache category '{s}' (expected search, intent or embedding)"))
    }
}

/// Physical key for `logical` under `category`.
pub fn derive_key<K: Serialize + ?Sized>(
    category: CacheCategory,
    logical: &K,
) -> Result<String, serde_json::Error> {
    Ok(format!("{}:{}", category.prefix(), content_hash(logical)?))
}

/// Lowercase hex SHA-256 of the canonical JSON form of `value`.
pub fn content_hash<K: Serialize + ?Sized>(value: &K) -> Result<String, serde_json::Error> {
    let bytes = canonical_bytes(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Canonical JSON: sorted object keys, no whitespace.
pub fn canonical_bytes<K: Serialize + ?Sized>(value: &K) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
        // Scalars: serde_json already writes them compactly
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push(b'{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, key)?;
        out.push(b':');
        write_value(value, out)?;
    }
    out.push(b'}');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_canonical_form() {
        let value = json!({"b": [1, {"z": null, "a": true}], "a": "x y"});
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":"x y","b":[1,{"a":true,"z":null}]}"#
        );
    }

    #[test]
    fn test_field_order_does_not_change_key() {
        let mut first = HashMap::new();
        first.insert("query", "jazz");
        first.insert("genre", "music");
        first.insert("limit", "10");

        let mut second = HashMap::new();
        second.insert("limit", "10");
        second.insert("query", "jazz");
        second.insert("genre", "music");

        assert_eq!(
            derive_key(CacheCategory::Search, &first).unwrap(),
            derive_key(CacheCategory::Search, &second).unwrap()
        );
    }

    #[test]
    fn test_struct_and_map_with_same_fields_match() {
        #[derive(Serialize)]
        struct Query<'a> {
            text: &'a str,
            page: u32,
        }

        let from_struct = content_hash(&Query { text: "noir", page: 2 }).unwrap();
        let from_json = content_hash(&json!({"page": 2, "text": "noir"})).unwrap();
        assert_eq!(from_struct, from_json);
    }

    #[test]
    fn test_categories_are_disjoint() {
        let search = derive_key(CacheCategory::Search, "same input").unwrap();
        let intent = derive_key(CacheCategory::Intent, "same input").unwrap();
        assert_ne!(search, intent);
        assert!(search.starts_with("search:"));
        assert!(intent.starts_with("intent:"));
        assert_eq!(search.len(), "search:".len() + 64);
    }

    #[test]
    fn test_category_ttls_and_parsing() {
        let config = CacheConfig::default();
        assert_eq!(CacheCategory::Search.ttl(&config), Duration::from_secs(1800));
        assert_eq!(CacheCategory::Intent.ttl(&config), Duration::from_secs(600));
        assert_eq!(CacheCategory::Embedding.ttl(&config), Duration::from_secs(3600));

        assert_eq!("embedding".parse::<CacheCategory>(), Ok(CacheCategory::Embedding));
        assert!("searches".parse::<CacheCategory>().is_err());
        assert_eq!(CacheCategory::Search.pattern(), "search:");
    }
}
