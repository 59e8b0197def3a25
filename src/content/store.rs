use serde_json::Value;
use tracing::warn;

use crate::kv::KvStore;

const CONTENT_PREFIX: &str = "av:content:";

fn content_key(collection: &str) -> String {
    format!("{CONTENT_PREFIX}{collection}")
}

/// Loads a content collection; an unset or unparsable key reads as an empty
/// array so public pages render before any admin has saved content.
pub async fn load(kv: &dyn KvStore, collection: &str) -> anyhow::Result<Value> {
    let Some(raw) = kv.get(&content_key(collection)).await? else {
        return Ok(Value::Array(Vec::new()));
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(collection, error = %e, "content blob is unparsable, serving empty");
            Ok(Value::Array(Vec::new()))
        }
    }
}

/// Replaces the whole collection document. Concurrent saves are
/// last-write-wins; the admin UI assumes a single editor at a time.
pub async fn save(kv: &dyn KvStore, collection: &str, value: &Value) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    kv.set(&content_key(collection), &raw).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use serde_json::json;

    #[tokio::test]
    async fn unset_collection_is_an_empty_array() {
        let kv = MemoryKv::new();
        let value = load(&kv, "projects").await.unwrap();
        assert_eq!(value, json!([]));
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let kv = MemoryKv::new();
        let doc = json!([{"id": 1, "title": "Wedding at the castle"}]);
        save(&kv, "projects", &doc).await.unwrap();
        assert_eq!(load(&kv, "projects").await.unwrap(), doc);
        // other collections are unaffected
        assert_eq!(load(&kv, "services").await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn corrupt_blob_degrades_to_empty() {
        let kv = MemoryKv::new();
        kv.set("av:content:artists", "not json").await.unwrap();
        assert_eq!(load(&kv, "artists").await.unwrap(), json!([]));
    }
}
