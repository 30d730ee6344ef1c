use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// A flat JSON object on disk, the local-storage analogue.
///
/// Every read refreshes from disk and every write merges only the keys this
/// instance touched, so two stores pointed at the same file do not clobber
/// each other's entries.
#[derive(Debug, Clone)]
pub struct JsonObjectStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
}

impl JsonObjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.reload().get(key).cloned()
    }

    pub fn get_string(&mut self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        let payload = self.reload();
        if payload.get(key) == Some(&value) {
            return Ok(());
        }
        payload.insert(key.to_string(), value);
        self.removed_keys.retain(|existing| existing != key);
        if !self.dirty_keys.iter().any(|existing| existing == key) {
            self.dirty_keys.push(key.to_string());
        }
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> anyhow::Result<bool> {
        let payload = self.reload();
        if payload.remove(key).is_none() {
            return Ok(false);
        }
        self.dirty_keys.retain(|existing| existing != key);
        if !self.removed_keys.iter().any(|existing| existing == key) {
            self.removed_keys.push(key.to_string());
        }
        self.flush()?;
        Ok(true)
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() && self.removed_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        Ok(())
    }

    fn reload(&mut self) -> &mut Map<String, Value> {
        let fresh = read_json_object(&self.path).unwrap_or_default();
        self.payload.insert(fresh)
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::JsonObjectStore;

    #[test]
    fn set_then_get_round_trips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut store = JsonObjectStore::new(&path);
        store.set("theme", json!("dark"))?;

        let mut reloaded = JsonObjectStore::new(path);
        assert_eq!(reloaded.get_string("theme").as_deref(), Some("dark"));
        Ok(())
    }

    #[test]
    fn writers_merge_instead_of_clobbering() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut store_a = JsonObjectStore::new(&path);
        let mut store_b = JsonObjectStore::new(&path);

        store_a.set("a", json!(1))?;
        store_b.set("b", json!(2))?;
        store_a.set("c", json!(3))?;

        let mut reloaded = JsonObjectStore::new(path);
        assert_eq!(reloaded.get("a"), Some(json!(1)));
        assert_eq!(reloaded.get("b"), Some(json!(2)));
        assert_eq!(reloaded.get("c"), Some(json!(3)));
        Ok(())
    }

    #[test]
    fn remove_only_drops_the_named_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut store = JsonObjectStore::new(&path);
        store.set("keep", json!(true))?;
        store.set("drop", json!(true))?;

        assert!(store.remove("drop")?);
        assert!(!store.remove("drop")?);

        let mut reloaded = JsonObjectStore::new(path);
        assert_eq!(reloaded.get("keep"), Some(json!(true)));
        assert_eq!(reloaded.get("drop"), None);
        Ok(())
    }

    #[test]
    fn missing_or_corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("storage.json");
        let mut store = JsonObjectStore::new(&path);
        assert_eq!(store.get("anything"), None);

        std::fs::write(&path, "not json")?;
        assert_eq!(store.get("anything"), None);
        store.set("fresh", json!("value"))?;
        assert_eq!(store.get_string("fresh").as_deref(), Some("value"));
        Ok(())
    }
}
