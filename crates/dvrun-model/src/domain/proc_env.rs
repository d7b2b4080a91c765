use serde::{Deserialize, Serialize};

use crate::KeyValue;

/// Environment of a worker process.
///
/// Stored as an ordered list of key–value pairs; lookups resolve to the last matching entry, so
/// appending is an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcEnv(pub Vec<KeyValue>);

impl ProcEnv {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_process() -> Self {
        Self(
            std::env::vars_os()
                .filter_map(|(k, v)| Some(KeyValue::new(k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Get the value for a key, returning the last matching entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|kv| kv.key() == key)
            .map(|kv| kv.value())
    }

    /// Append a key–value pair; it shadows earlier entries with the same key.
    pub fn push<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.push(KeyValue::new(key, value));
    }

    /// Replace every entry for `key` with a single one holding `value`.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        self.0.retain(|kv| kv.key() != key);
        self.0.push(KeyValue::new(key, value));
    }

    /// Concatenate two environments; entries from `other` win on lookup.
    pub fn merged(&self, other: &ProcEnv) -> ProcEnv {
        let mut out = self.0.clone();
        out.extend(other.0.clone());
        ProcEnv(out)
    }

    /// Effective `(key, value)` pairs with shadowed entries dropped, in first-seen key order.
    pub fn resolved(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = Vec::with_capacity(self.0.len());
        for kv in &self.0 {
            match out.iter_mut().find(|(k, _)| *k == kv.key()) {
                Some(slot) => slot.1 = kv.value(),
                None => out.push((kv.key(), kv.value())),
            }
        }
        out
    }
}

impl Default for ProcEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ProcEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| KeyValue::new(k, v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::ProcEnv;

    #[test]
    fn env_new_is_empty() {
        let env = ProcEnv::new();
        assert!(env.is_empty());
        assert!(env.get("FOO").is_none());
    }

    #[test]
    fn env_push_and_override_last_wins() {
        let mut env = ProcEnv::new();
        env.push("FOO", "one");
        env.push("BAR", "x");
        env.push("FOO", "two");

        assert_eq!(env.get("FOO"), Some("two"));
        assert_eq!(env.get("BAR"), Some("x"));
        assert!(env.get("BAZ").is_none());
        assert_eq!(env.resolved(), vec![("FOO", "two"), ("BAR", "x")]);
    }

    #[test]
    fn env_set_replaces_all_entries() {
        let mut env = ProcEnv::new();
        env.push("FOO", "one");
        env.push("FOO", "two");
        env.set("FOO", "three");

        assert_eq!(env.len(), 1);
        assert_eq!(env.get("FOO"), Some("three"));
    }

    #[test]
    fn env_merged_other_overrides_base() {
        let base: ProcEnv = [("FOO", "base"), ("BAR", "bar")].into_iter().collect();
        let other: ProcEnv = [("FOO", "override"), ("BAZ", "baz")].into_iter().collect();

        let merged = base.merged(&other);

        assert_eq!(merged.get("FOO"), Some("override"));
        assert_eq!(merged.get("BAR"), Some("bar"));
        assert_eq!(merged.get("BAZ"), Some("baz"));
    }

    #[test]
    fn serde_transparent_json() {
        let env: ProcEnv = [("FOO", "bar")].into_iter().collect();

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"key\":\"FOO\""));
        assert!(json.contains("\"value\":\"bar\""));
    }
}
