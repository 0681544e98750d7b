//! Ordered placeholder maps with literal substitution.

/// Placeholder keys mapped to replacement values, in insertion order.
///
/// Keys are matched literally, braces included (`{name}`). Inserting an
/// existing key overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders(Vec<(String, String)>);

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Overlays `other` on top of `self`; `other` wins on collisions.
    pub fn merge(&mut self, other: &Placeholders) {
        for (key, value) in &other.0 {
            self.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces every key in order. Empty keys are skipped.
    pub fn apply(&self, input: &str) -> String {
        self.0
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .fold(input.to_string(), |acc, (key, value)| acc.replace(key, value))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Placeholders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut placeholders = Self::new();
        for (k, v) in iter {
            placeholders.insert(k, v);
        }
        placeholders
    }
}
