use std::collections::HashMap;

use crate::config::ConfigNode;

/// String interning table shared by both ends of a connection. Component and
/// field names that appear in it are written as a small index instead of text.
#[derive(Debug, Clone, Default)]
pub struct SerializationDictionary {
    strings: Vec<String>,
    indices: HashMap<String, usize>,
}

impl SerializationDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from a sequence of strings.
    pub fn from_config(node: &ConfigNode) -> Self {
        let mut dict = Self::new();
        if let Some(entries) = node.as_sequence() {
            for entry in entries {
                if let Some(value) = entry.as_str() {
                    dict.add_entry(value);
                }
            }
        }
        dict
    }

    pub fn add_entry(&mut self, value: impl Into<String>) {
        let index = self.strings.len();
        self.add_entry_at(index, value);
    }

    pub fn add_entry_at(&mut self, index: usize, value: impl Into<String>) {
        let value = value.into();
        if self.strings.len() <= index {
            self.strings.resize(index + 1, String::new());
        }
        if let Some(old) = self.strings.get(index) {
            if self.indices.get(old) == Some(&index) {
                self.indices.remove(old);
            }
        }
        self.indices.insert(value.clone(), index);
        self.strings[index] = value;
    }

    pub fn string_to_index(&self, value: &str) -> Option<usize> {
        self.indices.get(value).copied()
    }

    pub fn index_to_string(&self, index: usize) -> Option<&str> {
        self.strings
            .get(index)
            .filter(|s| self.indices.get(s.as_str()) == Some(&index))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
