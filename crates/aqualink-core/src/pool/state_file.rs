//! Pool state file
//!
//! Format: `key = value` per line, `#` starts a comment. String values may
//! be quoted with `'` or `"`. Unknown keys are kept but ignored.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Parsed state file, entries kept in order of appearance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFile {
    entries: Vec<(String, String)>,
    map: HashMap<String, String>,
}

impl StateFile {
    /// Create an empty state file
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse state from a string; malformed lines are skipped
    pub fn parse(content: &str) -> Self {
        let mut state = StateFile::new();
        for line in content.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            state.set(key, unquote(value.trim()));
        }
        state
    }

    /// Load state from a file
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let content = match String::from_utf8(bytes.clone()) {
            Ok(s) => s,
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        };
        Ok(Self::parse(&content))
    }

    /// Save state to a file, creating its directory if needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_string())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Get as i32
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.map.get(key).and_then(|v| v.parse().ok())
    }

    /// Set a value, keeping the position of an existing key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value.clone(),
            None => self.entries.push((key.clone(), value.clone())),
        }
        self.map.insert(key, value);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for StateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# aqualink pool state")?;
        for (key, value) in &self.entries {
            if value.parse::<i64>().is_ok() {
                writeln!(f, "{} = {}", key, value)?;
            } else {
                writeln!(f, "{} = '{}'", key, value.replace('\'', ""))?;
            }
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner.to_string();
        }
    }
    value.to_string()
}
