//! Ordered, multi-valued INI sections.
//!
//! pgBackRest reads options top to bottom and some options may repeat, so
//! both key order and repeated keys are kept exactly as written.

use std::collections::BTreeMap;
use std::fmt;

/// Key/value pairs of one section, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniMultiSet {
    entries: Vec<(String, String)>,
    // key -> positions in `entries`, ascending
    index: BTreeMap<String, Vec<usize>>,
}

impl IniMultiSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value, keeping any existing values of `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.index.entry(key.clone()).or_default().push(self.entries.len());
        self.entries.push((key, value.into()));
    }

    /// Replaces every value of `key` with `value`, at the position of the
    /// first existing value (or at the end).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let Some(positions) = self.index.get(&key) else {
            self.add(key, value);
            return;
        };

        let first = positions[0];
        self.entries[first].1 = value.into();
        if positions.len() > 1 {
            let drop: Vec<usize> = positions[1..].to_vec();
            let mut i = 0;
            self.entries.retain(|_| {
                let keep = !drop.contains(&i);
                i += 1;
                keep
            });
            self.reindex();
        }
    }

    /// Last value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .and_then(|p| p.last())
            .map(|&i| self.entries[i].1.as_str())
    }

    /// All values of `key`, in order.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.index
            .get(key)
            .map(|p| p.iter().map(|&i| self.entries[i].1.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (k, _)) in self.entries.iter().enumerate() {
            self.index.entry(k.clone()).or_default().push(i);
        }
    }
}

impl fmt::Display for IniMultiSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.entries {
            writeln!(f, "{k} = {v}")?;
        }
        Ok(())
    }
}

/// Named sections, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniSectionSet {
    sections: Vec<(String, IniMultiSet)>,
}

impl IniSectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The named section, created empty at the end when absent.
    pub fn section_mut(&mut self, name: &str) -> &mut IniMultiSet {
        let pos = match self.sections.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.sections.push((name.to_string(), IniMultiSet::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos].1
    }

    pub fn section(&self, name: &str) -> Option<&IniMultiSet> {
        self.sections.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(n, _)| n.as_str())
    }
}

/// Each non-empty section is written as a blank line, `[name]`, then its
/// `key = value` lines.
impl fmt::Display for IniSectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, section) in &self.sections {
            if section.is_empty() {
                continue;
            }
            write!(f, "\n[{name}]\n{section}")?;
        }
        Ok(())
    }
}
