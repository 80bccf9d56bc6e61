use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::quota::{LimitPolicy, UsageSnapshot};

/// An authorized caller: its identity for the usage record plus the
/// metering inputs the quota gate reads. Both are optional so unmetered
/// deployments stay a pass-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub usage: Option<UsageSnapshot>,
    pub policy: Option<LimitPolicy>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            usage: None,
            policy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDenied {
    /// No credential was presented.
    MissingKey,
    /// A credential was presented but is not in the directory.
    UnknownKey,
}

impl std::fmt::Display for AuthDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthDenied::MissingKey => f.write_str("missing api key"),
            AuthDenied::UnknownKey => f.write_str("unknown api key"),
        }
    }
}

/// Maps a presented api key to a caller. Implementations decide whether
/// anonymous access is allowed.
pub trait CallerDirectory: Send + Sync {
    fn authorize(&self, api_key: Option<&str>) -> Result<Caller, AuthDenied>;
}

/// Open directory: every request is the anonymous caller, unmetered.
pub struct OpenDirectory;

impl CallerDirectory for OpenDirectory {
    fn authorize(&self, _api_key: Option<&str>) -> Result<Caller, AuthDenied> {
        Ok(Caller::anonymous())
    }
}

/// One caller entry in a keyed directory snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct CallerEntry {
    pub id: String,
    pub api_key: String,
    #[serde(default)]
    pub usage: Option<UsageSnapshot>,
    #[serde(default)]
    pub policy: Option<LimitPolicy>,
}

/// Keyed in-memory directory. The whole table swaps atomically so usage
/// refreshes from the accounting side never block request lookups.
pub struct MemoryDirectory {
    entries: ArcSwap<HashMap<String, Caller>>,
}

impl MemoryDirectory {
    pub fn new(entries: Vec<CallerEntry>) -> Self {
        let directory = Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
        };
        directory.replace(entries);
        directory
    }

    /// Replaces the directory contents with a fresh snapshot.
    pub fn replace(&self, entries: Vec<CallerEntry>) {
        let mut table = HashMap::with_capacity(entries.len());
        for entry in entries {
            table.insert(
                entry.api_key,
                Caller {
                    id: entry.id,
                    usage: entry.usage,
                    policy: entry.policy,
                },
            );
        }
        self.entries.store(Arc::new(table));
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl CallerDirectory for MemoryDirectory {
    fn authorize(&self, api_key: Option<&str>) -> Result<Caller, AuthDenied> {
        let key = api_key.ok_or(AuthDenied::MissingKey)?;
        self.entries
            .load()
            .get(key)
            .cloned()
            .ok_or(AuthDenied::UnknownKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, key: &str) -> CallerEntry {
        CallerEntry {
            id: id.to_string(),
            api_key: key.to_string(),
            usage: None,
            policy: None,
        }
    }

    #[test]
    fn open_directory_admits_anonymous() {
        let caller = OpenDirectory.authorize(None).unwrap();
        assert_eq!(caller.id, "anonymous");
        assert!(caller.usage.is_none());
    }

    #[test]
    fn memory_directory_requires_a_known_key() {
        let directory = MemoryDirectory::new(vec![entry("alice", "sk-alice")]);
        assert_eq!(directory.authorize(None), Err(AuthDenied::MissingKey));
        assert_eq!(
            directory.authorize(Some("sk-bob")),
            Err(AuthDenied::UnknownKey)
        );
        assert_eq!(directory.authorize(Some("sk-alice")).unwrap().id, "alice");
    }

    #[test]
    fn replace_swaps_the_whole_table() {
        let directory = MemoryDirectory::new(vec![entry("alice", "sk-alice")]);
        directory.replace(vec![entry("bob", "sk-bob")]);
        assert_eq!(directory.authorize(Some("sk-bob")).unwrap().id, "bob");
        assert_eq!(
            directory.authorize(Some("sk-alice")),
            Err(AuthDenied::UnknownKey)
        );
    }
}
