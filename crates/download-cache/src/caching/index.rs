use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::SystemTime;

/// Metadata of one cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The backing file, owned by the cache.
    pub path: PathBuf,
    /// Size of the backing file in bytes.
    pub size: u64,
    /// Modification time of the backing file, used to rank entries for eviction.
    pub modified: SystemTime,
}

/// Eviction order: oldest modification time first, ties broken by the remote id.
type OrderKey = (SystemTime, String);

/// The in-memory index of all cached files.
///
/// Keeps a running total of all entry sizes and an ordered view of the entries for eviction.
#[derive(Debug, Default)]
pub(super) struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    order: BTreeSet<OrderKey>,
    total_size: u64,
}

impl CacheIndex {
    /// Inserts an entry, replacing and returning the previous entry for the same key.
    pub fn insert(&mut self, remote_id: String, entry: CacheEntry) -> Option<CacheEntry> {
        let previous = self.remove(&remote_id);
        self.total_size += entry.size;
        self.order.insert((entry.modified, remote_id.clone()));
        self.entries.insert(remote_id, entry);
        previous
    }

    pub fn remove(&mut self, remote_id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(remote_id)?;
        self.order.remove(&(entry.modified, remote_id.to_owned()));
        self.total_size -= entry.size;
        Some(entry)
    }

    pub fn get(&self, remote_id: &str) -> Option<&CacheEntry> {
        self.entries.get(remote_id)
    }

    /// The remote id of the entry that would be evicted first.
    pub fn oldest(&self) -> Option<&str> {
        self.order.first().map(|(_, remote_id)| remote_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.total_size = 0;
    }

    /// All entries in eviction order.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.order
            .iter()
            .filter_map(|(_, remote_id)| Some((remote_id.as_str(), self.entries.get(remote_id)?)))
    }

    /// Removes entries oldest first until the total size is at most `max_size`.
    ///
    /// At least one entry always remains, and the `protect`ed entry is never selected.
    /// Returns the removed entries in the order they were selected.
    pub fn take_victims(
        &mut self,
        max_size: u64,
        protect: Option<&str>,
    ) -> Vec<(String, CacheEntry)> {
        let mut victims = Vec::new();
        while self.total_size > max_size && self.entries.len() > 1 {
            let victim = self
                .order
                .iter()
                .map(|(_, remote_id)| remote_id)
                .find(|remote_id| Some(remote_id.as_str()) != protect)
                .cloned();
            let Some(remote_id) = victim else {
                break;
            };
            if let Some(entry) = self.remove(&remote_id) {
                victims.push((remote_id, entry));
            }
        }
        victims
    }
}
