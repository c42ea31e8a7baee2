//! A bounded, TTL'd cache with a per-file invalidation index, shared by
//! every read-only tool so repeated lookups at the same position skip
//! re-querying the language server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
	value: V,
	expires_at: Instant,
}

struct Inner<K, V> {
	entries: HashMap<K, Entry<V>>,
	/// Earliest-inserted-first, for the "insertion above the size cap
	/// evicts one entry (the earliest-inserted is acceptable)" rule.
	insertion_order: VecDeque<K>,
	/// uri -> set of cache keys touched by results for that uri, so an edit
	/// can drop exactly the affected entries.
	file_index: HashMap<String, HashSet<K>>,
}

pub struct Cache<K, V> {
	inner: Mutex<Inner<K, V>>,
	max_entries: usize,
	ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> Cache<K, V> {
	pub fn new(max_entries: usize, ttl: Duration) -> Self {
		Self { inner: Mutex::new(Inner { entries: HashMap::new(), insertion_order: VecDeque::new(), file_index: HashMap::new() }), max_entries, ttl }
	}

	/// Looks up `key`. Expiration is sampled opportunistically here rather
	/// than via a background task.
	pub fn get(&self, key: &K) -> Option<V> {
		let mut inner = self.inner.lock();
		let now = Instant::now();
		if let Some(entry) = inner.entries.get(key) {
			if entry.expires_at > now {
				return Some(entry.value.clone());
			}
		}
		inner.entries.remove(key);
		None
	}

	/// Inserts `value` under `key`, indexing it by every uri in `uris` so a
	/// later `invalidate_uri` call can drop it precisely. Evicts the
	/// earliest-inserted entry if this insert would exceed `max_entries`.
	pub fn insert(&self, key: K, value: V, uris: impl IntoIterator<Item = String>) {
		let mut inner = self.inner.lock();
		let expires_at = Instant::now() + self.ttl;

		if !inner.entries.contains_key(&key) {
			inner.insertion_order.push_back(key.clone());
		}
		inner.entries.insert(key.clone(), Entry { value, expires_at });

		for uri in uris {
			inner.file_index.entry(uri).or_default().insert(key.clone());
		}

		while inner.entries.len() > self.max_entries {
			let Some(evict) = inner.insertion_order.pop_front() else { break };
			if inner.entries.remove(&evict).is_some() {
				for keys in inner.file_index.values_mut() {
					keys.remove(&evict);
				}
			}
		}
	}

	/// Drops every cache entry that was indexed under `uri` when inserted.
	pub fn invalidate_uri(&self, uri: &str) {
		let mut inner = self.inner.lock();
		let Some(keys) = inner.file_index.remove(uri) else { return };
		for key in keys {
			inner.entries.remove(&key);
			inner.insertion_order.retain(|k| k != &key);
		}
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_and_expires() {
		let cache: Cache<&'static str, i32> = Cache::new(10, Duration::from_millis(20));
		cache.insert("a", 1, ["file:///a.rs".to_string()]);
		assert_eq!(cache.get(&"a"), Some(1));
		std::thread::sleep(Duration::from_millis(30));
		assert_eq!(cache.get(&"a"), None);
	}

	#[test]
	fn invalidate_uri_drops_only_indexed_entries() {
		let cache: Cache<&'static str, i32> = Cache::new(10, Duration::from_secs(60));
		cache.insert("a", 1, ["file:///a.rs".to_string()]);
		cache.insert("b", 2, ["file:///b.rs".to_string()]);
		cache.invalidate_uri("file:///a.rs");
		assert_eq!(cache.get(&"a"), None);
		assert_eq!(cache.get(&"b"), Some(2));
	}

	#[test]
	fn eviction_drops_earliest_inserted_over_cap() {
		let cache: Cache<i32, i32> = Cache::new(2, Duration::from_secs(60));
		cache.insert(1, 1, []);
		cache.insert(2, 2, []);
		cache.insert(3, 3, []);
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get(&1), None);
		assert_eq!(cache.get(&3), Some(3));
	}
}
