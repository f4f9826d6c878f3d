use std::collections::HashMap;

use common::config::CacheKind;

/// What the index needs from a postings cache. Every variant must return
/// records bit-exact with what storage would serve; the index serializes
/// calls behind a mutex, so implementations are single-threaded.
pub trait PostingsCache<V>: Send {
    fn find(&mut self, key: u64) -> Option<V>;
    fn insert(&mut self, key: u64, value: V);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn build_cache<V: Clone + Send + 'static>(
    kind: CacheKind,
    capacity: usize,
) -> Box<dyn PostingsCache<V>> {
    match kind {
        CacheKind::Splay => Box::new(SplayCache::with_capacity(capacity)),
        CacheKind::NoEvict => Box::new(NoEvictCache::new()),
    }
}

/// Unbounded map cache; appropriate when the working set of keys is known
/// to fit in memory.
#[derive(Debug, Default)]
pub struct NoEvictCache<V> {
    entries: HashMap<u64, V>,
}

impl<V> NoEvictCache<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone + Send> PostingsCache<V> for NoEvictCache<V> {
    fn find(&mut self, key: u64) -> Option<V> {
        self.entries.get(&key).cloned()
    }

    fn insert(&mut self, key: u64, value: V) {
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded cache over a splay tree. Lookup hits rotate the entry to the
/// root, so entries that have not been touched recently sink toward the
/// leaves; when the capacity is exceeded the deepest entry is evicted.
#[derive(Debug)]
pub struct SplayCache<V> {
    nodes: Vec<Node<V>>,
    free: Vec<usize>,
    root: Option<usize>,
    len: usize,
    capacity: usize,
}

#[derive(Debug)]
struct Node<V> {
    key: u64,
    value: Option<V>,
    left: Option<usize>,
    right: Option<usize>,
}

impl<V: Clone> SplayCache<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finds `key`, splaying it to the root on a hit.
    pub fn find(&mut self, key: u64) -> Option<V> {
        self.splay(key);
        match self.root {
            Some(root) if self.nodes[root].key == key => self.nodes[root].value.clone(),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: u64, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.splay(key);
        if let Some(root) = self.root {
            if self.nodes[root].key == key {
                self.nodes[root].value = Some(value);
                return;
            }
        }

        let node = self.allocate(key, value);
        match self.root {
            None => {}
            Some(root) => {
                if key < self.nodes[root].key {
                    self.nodes[node].left = self.nodes[root].left;
                    self.nodes[node].right = Some(root);
                    self.nodes[root].left = None;
                } else {
                    self.nodes[node].right = self.nodes[root].right;
                    self.nodes[node].left = Some(root);
                    self.nodes[root].right = None;
                }
            }
        }
        self.root = Some(node);
        self.len += 1;

        if self.len > self.capacity {
            self.evict_deepest();
        }
    }

    fn allocate(&mut self, key: u64, value: V) -> usize {
        let node = Node {
            key,
            value: Some(value),
            left: None,
            right: None,
        };
        if let Some(index) = self.free.pop() {
            self.nodes[index] = node;
            index
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    /// Top-down splay: after this the node with `key` (or the last node on
    /// its search path) is the root.
    fn splay(&mut self, key: u64) {
        let Some(mut current) = self.root else {
            return;
        };
        let mut left_tail: Option<usize> = None;
        let mut right_tail: Option<usize> = None;
        let mut left_root: Option<usize> = None;
        let mut right_root: Option<usize> = None;

        loop {
            if key < self.nodes[current].key {
                let Some(child) = self.nodes[current].left else {
                    break;
                };
                let mut child = child;
                if key < self.nodes[child].key {
                    // zig-zig: rotate right
                    self.nodes[current].left = self.nodes[child].right;
                    self.nodes[child].right = Some(current);
                    current = child;
                    match self.nodes[current].left {
                        Some(next) => child = next,
                        None => break,
                    }
                }
                // link current into the right tree
                match right_tail {
                    Some(tail) => self.nodes[tail].left = Some(current),
                    None => right_root = Some(current),
                }
                right_tail = Some(current);
                current = child;
            } else if key > self.nodes[current].key {
                let Some(child) = self.nodes[current].right else {
                    break;
                };
                let mut child = child;
                if key > self.nodes[child].key {
                    // zig-zig: rotate left
                    self.nodes[current].right = self.nodes[child].left;
                    self.nodes[child].left = Some(current);
                    current = child;
                    match self.nodes[current].right {
                        Some(next) => child = next,
                        None => break,
                    }
                }
                // link current into the left tree
                match left_tail {
                    Some(tail) => self.nodes[tail].right = Some(current),
                    None => left_root = Some(current),
                }
                left_tail = Some(current);
                current = child;
            } else {
                break;
            }
        }

        // reassemble
        let current_left = self.nodes[current].left;
        let current_right = self.nodes[current].right;
        match left_tail {
            Some(tail) => self.nodes[tail].right = current_left,
            None => left_root = current_left,
        }
        match right_tail {
            Some(tail) => self.nodes[tail].left = current_right,
            None => right_root = current_right,
        }
        self.nodes[current].left = left_root;
        self.nodes[current].right = right_root;
        self.root = Some(current);
    }

    /// Removes the deepest node. The deepest node is necessarily a leaf,
    /// and it is the one least recently rotated toward the root.
    fn evict_deepest(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        // (node, parent, depth) walk to find the deepest leaf
        let mut deepest = (root, None::<usize>, 0_usize);
        let mut stack = vec![(root, None::<usize>, 0_usize)];
        while let Some((node, parent, depth)) = stack.pop() {
            if depth > deepest.2 {
                deepest = (node, parent, depth);
            }
            if let Some(left) = self.nodes[node].left {
                stack.push((left, Some(node), depth + 1));
            }
            if let Some(right) = self.nodes[node].right {
                stack.push((right, Some(node), depth + 1));
            }
        }

        let (victim, parent, _) = deepest;
        match parent {
            Some(parent) => {
                if self.nodes[parent].left == Some(victim) {
                    self.nodes[parent].left = None;
                } else {
                    self.nodes[parent].right = None;
                }
            }
            None => self.root = None,
        }
        self.nodes[victim].value = None;
        self.free.push(victim);
        self.len -= 1;
    }
}

impl<V: Clone + Send> PostingsCache<V> for SplayCache<V> {
    fn find(&mut self, key: u64) -> Option<V> {
        SplayCache::find(self, key)
    }

    fn insert(&mut self, key: u64, value: V) {
        SplayCache::insert(self, key, value);
    }

    fn len(&self) -> usize {
        SplayCache::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_evict_cache_keeps_everything() {
        let mut cache = NoEvictCache::new();
        for key in 0_u64..100 {
            cache.insert(key, key * 2);
        }
        assert_eq!(PostingsCache::len(&cache), 100);
        assert_eq!(PostingsCache::find(&mut cache, 40), Some(80));
    }

    #[test]
    fn build_cache_respects_the_configured_kind() {
        let mut splay = build_cache::<u64>(CacheKind::Splay, 2);
        for key in 0..10 {
            splay.insert(key, key);
        }
        assert_eq!(splay.len(), 2, "splay cache honors its capacity");

        let mut unbounded = build_cache::<u64>(CacheKind::NoEvict, 2);
        for key in 0..10 {
            unbounded.insert(key, key);
        }
        assert_eq!(unbounded.len(), 10, "no-evict cache ignores capacity");
    }

    #[test]
    fn hit_returns_stored_value() {
        let mut cache = SplayCache::with_capacity(4);
        cache.insert(3, "three");
        cache.insert(1, "one");

        assert_eq!(cache.find(3), Some("three"));
        assert_eq!(cache.find(1), Some("one"));
        assert_eq!(cache.find(9), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut cache = SplayCache::with_capacity(4);
        cache.insert(5, 1);
        cache.insert(5, 2);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.find(5), Some(2));
    }

    #[test]
    fn capacity_is_bounded_and_recent_entries_survive() {
        let mut cache = SplayCache::with_capacity(3);
        for key in 0..3 {
            cache.insert(key, key);
        }
        // touch 0 so it is rotated to the root, then overflow
        assert_eq!(cache.find(0), Some(0));
        cache.insert(10, 10);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.find(0), Some(0), "recently rotated entry survives");
        assert_eq!(cache.find(10), Some(10), "newly inserted entry survives");
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = SplayCache::<u32>::with_capacity(0);
        cache.insert(1, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.find(1), None);
    }

    #[test]
    fn random_operations_agree_with_a_map_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(31);
        let mut cache = SplayCache::with_capacity(8);
        let mut model: HashMap<u64, u64> = HashMap::new();

        for _ in 0..2000 {
            let key = rng.gen_range(0..32_u64);
            if rng.gen_bool(0.5) {
                let value = rng.gen::<u64>();
                cache.insert(key, value);
                model.insert(key, value);
            } else if let Some(value) = cache.find(key) {
                // a hit must always agree with the last insert
                assert_eq!(model.get(&key), Some(&value));
            }
            assert!(cache.len() <= 8, "capacity bound holds");
        }
    }

    #[test]
    fn survives_many_mixed_operations() {
        let mut cache = SplayCache::with_capacity(16);
        for round in 0_u64..4 {
            for key in 0_u64..64 {
                cache.insert(key, key * 10 + round);
            }
        }
        assert_eq!(cache.len(), 16);
        let hits = (0_u64..64).filter(|&k| cache.find(k).is_some()).count();
        assert_eq!(hits, 16, "exactly capacity entries remain");
        for key in 0_u64..64 {
            if let Some(value) = cache.find(key) {
                assert_eq!(value, key * 10 + 3, "latest insert wins");
            }
        }
    }
}
