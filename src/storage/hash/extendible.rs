use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use parking_lot::Mutex;

/// How many split rounds a single insert may trigger before the table gives
/// up and chains the entry onto the bucket's overflow list.
const MAX_SPLIT_ROUNDS: usize = 8;

/// Extendible hash table, generic over key, value and hasher.
///
/// A directory of `2^global_depth` slots maps the low bits of a key's hash
/// to a bucket; each bucket holds at most `array_size` pairs at a
/// `local_depth <= global_depth`. A full bucket is split (raising its local
/// depth) and the directory doubles whenever the splitting bucket's local
/// depth has caught up with the global depth. Pathological hash collisions
/// fall back to an overflow chain after a bounded number of split rounds.
///
/// All public operations serialize on one table-wide mutex.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    state: Mutex<TableState<K, V>>,
    hasher: S,
}

struct TableState<K, V> {
    global_depth: u32,
    /// Directory slot -> index into `buckets`. Buckets with
    /// `local_depth < global_depth` are shared by `2^(global-local)` slots.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    array_size: usize,
    len: usize,
}

struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
    overflow: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, array_size: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(array_size),
            overflow: Vec::new(),
        }
    }

    fn iter_all(&self) -> impl Iterator<Item = &(K, V)> {
        self.items.iter().chain(self.overflow.iter())
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table whose buckets hold up to `array_size` pairs.
    pub fn new(array_size: usize) -> Self {
        Self::with_hasher(array_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Create a table with an explicit hasher. Tests use this to pin a
    /// transparent hash so bucket placement is predictable.
    pub fn with_hasher(array_size: usize, hasher: S) -> Self {
        assert!(array_size > 0, "bucket array size must be positive");
        Self {
            state: Mutex::new(TableState {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket::new(0, array_size)],
                array_size,
                len: 0,
            }),
            hasher,
        }
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Insert a key/value pair. Inserting a key that is already present
    /// replaces its value.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_key(&key);
        let mut state = self.state.lock();

        for _ in 0..MAX_SPLIT_ROUNDS {
            let bucket_idx = state.bucket_for(hash);

            if state.replace_in(bucket_idx, &key, &value) {
                return;
            }
            if state.buckets[bucket_idx].items.len() < state.array_size {
                state.buckets[bucket_idx].items.push((key, value));
                state.len += 1;
                return;
            }

            // Full bucket: raise its local depth, doubling the directory
            // first when the depths have met.
            if state.buckets[bucket_idx].local_depth == state.global_depth {
                state.double_directory();
            }
            state.split_bucket(bucket_idx, |k| self.hash_one(k));
        }

        // Every key in this bucket collides on the discriminating bits.
        let bucket_idx = state.bucket_for(hash);
        if !state.replace_in(bucket_idx, &key, &value) {
            state.buckets[bucket_idx].overflow.push((key, value));
            state.len += 1;
        }
    }

    /// Look up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash_key(key);
        let state = self.state.lock();
        let bucket = &state.buckets[state.bucket_for(hash)];
        let result = bucket
            .iter_all()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone());
        result
    }

    /// Remove the entry stored under `key`. Buckets are never merged.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash_key(key);
        let mut state = self.state.lock();
        let bucket_idx = state.bucket_for(hash);
        let bucket = &mut state.buckets[bucket_idx];

        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            // Promote an overflow entry into the freed slot.
            if let Some(pair) = bucket.overflow.pop() {
                bucket.items.push(pair);
            }
            state.len -= 1;
            return true;
        }
        if let Some(pos) = bucket.overflow.iter().position(|(k, _)| k == key) {
            bucket.overflow.remove(pos);
            state.len -= 1;
            return true;
        }
        false
    }

    pub fn global_depth(&self) -> u32 {
        self.state.lock().global_depth
    }

    /// Local depth of the bucket behind the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let state = self.state.lock();
        state.buckets[state.directory[dir_index]].local_depth
    }

    /// Number of distinct buckets in the table.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash_one(&self, key: &K) -> u64 {
        self.hash_key(key)
    }
}

impl<K: Eq + Clone, V: Clone> TableState<K, V> {
    fn dir_mask(&self) -> u64 {
        (1u64 << self.global_depth) - 1
    }

    fn bucket_for(&self, hash: u64) -> usize {
        self.directory[(hash & self.dir_mask()) as usize]
    }

    fn replace_in(&mut self, bucket_idx: usize, key: &K, value: &V) -> bool {
        let bucket = &mut self.buckets[bucket_idx];
        for (k, v) in bucket.items.iter_mut().chain(bucket.overflow.iter_mut()) {
            if k == key {
                *v = value.clone();
                return true;
            }
        }
        false
    }

    /// Double the directory: every existing slot is mirrored into the new
    /// upper half, so each bucket is reachable through twice as many slots.
    fn double_directory(&mut self) {
        let old_len = self.directory.len();
        self.directory.extend_from_within(0..old_len);
        self.global_depth += 1;
    }

    /// Split the bucket at `bucket_idx` one level deeper, redistributing its
    /// entries on the newly discriminating hash bit and repointing the
    /// directory slots that now belong to the sibling.
    fn split_bucket(&mut self, bucket_idx: usize, hash: impl Fn(&K) -> u64) {
        let old_depth = self.buckets[bucket_idx].local_depth;
        debug_assert!(old_depth < self.global_depth);
        let split_bit = 1u64 << old_depth;

        let new_depth = old_depth + 1;
        self.buckets[bucket_idx].local_depth = new_depth;
        let sibling_idx = self.buckets.len();
        self.buckets
            .push(Bucket::new(new_depth, self.array_size));

        let mut pairs: Vec<(K, V)> = {
            let bucket = &mut self.buckets[bucket_idx];
            let mut all = std::mem::take(&mut bucket.items);
            all.append(&mut bucket.overflow);
            all
        };

        for pair in pairs.drain(..) {
            let target = if hash(&pair.0) & split_bit != 0 {
                sibling_idx
            } else {
                bucket_idx
            };
            let bucket = &mut self.buckets[target];
            if bucket.items.len() < self.array_size {
                bucket.items.push(pair);
            } else {
                bucket.overflow.push(pair);
            }
        }

        // Directory slots whose bit `old_depth` is set move to the sibling.
        for (slot_idx, slot) in self.directory.iter_mut().enumerate() {
            if *slot == bucket_idx && (slot_idx as u64) & split_bit != 0 {
                *slot = sibling_idx;
            }
        }
    }
}
