//! # Concurrent Point Index
//!
//! Insert-only hash index shared by the growth workers of one step. Keys
//! hash into a fixed array of buckets; each bucket is a chain of entries
//! living in an append-only [`Arena`] and linked through atomic indices
//! (`index + 1`, with 0 meaning end of chain). New entries are appended to
//! the end of a chain with a single compare-and-swap. Values live in a second
//! arena so that [`ConcurrentPointIndex::store`] can swap them atomically.
//!
//! Nothing is ever removed; the whole index is dropped once its frontier
//! leaves the retention window.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::point::Point;
use crate::{Error, Result};

/// 32-bit mixing hash used to pick a bucket.
pub trait MixHash {
    fn mix_hash(&self) -> u32;
}

impl MixHash for Point {
    fn mix_hash(&self) -> u32 {
        Point::mix_hash(self)
    }
}

// ============================================================================
// Arena
// ============================================================================

const NB_SEGMENTS: usize = 32;

/// Append-only storage. Segment `s` holds `base << s` slots, so indices
/// never move and references stay valid for the arena's lifetime.
struct Arena<T> {
    base: usize,
    segments: [OnceLock<Box<[OnceLock<T>]>>; NB_SEGMENTS],
    next: AtomicUsize,
}

impl<T> Arena<T> {
    fn new(base: usize) -> Self {
        Self {
            base: base.max(1).next_power_of_two(),
            segments: std::array::from_fn(|_| OnceLock::new()),
            next: AtomicUsize::new(0),
        }
    }

    fn locate(&self, idx: usize) -> (usize, usize) {
        let q = idx / self.base + 1;
        let segment = (usize::BITS - 1 - q.leading_zeros()) as usize;
        let start = self.base * ((1 << segment) - 1);
        (segment, idx - start)
    }

    fn push(&self, value: T) -> Result<usize> {
        let idx = self.next.fetch_add(1, Ordering::AcqRel);
        let (segment, offset) = self.locate(idx);
        let Some(cell) = self.segments.get(segment) else {
            return Err(Error::CapacityExceeded(idx));
        };
        let slots = cell.get_or_init(|| (0..self.base << segment).map(|_| OnceLock::new()).collect());
        if slots[offset].set(value).is_err() {
            return Err(Error::Inconsistent(format!("arena slot {} written twice", idx)));
        }
        Ok(idx)
    }

    fn get(&self, idx: usize) -> Option<&T> {
        let (segment, offset) = self.locate(idx);
        self.segments.get(segment)?.get()?.get(offset)?.get()
    }

    fn len(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }
}

// ============================================================================
// ConcurrentPointIndex
// ============================================================================

struct Entry<K> {
    hash: u32,
    key: K,
    value: AtomicUsize,
    next: AtomicUsize,
}

/// Outcome of a single insertion.
enum Put<'a, V> {
    Inserted(&'a V),
    Existing(&'a V),
    Replaced(&'a V),
}

pub struct ConcurrentPointIndex<K, V> {
    buckets: Box<[AtomicUsize]>,
    mask: u32,
    entries: Arena<Entry<K>>,
    values: Arena<V>,
    len: AtomicUsize,
    conflicts: AtomicUsize,
    max_retries: usize,
}

impl<K, V> ConcurrentPointIndex<K, V>
where
    K: MixHash + Eq + Copy,
{
    /// Index sized for about `expected` keys, with at least `min_buckets`
    /// buckets. Bucket counts are rounded up to a power of two.
    pub fn new(expected: usize, min_buckets: usize, max_retries: usize) -> Self {
        let nb_buckets = expected.max(min_buckets).max(1).next_power_of_two().min(1 << 31);
        Self {
            buckets: (0..nb_buckets).map(|_| AtomicUsize::new(0)).collect(),
            mask: (nb_buckets - 1) as u32,
            entries: Arena::new(nb_buckets),
            values: Arena::new(nb_buckets),
            len: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
            max_retries,
        }
    }

    pub fn nb_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times a lookup walked past an entry with the same hash but
    /// a different key.
    pub fn hash_conflicts(&self) -> usize {
        self.conflicts.load(Ordering::Relaxed)
    }

    fn entry_at(&self, link: usize) -> Option<&Entry<K>> {
        link.checked_sub(1).and_then(|idx| self.entries.get(idx))
    }

    fn value_of(&self, entry: &Entry<K>) -> Result<&V> {
        let idx = entry.value.load(Ordering::Acquire);
        self.values
            .get(idx)
            .ok_or_else(|| Error::Inconsistent(format!("dangling value index {}", idx)))
    }

    pub fn load(&self, key: &K) -> Option<&V> {
        let hash = key.mix_hash();
        let mut link = self.buckets[(hash & self.mask) as usize].load(Ordering::Acquire);
        while let Some(entry) = self.entry_at(link) {
            if entry.hash == hash && entry.key == *key {
                return self.value_of(entry).ok();
            }
            link = entry.next.load(Ordering::Acquire);
        }
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        self.load(key).is_some()
    }

    /// Insert or overwrite. Returns the previous value if there was one.
    pub fn store(&self, key: K, value: V) -> Result<Option<&V>> {
        Ok(match self.put(key, value, true)? {
            Put::Replaced(old) => Some(old),
            Put::Inserted(_) | Put::Existing(_) => None,
        })
    }

    /// Insert if absent. Returns the value now in the index and whether it
    /// is the one just given.
    pub fn load_or_store(&self, key: K, value: V) -> Result<(&V, bool)> {
        Ok(match self.put(key, value, false)? {
            Put::Inserted(v) => (v, true),
            Put::Existing(v) | Put::Replaced(v) => (v, false),
        })
    }

    fn put(&self, key: K, value: V, overwrite: bool) -> Result<Put<'_, V>> {
        let hash = key.mix_hash();
        let mut pending = Some(value);
        let mut value_idx: Option<usize> = None;
        let mut entry_idx: Option<usize> = None;
        let mut attempts = 0;
        let mut link = &self.buckets[(hash & self.mask) as usize];

        loop {
            let current = link.load(Ordering::Acquire);
            let Some(entry) = self.entry_at(current) else {
                if current != 0 {
                    return Err(Error::Inconsistent(format!("dangling entry index {}", current - 1)));
                }
                let vi = self.stage_value(&mut pending, &mut value_idx)?;
                let ei = match entry_idx {
                    Some(ei) => ei,
                    None => {
                        let ei = self.entries.push(Entry {
                            hash,
                            key,
                            value: AtomicUsize::new(vi),
                            next: AtomicUsize::new(0),
                        })?;
                        entry_idx = Some(ei);
                        ei
                    }
                };
                if !self.append(link, current, ei, &mut attempts)? {
                    continue;
                }
                self.len.fetch_add(1, Ordering::AcqRel);
                return self
                    .values
                    .get(vi)
                    .map(Put::Inserted)
                    .ok_or_else(|| Error::Inconsistent(format!("dangling value index {}", vi)));
            };

            if entry.hash == hash {
                if entry.key == key {
                    if !overwrite {
                        return self.value_of(entry).map(Put::Existing);
                    }
                    let vi = self.stage_value(&mut pending, &mut value_idx)?;
                    let old = entry.value.swap(vi, Ordering::AcqRel);
                    return self
                        .values
                        .get(old)
                        .map(Put::Replaced)
                        .ok_or_else(|| Error::Inconsistent(format!("dangling value index {}", old)));
                }
                self.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            link = &entry.next;
        }
    }

    /// Link entry `entry` after a chain tail last seen holding `observed`.
    /// `Ok(false)` means another writer got there first and the caller must
    /// walk on from the same link; past `max_retries` lost races the call
    /// gives up with [`Error::Contention`].
    fn append(&self, tail: &AtomicUsize, observed: usize, entry: usize, attempts: &mut usize) -> Result<bool> {
        match tail.compare_exchange(observed, entry + 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(true),
            Err(_) => {
                *attempts += 1;
                if *attempts > self.max_retries {
                    tracing::warn!(attempts = *attempts, "point index contention");
                    return Err(Error::Contention { attempts: *attempts });
                }
                Ok(false)
            }
        }
    }

    fn stage_value(&self, pending: &mut Option<V>, staged: &mut Option<usize>) -> Result<usize> {
        if let Some(idx) = *staged {
            return Ok(idx);
        }
        let value = pending
            .take()
            .ok_or_else(|| Error::Inconsistent("value staged twice".into()))?;
        let idx = self.values.push(value)?;
        *staged = Some(idx);
        Ok(idx)
    }

    /// Sequential walk over every entry, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.buckets.iter().flat_map(move |bucket| {
            std::iter::successors(self.entry_at(bucket.load(Ordering::Acquire)), move |e| {
                self.entry_at(e.next.load(Ordering::Acquire))
            })
            .filter_map(move |e| Some((&e.key, self.value_of(e).ok()?)))
        })
    }

    /// Arena slots used so far, including the ones orphaned by lost races.
    pub fn allocated(&self) -> (usize, usize) {
        (self.entries.len(), self.values.len())
    }
}

impl<K, V> ConcurrentPointIndex<K, V>
where
    K: MixHash + Eq + Copy + Send + Sync,
    V: Send + Sync,
{
    /// Call `f` on every entry from `nb_workers` rayon tasks, each owning a
    /// contiguous run of buckets (the last one takes the remainder). The
    /// first error stops all workers and is returned.
    pub fn range<F>(&self, nb_workers: usize, f: F) -> Result<()>
    where
        F: Fn(&K, &V) -> Result<()> + Sync,
    {
        let nb_workers = nb_workers.clamp(1, self.buckets.len());
        let chunk = self.buckets.len() / nb_workers;
        let cancel = AtomicBool::new(false);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        let fail = |e: Error| {
            cancel.store(true, Ordering::Release);
            first_error.lock().get_or_insert(e);
        };

        (0..nb_workers).into_par_iter().for_each(|worker| {
            let start = worker * chunk;
            let end = if worker == nb_workers - 1 { self.buckets.len() } else { start + chunk };
            for bucket in &self.buckets[start..end] {
                let mut link = bucket.load(Ordering::Acquire);
                while let Some(entry) = self.entry_at(link) {
                    if cancel.load(Ordering::Acquire) {
                        return;
                    }
                    let outcome = self.value_of(entry).and_then(|v| f(&entry.key, v));
                    if let Err(e) = outcome {
                        fail(e);
                        return;
                    }
                    link = entry.next.load(Ordering::Acquire);
                }
            }
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<K, V> std::fmt::Debug for ConcurrentPointIndex<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentPointIndex")
            .field("buckets", &self.buckets.len())
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("conflicts", &self.conflicts.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicU32;

    /// Key whose hash collides on purpose.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Colliding(u32);

    impl MixHash for Colliding {
        fn mix_hash(&self) -> u32 {
            7
        }
    }

    #[test]
    fn test_arena_segments() {
        let arena: Arena<usize> = Arena::new(4);
        assert_eq!(arena.locate(0), (0, 0));
        assert_eq!(arena.locate(3), (0, 3));
        assert_eq!(arena.locate(4), (1, 0));
        assert_eq!(arena.locate(11), (1, 7));
        assert_eq!(arena.locate(12), (2, 0));
        for i in 0..100 {
            assert_eq!(arena.push(i * 10).unwrap(), i);
        }
        assert_eq!(arena.get(57), Some(&570));
        assert_eq!(arena.get(100), None);
    }

    #[test]
    fn test_load_or_store() {
        let index: ConcurrentPointIndex<Point, &str> = ConcurrentPointIndex::new(8, 4, 10);
        let p = Point::new(3, 0, -3);
        assert!(index.load(&p).is_none());
        assert_eq!(index.load_or_store(p, "first").unwrap(), (&"first", true));
        assert_eq!(index.load_or_store(p, "second").unwrap(), (&"first", false));
        assert_eq!(index.len(), 1);
        assert_eq!(index.load(&p), Some(&"first"));
    }

    #[test]
    fn test_store_overwrites() {
        let index: ConcurrentPointIndex<Point, u32> = ConcurrentPointIndex::new(8, 4, 10);
        let p = Point::new(1, 2, 3);
        assert_eq!(index.store(p, 1).unwrap(), None);
        assert_eq!(index.store(p, 2).unwrap(), Some(&1));
        assert_eq!(index.load(&p), Some(&2));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_hash_conflicts_are_counted() {
        let index: ConcurrentPointIndex<Colliding, u32> = ConcurrentPointIndex::new(4, 4, 10);
        for i in 0..5 {
            index.load_or_store(Colliding(i), i).unwrap();
        }
        assert_eq!(index.len(), 5);
        // The i-th insert walks past i entries with the same hash.
        assert_eq!(index.hash_conflicts(), 0 + 1 + 2 + 3 + 4);
        for i in 0..5 {
            assert_eq!(index.load(&Colliding(i)), Some(&i));
        }
        assert!(index.load(&Colliding(9)).is_none());
    }

    #[test]
    fn test_concurrent_inserts_keep_one_winner() {
        let index: ConcurrentPointIndex<Point, usize> = ConcurrentPointIndex::new(64, 16, 1000);
        let wins = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for t in 0..8 {
                let index = &index;
                let wins = &wins;
                s.spawn(move || {
                    for i in 0..500 {
                        let p = Point::new(i % 50, i / 50, 0);
                        if let Ok((_, true)) = index.load_or_store(p, t) {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        assert_eq!(index.len(), 500);
        assert_eq!(wins.load(Ordering::Relaxed), 500);
        assert_eq!(index.iter().count(), 500);
    }

    #[test]
    fn test_range_visits_everything() {
        let index: ConcurrentPointIndex<Point, i32> = ConcurrentPointIndex::new(100, 8, 10);
        for x in 0..100 {
            index.load_or_store(Point::new(x, -x, 0), x).unwrap();
        }
        let sum = AtomicU32::new(0);
        let seen = Mutex::new(BTreeSet::new());
        index
            .range(6, |p, v| {
                sum.fetch_add(*v as u32, Ordering::Relaxed);
                seen.lock().insert(p.x());
                Ok(())
            })
            .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), (0..100).sum::<u32>());
        assert_eq!(seen.into_inner().len(), 100);
    }

    /// Key hashed to itself, so bucket `k % nb_buckets` holds it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Slot(u32);

    impl MixHash for Slot {
        fn mix_hash(&self) -> u32 {
            self.0
        }
    }

    /// 16 buckets, three entries each: bucket `b` chains `b`, `b + 16`, `b + 32`.
    fn slotted() -> ConcurrentPointIndex<Slot, u32> {
        let index = ConcurrentPointIndex::new(16, 16, 10);
        for k in 0..48 {
            index.load_or_store(Slot(k), k).unwrap();
        }
        assert_eq!(index.nb_buckets(), 16);
        index
    }

    fn one_thread<R: Send>(f: impl FnOnce() -> R + Send) -> R {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap().install(f)
    }

    #[test]
    fn test_single_worker_stops_at_failing_entry() {
        let index = slotted();
        let order: Vec<u32> = index.iter().map(|(_, v)| *v).collect();
        let visited = Mutex::new(Vec::new());
        let res = index.range(1, |k, _| {
            visited.lock().push(k.0);
            if k.0 == 21 {
                return Err(Error::Growth("stop".into()));
            }
            Ok(())
        });
        assert!(matches!(res, Err(Error::Growth(msg)) if msg == "stop"));
        let stop = order.iter().position(|v| *v == 21).unwrap();
        assert_eq!(visited.into_inner(), order[..=stop].to_vec());
    }

    #[test]
    fn test_failure_cancels_other_workers() {
        let index = slotted();
        let visited = Mutex::new(Vec::new());
        // One thread runs the workers in order, so workers 1..4 start after
        // worker 0 has failed on its very first entry.
        let res = one_thread(|| {
            index.range(4, |k, _| {
                visited.lock().push(k.0);
                if k.0 == 0 {
                    return Err(Error::Growth("worker 0".into()));
                }
                Ok(())
            })
        });
        assert!(matches!(res, Err(Error::Growth(msg)) if msg == "worker 0"));
        assert_eq!(visited.into_inner(), vec![0]);
    }

    #[test]
    fn test_only_first_error_is_reported() {
        let index = slotted();
        let res = one_thread(|| {
            index.range(4, |k, _| match k.0 {
                0 => Err(Error::Growth("first".into())),
                8 => Err(Error::Growth("second".into())),
                _ => Ok(()),
            })
        });
        assert!(matches!(res, Err(Error::Growth(msg)) if msg == "first"));

        // With every entry failing, each worker stops at its first entry and
        // the reported error is one of theirs.
        let visited = Mutex::new(BTreeSet::new());
        let res = index.range(4, |k, _| {
            visited.lock().insert(k.0);
            Err(Error::Growth(k.0.to_string()))
        });
        let visited = visited.into_inner();
        assert!(visited.len() <= 4);
        match res {
            Err(Error::Growth(msg)) => assert!(visited.contains(&msg.parse::<u32>().unwrap())),
            other => panic!("expected a growth error, got {:?}", other),
        }
    }

    #[test]
    fn test_append_gives_up_after_max_retries() {
        let index: ConcurrentPointIndex<Slot, u32> = ConcurrentPointIndex::new(4, 4, 2);
        // The tail moved on to entry 4 since it was read as empty.
        let tail = AtomicUsize::new(5);
        let mut attempts = 0;
        assert!(!index.append(&tail, 0, 0, &mut attempts).unwrap());
        assert!(!index.append(&tail, 0, 0, &mut attempts).unwrap());
        match index.append(&tail, 0, 0, &mut attempts) {
            Err(Error::Contention { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected contention, got {:?}", other),
        }
        assert_eq!(tail.load(Ordering::Acquire), 5);

        let mut attempts = 0;
        assert!(index.append(&tail, 5, 8, &mut attempts).unwrap());
        assert_eq!(tail.load(Ordering::Acquire), 9);
        assert_eq!(attempts, 0);
    }

    #[test]
    fn test_zero_retries_gives_up_on_first_lost_race() {
        let index: ConcurrentPointIndex<Slot, u32> = ConcurrentPointIndex::new(4, 4, 0);
        let tail = AtomicUsize::new(1);
        let mut attempts = 0;
        assert!(matches!(
            index.append(&tail, 0, 3, &mut attempts),
            Err(Error::Contention { attempts: 1 })
        ));
    }

    #[test]
    fn test_range_on_empty_index() {
        let index: ConcurrentPointIndex<Point, i32> = ConcurrentPointIndex::new(0, 1, 10);
        assert!(index.is_empty());
        index.range(8, |_, _| Err(Error::Growth("never".into()))).unwrap();
    }
}
