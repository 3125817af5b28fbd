//! Persistent sorted maps keyed by permuted triples.
//!
//! Each [`SortedTree`] keeps its entries in a `BTreeMap` and persists them to
//! one `.vtt` file. The file layout is:
//!
//! ```text
//! magic "VTRE" | version u16 | uvarint n | n * (3 uvarint key, value) | crc u32 | "VTREE_ENDMRK"
//! ```
//!
//! Keys are stored in ascending order, so the first component is delta coded
//! against the previous key.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error};
use snapfile::header::{crc32_ieee, parse_footer, push_footer, push_uvarint, read_uvarint};

use crate::errors::{Error, Result};

const TREE_MAGIC: &[u8; 4] = b"VTRE";
const TREE_END_MAGIC: &[u8; 12] = b"VTREE_ENDMRK";
const TREE_VERSION: u16 = 1;

pub type Key = [u64; 3];

/// Values stored in a [`SortedTree`].
pub trait TreeValue: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn encode(&self, out: &mut Vec<u8>);
    /// Decode a value at `off`, returning it with the next offset.
    fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)>;
}

/// Signed values are zig-zag coded.
pub fn push_ivarint(v: i64, out: &mut Vec<u8>) {
    push_uvarint(((v << 1) ^ (v >> 63)) as u64, out);
}

pub fn read_ivarint(buf: &[u8], off: usize) -> Option<(i64, usize)> {
    let (u, off) = read_uvarint(buf, off)?;
    Some((((u >> 1) as i64) ^ -((u & 1) as i64), off))
}

#[derive(Debug)]
pub struct SortedTree<V: TreeValue> {
    path: Option<PathBuf>,
    map: RwLock<BTreeMap<Key, V>>,
    read_only: bool,
    dirty: AtomicBool,
}

impl<V: TreeValue> SortedTree<V> {
    /// A tree that is never written to disk.
    pub fn in_memory() -> Self {
        SortedTree {
            path: None,
            map: RwLock::new(BTreeMap::new()),
            read_only: false,
            dirty: AtomicBool::new(false),
        }
    }

    /// Open the tree stored at `path`, or an empty one if the file is missing.
    pub fn open(path: impl Into<PathBuf>, read_only: bool) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let buf = std::fs::read(&path)?;
            decode_tree(&buf).map_err(|e| Error::Corrupt(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        debug!("opened tree {} with {} keys", path.display(), map.len());
        Ok(SortedTree {
            path: Some(path),
            map: RwLock::new(map),
            read_only,
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Key, V>>> {
        self.map
            .read()
            .map_err(|_| Error::Corrupt("tree lock poisoned".into()))
    }

    /// Write guard for a batch of mutations. Marks the tree dirty.
    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Key, V>>> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let guard = self
            .map
            .write()
            .map_err(|_| Error::Corrupt("tree lock poisoned".into()))?;
        self.dirty.store(true, Ordering::Release);
        Ok(guard)
    }

    pub fn get(&self, key: &Key) -> Option<V> {
        self.read().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: Key, value: V) -> Result<()> {
        self.write()?.insert(key, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the tree if it changed since the last flush.
    pub fn flush(&self) -> Result<()> {
        if self.read_only || !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        let buf = encode_tree(&*self.read()?);
        let tmp = path.with_extension("vtt.tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, path)?;
        self.dirty.store(false, Ordering::Release);
        debug!("flushed {} ({} bytes)", path.display(), buf.len());
        Ok(())
    }
}

impl<V: TreeValue> Drop for SortedTree<V> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            error!("Failed to flush tree on drop: {err}");
        }
    }
}

fn encode_tree<V: TreeValue>(map: &BTreeMap<Key, V>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + map.len() * 8);
    buf.extend_from_slice(TREE_MAGIC);
    buf.extend_from_slice(&TREE_VERSION.to_le_bytes());
    push_uvarint(map.len() as u64, &mut buf);
    let mut prev = 0u64;
    for (key, value) in map {
        push_uvarint(key[0] - prev, &mut buf);
        push_uvarint(key[1], &mut buf);
        push_uvarint(key[2], &mut buf);
        prev = key[0];
        value.encode(&mut buf);
    }
    push_footer(&mut buf, TREE_END_MAGIC);
    buf
}

fn decode_tree<V: TreeValue>(buf: &[u8]) -> std::result::Result<BTreeMap<Key, V>, &'static str> {
    let crc = parse_footer(buf, TREE_END_MAGIC).ok_or("missing footer")?;
    let body = &buf[..buf.len() - 16];
    if crc32_ieee(body) != crc {
        return Err("crc mismatch");
    }
    if body.len() < 6 || &body[0..4] != TREE_MAGIC {
        return Err("bad magic");
    }
    if u16::from_le_bytes([body[4], body[5]]) != TREE_VERSION {
        return Err("unsupported version");
    }
    let (n, mut off) = read_uvarint(body, 6).ok_or("truncated count")?;
    let mut map = BTreeMap::new();
    let mut prev = 0u64;
    for _ in 0..n {
        let (d0, o) = read_uvarint(body, off).ok_or("truncated key")?;
        let (k1, o) = read_uvarint(body, o).ok_or("truncated key")?;
        let (k2, o) = read_uvarint(body, o).ok_or("truncated key")?;
        let (value, o) = V::decode(body, o).ok_or("truncated value")?;
        let k0 = prev.checked_add(d0).ok_or("key overflow")?;
        prev = k0;
        map.insert([k0, k1, k2], value);
        off = o;
    }
    if off != body.len() {
        return Err("trailing bytes");
    }
    Ok(map)
}

/// A position in a [`SortedTree`]. Each move takes the tree's read lock
/// for the duration of one lookup.
#[derive(Debug)]
pub struct TreeCursor<V: TreeValue> {
    tree: Arc<SortedTree<V>>,
    current: Option<(Key, V)>,
}

impl<V: TreeValue> TreeCursor<V> {
    /// A cursor positioned on the first entry.
    pub fn new(tree: Arc<SortedTree<V>>) -> Self {
        let mut cursor = TreeCursor {
            tree,
            current: None,
        };
        cursor.jump(&[0, 0, 0]);
        cursor
    }

    fn seek(&mut self, lower: Bound<&Key>, upper: Bound<&Key>, back: bool) -> bool {
        self.current = self.tree.read().ok().and_then(|map| {
            let mut range = map.range::<Key, _>((lower, upper));
            let entry = if back { range.next_back() } else { range.next() };
            entry.map(|(k, v)| (*k, v.clone()))
        });
        self.current.is_some()
    }

    /// Position on the first key `>= key`.
    pub fn jump(&mut self, key: &Key) -> bool {
        self.seek(Bound::Included(key), Bound::Unbounded, false)
    }

    /// Position on the last key `<= key`.
    pub fn jump_back(&mut self, key: &Key) -> bool {
        self.seek(Bound::Unbounded, Bound::Included(key), true)
    }

    /// Position on the last key of the tree.
    pub fn last(&mut self) -> bool {
        self.seek(Bound::Unbounded, Bound::Unbounded, true)
    }

    pub fn step(&mut self) -> bool {
        match self.current.take() {
            Some((k, _)) => self.seek(Bound::Excluded(&k), Bound::Unbounded, false),
            None => false,
        }
    }

    pub fn step_back(&mut self) -> bool {
        match self.current.take() {
            Some((k, _)) => self.seek(Bound::Unbounded, Bound::Excluded(&k), true),
            None => false,
        }
    }

    pub fn get(&self) -> Option<&(Key, V)> {
        self.current.as_ref()
    }

    pub fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(k, _)| k)
    }

    pub fn tree(&self) -> &Arc<SortedTree<V>> {
        &self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl TreeValue for u64 {
        fn encode(&self, out: &mut Vec<u8>) {
            push_uvarint(*self, out);
        }

        fn decode(buf: &[u8], off: usize) -> Option<(Self, usize)> {
            read_uvarint(buf, off)
        }
    }

    #[test]
    fn cursor_moves() {
        let tree = Arc::new(SortedTree::<u64>::in_memory());
        for (i, k) in [[1, 1, 1], [1, 2, 3], [4, 0, 9]].iter().enumerate() {
            tree.insert(*k, i as u64).unwrap();
        }
        let mut c = TreeCursor::new(Arc::clone(&tree));
        assert_eq!(c.key(), Some(&[1, 1, 1]));
        assert!(c.jump(&[1, 2, 0]));
        assert_eq!(c.get(), Some(&([1, 2, 3], 1)));
        assert!(c.step());
        assert_eq!(c.key(), Some(&[4, 0, 9]));
        assert!(!c.step());
        assert!(c.jump_back(&[4, 0, 0]));
        assert_eq!(c.key(), Some(&[1, 2, 3]));
        assert!(c.step_back());
        assert!(!c.step_back());
        assert!(c.last());
        assert_eq!(c.key(), Some(&[4, 0, 9]));
    }

    #[test]
    fn persist_and_detect_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.vtt");
        {
            let tree = SortedTree::<u64>::open(&path, false).unwrap();
            tree.insert([3, 1, 2], 7).unwrap();
            tree.insert([1 << 63, 5, 1], 300).unwrap();
        }
        let tree = SortedTree::<u64>::open(&path, true).unwrap();
        assert_eq!(tree.get(&[3, 1, 2]), Some(7));
        assert_eq!(tree.get(&[1 << 63, 5, 1]), Some(300));
        assert!(matches!(tree.insert([1, 1, 1], 1), Err(Error::ReadOnly)));

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[7] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SortedTree::<u64>::open(&path, true),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn zigzag() {
        for v in [-1i64, 0, 1, -300, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            push_ivarint(v, &mut buf);
            assert_eq!(read_ivarint(&buf, 0), Some((v, buf.len())));
        }
    }
}
