//! Reader for snapshot files: open, validate, look up terms and search triples.
//!
//! The primary entry point is [`SnapshotFile`]. Term ids run from `1` to
//! [`SnapshotFile::n_terms`] in sorted string order, so comparing ids of one
//! file is the same as comparing their strings.
//!
//! ```no_run
//! use snapfile::SnapshotFile;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let f = Arc::new(SnapshotFile::open(Path::new("snapshot_0.snap")).expect("open"));
//! let p = f.term_id("<http://example.org/knows>").unwrap_or(0);
//! for [s, _, o] in f.search([0, p, 0]) {
//!     println!("{} {}", f.term(s).unwrap_or("?"), f.term(o).unwrap_or("?"));
//! }
//! ```

use std::{
    fmt, fs,
    path::Path,
    sync::{Arc, OnceLock},
};

use crate::header::{
    END_MAGIC, FLAG_ZSTD, Header, MAGIC, Section, SectionKind, TocEntry, crc32_ieee, parse_footer,
    parse_toc, read_u32, read_u64, read_uvarint, section_in_bounds,
};
use crate::order::TripleOrder;

/// Errors that can arise when parsing or validating a snapshot file.
#[derive(Debug)]
pub enum SnapError {
    /// Underlying I/O error.
    Io(std::io::Error),
    /// Structural problem with inputs or unsupported feature.
    Invalid(&'static str),
    /// The file failed an integrity or bounds check.
    Corrupt(String),
}

impl fmt::Display for SnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapError::Io(e) => write!(f, "{}", e),
            SnapError::Invalid(m) => write!(f, "{}", m),
            SnapError::Corrupt(m) => write!(f, "{}", m),
        }
    }
}
impl std::error::Error for SnapError {}
impl From<std::io::Error> for SnapError {
    fn from(e: std::io::Error) -> Self {
        SnapError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;

#[derive(Debug)]
enum Backing {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mmap(memmap2::Mmap),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v.as_slice(),
            #[cfg(feature = "mmap")]
            Backing::Mmap(m) => m,
        }
    }
}

/// Opened snapshot. Provides term lookups and pattern search.
#[derive(Debug)]
pub struct SnapshotFile {
    backing: Backing,
    header: Header,
    toc: Vec<TocEntry>,
    terms: TermDict,
    // one sorted, permuted copy of the triples per ordering; SPO is filled on open
    indexes: [OnceLock<Vec<[u64; 3]>>; 5],
}

impl SnapshotFile {
    #[inline]
    fn bytes(&self) -> &[u8] {
        self.backing.as_bytes()
    }

    /// Open and validate a snapshot file from disk.
    ///
    /// Performs bounds checks, TOC validation, and optional section/global CRCs.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_backing(Backing::Owned(data))
    }

    #[cfg(feature = "mmap")]
    /// Open and validate a snapshot file using `memmap2` for zero-copy term access.
    ///
    /// Enabled with the `mmap` feature.
    pub fn open_mmap(path: &Path) -> Result<Self> {
        let f = fs::File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }.map_err(SnapError::Io)?;
        Self::from_backing(Backing::Mmap(mmap))
    }

    fn from_backing(backing: Backing) -> Result<Self> {
        let data = backing.as_bytes();
        let header = Header::parse(data).ok_or(SnapError::Invalid("short or invalid header"))?;
        if &header.magic != MAGIC {
            return Err(SnapError::Invalid("bad magic"));
        }
        if header.toc_off_u64 as usize > data.len() {
            return Err(SnapError::Corrupt("TOC offset out of bounds".into()));
        }
        let toc =
            parse_toc(data, &header).ok_or_else(|| SnapError::Corrupt("TOC parse failed".into()))?;
        for e in &toc {
            if !section_in_bounds(data.len(), e.section) {
                return Err(SnapError::Corrupt(format!(
                    "section {:?} out of bounds",
                    e.kind
                )));
            }
            if e.crc32_u32 != 0 {
                let start = e.section.off as usize;
                let end = start + e.section.len as usize;
                if crc32_ieee(&data[start..end]) != e.crc32_u32 {
                    return Err(SnapError::Corrupt("section CRC mismatch".into()));
                }
            }
        }
        // Validate TOC ordering by offset and detect overlaps
        let mut spans: Vec<(u64, u64)> =
            toc.iter().map(|e| (e.section.off, e.section.len)).collect();
        spans.sort_by_key(|(off, _)| *off);
        for w in spans.windows(2) {
            let (a_off, a_len) = w[0];
            let (b_off, _) = w[1];
            if a_off + a_len > b_off {
                return Err(SnapError::Corrupt("TOC sections overlap or unsorted".into()));
            }
        }
        let need = |k: SectionKind| -> Result<Section> {
            toc.iter()
                .find(|e| e.kind == k)
                .map(|e| e.section)
                .ok_or(SnapError::Invalid("missing required section"))
        };
        let term_sec = need(SectionKind::TermDict)?;
        let triple_sec = need(SectionKind::Triples)?;

        // Footer/global CRC if present
        if let Some(footer_crc) = parse_footer(data, END_MAGIC) {
            let got = crc32_ieee(&data[..data.len() - 16]);
            if got != footer_crc {
                return Err(SnapError::Corrupt("global CRC mismatch".into()));
            }
        }

        let terms = TermDict::parse(data, term_sec)?;
        let spo = decode_triples(data, triple_sec, header.flags_u16)?;
        for t in &spo {
            if t.iter().any(|id| *id == 0 || *id > terms.n) {
                return Err(SnapError::Corrupt("triple references unknown term".into()));
            }
        }
        if spo.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SnapError::Corrupt("triples not sorted".into()));
        }

        let indexes: [OnceLock<Vec<[u64; 3]>>; 5] = std::array::from_fn(|_| OnceLock::new());
        let _ = indexes[TripleOrder::Spo.index()].set(spo);
        Ok(Self {
            backing,
            header,
            toc,
            terms,
            indexes,
        })
    }

    /// Returns the parsed file header.
    pub fn header(&self) -> &Header {
        &self.header
    }
    /// Returns the parsed table of contents (TOC).
    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }
    /// Creation time recorded by the writer (seconds since the epoch).
    pub fn created_unix(&self) -> u64 {
        self.header.created_unix64
    }

    /// Number of distinct terms. Valid ids are `1..=n_terms()`.
    pub fn n_terms(&self) -> u64 {
        self.terms.n
    }

    /// Number of triples.
    pub fn len(&self) -> usize {
        self.index(TripleOrder::Spo).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a term id to its string.
    pub fn term(&self, id: u64) -> Option<&str> {
        self.terms.get(self.bytes(), id)
    }

    /// Look up a term string; `None` if the snapshot does not contain it.
    pub fn term_id(&self, s: &str) -> Option<u64> {
        self.terms.find(self.bytes(), s)
    }

    /// Iterate all terms in id order.
    pub fn terms(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        (1..=self.terms.n).filter_map(move |id| self.term(id).map(|s| (id, s)))
    }

    /// True if the exact `(s, p, o)` triple is stored.
    pub fn contains(&self, spo: [u64; 3]) -> bool {
        self.index(TripleOrder::Spo).binary_search(&spo).is_ok()
    }

    /// The triples sorted under `order`, each stored as its permuted key.
    ///
    /// Orderings other than SPO are built on first use.
    pub fn index(&self, order: TripleOrder) -> &[[u64; 3]] {
        let spo = self.indexes[TripleOrder::Spo.index()].get_or_init(Vec::new);
        if order == TripleOrder::Spo {
            return spo;
        }
        self.indexes[order.index()].get_or_init(|| {
            let mut keys: Vec<[u64; 3]> = spo.iter().map(|t| order.permute(*t)).collect();
            keys.sort_unstable();
            keys
        })
    }

    fn range(&self, order: TripleOrder, pattern: [u64; 3]) -> (usize, usize) {
        let idx = self.index(order);
        let key = order.permute(pattern);
        let n = order.prefix_len(pattern);
        let start = idx.partition_point(|k| k[..n] < key[..n]);
        let end = idx.partition_point(|k| k[..n] <= key[..n]);
        (start, end)
    }

    /// Search for a pattern (`0` = unbound). Matches come back in the
    /// ordering chosen by [`TripleOrder::for_pattern`].
    pub fn search(self: &Arc<Self>, pattern: [u64; 3]) -> TripleIter {
        let order = TripleOrder::for_pattern(pattern);
        let (start, end) = self.range(order, pattern);
        TripleIter {
            file: Arc::clone(self),
            order,
            start,
            pos: start,
            end,
        }
    }

    /// Exact number of matches for `pattern`.
    pub fn exact_count(&self, pattern: [u64; 3]) -> usize {
        let (start, end) = self.range(TripleOrder::for_pattern(pattern), pattern);
        end - start
    }

    /// Cheap count estimate. Ranges are computed by binary search, so this
    /// is exact for this format.
    pub fn estimated_count(&self, pattern: [u64; 3]) -> usize {
        self.exact_count(pattern)
    }
}

/// Iterator over one contiguous run of an index.
#[derive(Debug, Clone)]
pub struct TripleIter {
    file: Arc<SnapshotFile>,
    order: TripleOrder,
    start: usize,
    pos: usize,
    end: usize,
}

impl TripleIter {
    /// Jump to the `offset`-th match of the search. Returns `false` if the
    /// offset lies past the last match.
    pub fn goto(&mut self, offset: usize) -> bool {
        self.pos = self.start.saturating_add(offset).min(self.end);
        self.pos < self.end
    }

    /// Total number of matches of the search, independent of the position.
    pub fn total(&self) -> usize {
        self.end - self.start
    }

    /// Ordering the results come back in.
    pub fn order(&self) -> TripleOrder {
        self.order
    }

    pub fn file(&self) -> &Arc<SnapshotFile> {
        &self.file
    }
}

impl Iterator for TripleIter {
    type Item = [u64; 3];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let key = self.file.index(self.order)[self.pos];
        self.pos += 1;
        Some(self.order.unpermute(key))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.pos;
        (n, Some(n))
    }
}

impl ExactSizeIterator for TripleIter {}

// ---------------- Term dictionary ----------------
#[derive(Debug, Clone, Copy)]
struct TermDict {
    n: u64,
    blob: Section,
    offs: Section,
}

impl TermDict {
    fn parse(data: &[u8], sec: Section) -> Result<Self> {
        let base = sec.off as usize;
        if sec.len < 32 {
            return Err(SnapError::Corrupt("short term dict header".into()));
        }
        let short = || SnapError::Corrupt("short term dict header".into());
        let n = read_u64(data, base).ok_or_else(short)?;
        let blob = Section {
            off: read_u64(data, base + 8).ok_or_else(short)?,
            len: read_u64(data, base + 16).ok_or_else(short)?,
        };
        let offs = Section {
            off: read_u64(data, base + 24).ok_or_else(short)?,
            len: n
                .checked_add(1)
                .and_then(|k| k.checked_mul(8))
                .ok_or_else(|| SnapError::Corrupt("term count overflow".into()))?,
        };
        if !section_in_bounds(data.len(), blob) || !section_in_bounds(data.len(), offs) {
            return Err(SnapError::Corrupt("term dict blob/offs OOB".into()));
        }
        let dict = TermDict { n, blob, offs };
        // offsets must be monotone and inside the blob
        let mut prev = 0u64;
        for i in 0..=n {
            let o = dict.offset(data, i).ok_or_else(short)?;
            if o < prev || o > blob.len {
                return Err(SnapError::Corrupt("term offsets not monotone".into()));
            }
            prev = o;
        }
        Ok(dict)
    }

    fn offset(&self, data: &[u8], i: u64) -> Option<u64> {
        read_u64(data, self.offs.off as usize + i as usize * 8)
    }

    fn get<'a>(&self, data: &'a [u8], id: u64) -> Option<&'a str> {
        if id == 0 || id > self.n {
            return None;
        }
        let s = self.offset(data, id - 1)? as usize;
        let e = self.offset(data, id)? as usize;
        let b = self.blob.off as usize;
        std::str::from_utf8(data.get(b + s..b + e)?).ok()
    }

    fn find(&self, data: &[u8], s: &str) -> Option<u64> {
        let (mut lo, mut hi) = (1u64, self.n + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(data, mid)?.cmp(s) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }
}

// ---------------- Triple section ----------------
fn decode_triples(data: &[u8], sec: Section, flags: u16) -> Result<Vec<[u64; 3]>> {
    let base = sec.off as usize;
    let end = base + sec.len as usize;
    if base + 5 > end {
        return Err(SnapError::Corrupt("triple header short".into()));
    }
    let enc = data[base];
    let raw_len = read_u32(data, base + 1).ok_or_else(|| SnapError::Corrupt("raw len".into()))?;
    let payload_start = base + 5;
    if payload_start + raw_len as usize > end {
        return Err(SnapError::Corrupt("raw len OOB".into()));
    }
    let payload = &data[payload_start..payload_start + raw_len as usize];
    match enc {
        0 => decode_raw_spo(payload),
        1 => {
            if flags & FLAG_ZSTD == 0 {
                return Err(SnapError::Corrupt("zstd block without header flag".into()));
            }
            #[cfg(feature = "zstd")]
            {
                let raw = zstd::decode_all(std::io::Cursor::new(payload))
                    .map_err(|_| SnapError::Corrupt("zstd decode".into()))?;
                decode_raw_spo(&raw)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(SnapError::Invalid("zstd feature not enabled"))
            }
        }
        _ => Err(SnapError::Corrupt("unknown block encoding".into())),
    }
}

/// Decode the run-length/delta SPO payload produced by the writer.
fn decode_raw_spo(raw: &[u8]) -> Result<Vec<[u64; 3]>> {
    let mut off = 0usize;
    let mut next = |what: &str| -> Result<u64> {
        let (v, o) = read_uvarint(raw, off).ok_or_else(|| SnapError::Corrupt(what.into()))?;
        off = o;
        Ok(v)
    };
    let n_s = next("nS")? as usize;
    let n_p = next("nP")? as usize;
    let n_t = next("nT")? as usize;
    if n_s > n_p || n_p > n_t || n_t > raw.len() {
        return Err(SnapError::Corrupt("run counts inconsistent".into()));
    }

    // S_vals (delta-coded ascending)
    let mut s_vals = Vec::with_capacity(n_s);
    let mut cur = 0u64;
    for i in 0..n_s {
        let d = next("S delta")?;
        cur = if i == 0 {
            d
        } else {
            cur.checked_add(d)
                .ok_or_else(|| SnapError::Corrupt("S overflow".into()))?
        };
        s_vals.push(cur);
    }
    // S_heads (prefix sums into P)
    let mut s_heads = Vec::with_capacity(n_s + 1);
    for _ in 0..=n_s {
        s_heads.push(next("S_heads")? as usize);
    }
    if s_heads.last().copied().unwrap_or(0) != n_p {
        return Err(SnapError::Corrupt("S_heads last != nP".into()));
    }
    // P_vals (delta-coded per S-run)
    let p_vals = decode_runs(&s_heads, n_p, &mut next, "P")?;
    // P_heads (prefix sums into O)
    let mut p_heads = Vec::with_capacity(n_p + 1);
    for _ in 0..=n_p {
        p_heads.push(next("P_heads")? as usize);
    }
    if p_heads.last().copied().unwrap_or(0) != n_t {
        return Err(SnapError::Corrupt("P_heads last != nT".into()));
    }
    // O_vals (delta-coded per (S,P)-run)
    let o_vals = decode_runs(&p_heads, n_t, &mut next, "O")?;

    let mut out = Vec::with_capacity(n_t);
    for si in 0..n_s {
        for pi in s_heads[si]..s_heads[si + 1] {
            for o in &o_vals[p_heads[pi]..p_heads[pi + 1]] {
                out.push([s_vals[si], p_vals[pi], *o]);
            }
        }
    }
    Ok(out)
}

fn decode_runs(
    heads: &[usize],
    total: usize,
    next: &mut impl FnMut(&str) -> Result<u64>,
    what: &str,
) -> Result<Vec<u64>> {
    let mut vals = vec![0u64; total];
    for w in heads.windows(2) {
        let (start, end) = (w[0], w[1]);
        if start > end || end > total {
            return Err(SnapError::Corrupt(format!("{what} run OOB")));
        }
        let mut cur = 0u64;
        for (i, v) in vals[start..end].iter_mut().enumerate() {
            let d = next(what)?;
            cur = if i == 0 {
                d
            } else {
                cur.checked_add(d)
                    .ok_or_else(|| SnapError::Corrupt(format!("{what} overflow")))?
            };
            *v = cur;
        }
    }
    Ok(vals)
}
