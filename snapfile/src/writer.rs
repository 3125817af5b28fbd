use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::header::{
    END_MAGIC, FLAG_ZSTD, Header, MAGIC, Section, SectionKind, TocEntry, VERSION, crc32_ieee,
    encode_toc_entry, push_footer, push_uvarint,
};
use crate::reader::{Result, SnapError};

/// Options controlling file emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Compress the triple section using zstd (requires `zstd` feature).
    pub zstd: bool,
    /// Compute and embed per-section CRCs (TOC) and a global footer CRC.
    pub with_crc: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            zstd: false,
            with_crc: true,
        }
    }
}

/// Convenience helper to write a `.snap` file with default options.
///
/// ```no_run
/// let triples = vec![("<http://ex/a>".to_string(), "<http://ex/p>".to_string(), "\"x\"".to_string())];
/// snapfile::write_file("snapshot_0.snap", &triples).unwrap();
/// ```
pub fn write_file<P: AsRef<Path>>(path: P, triples: &[(String, String, String)]) -> Result<()> {
    let mut w = SnapshotWriter::new(path.as_ref(), WriterOptions::default());
    for (s, p, o) in triples {
        w.add(s, p, o)?;
    }
    w.finalize()
}

/// Builder that interns terms as triples arrive and writes the file on
/// [`SnapshotWriter::finalize`].
///
/// Terms are renumbered in sorted string order at finalize time, triples are
/// sorted and deduplicated. The file is written to a temporary sibling and
/// renamed into place.
#[derive(Debug)]
pub struct SnapshotWriter {
    opts: WriterOptions,
    path: PathBuf,
    term_map: HashMap<String, u32>,
    term_vec: Vec<String>,
    triples: Vec<(u32, u32, u32)>,
}

impl SnapshotWriter {
    /// Create a writer targeting `path` with `opts`.
    pub fn new<P: Into<PathBuf>>(path: P, opts: WriterOptions) -> Self {
        Self {
            opts,
            path: path.into(),
            term_map: HashMap::new(),
            term_vec: Vec::new(),
            triples: Vec::new(),
        }
    }

    fn intern_term(&mut self, t: &str) -> Result<u32> {
        if let Some(&v) = self.term_map.get(t) {
            return Ok(v);
        }
        let v = u32::try_from(self.term_vec.len())
            .map_err(|_| SnapError::Invalid("too many terms"))?;
        self.term_vec.push(t.to_string());
        self.term_map.insert(t.to_string(), v);
        Ok(v)
    }

    /// Add one triple. Empty terms are rejected since id 0 is the wildcard.
    pub fn add(&mut self, s: &str, p: &str, o: &str) -> Result<()> {
        if s.is_empty() || p.is_empty() || o.is_empty() {
            return Err(SnapError::Invalid("empty term"));
        }
        let s = self.intern_term(s)?;
        let p = self.intern_term(p)?;
        let o = self.intern_term(o)?;
        self.triples.push((s, p, o));
        Ok(())
    }

    /// Number of triples added so far (before deduplication).
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Finish building and write the file to disk.
    pub fn finalize(self) -> Result<()> {
        // sorted string order -> id 1..=n
        let mut order: Vec<u32> = (0..self.term_vec.len() as u32).collect();
        order.sort_unstable_by(|a, b| self.term_vec[*a as usize].cmp(&self.term_vec[*b as usize]));
        let mut remap = vec![0u64; self.term_vec.len()];
        for (rank, old) in order.iter().enumerate() {
            remap[*old as usize] = rank as u64 + 1;
        }
        let sorted_terms: Vec<&str> = order
            .iter()
            .map(|i| self.term_vec[*i as usize].as_str())
            .collect();

        let mut spo: Vec<(u64, u64, u64)> = self
            .triples
            .iter()
            .map(|(s, p, o)| (remap[*s as usize], remap[*p as usize], remap[*o as usize]))
            .collect();
        spo.sort_unstable();
        spo.dedup();

        let mut file = vec![0u8; 32];
        let mut toc: Vec<TocEntry> = Vec::new();

        let term_sec = write_term_dict(&mut file, &sorted_terms)?;
        toc.push(TocEntry {
            kind: SectionKind::TermDict,
            section: term_sec,
            crc32_u32: 0,
        });

        let tb_off = file.len();
        let raw = build_raw_spo(&spo)?;
        if self.opts.zstd {
            #[cfg(feature = "zstd")]
            {
                file.push(1u8);
                let compressed = zstd::encode_all(&raw[..], 0)
                    .map_err(|_| SnapError::Corrupt("zstd encode".into()))?;
                file.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
                file.extend_from_slice(&compressed);
            }
            #[cfg(not(feature = "zstd"))]
            {
                return Err(SnapError::Invalid("zstd feature not enabled"));
            }
        } else {
            file.push(0u8);
            file.extend_from_slice(&(raw.len() as u32).to_le_bytes());
            file.extend_from_slice(&raw);
        }
        toc.push(TocEntry {
            kind: SectionKind::Triples,
            section: Section {
                off: tb_off as u64,
                len: (file.len() - tb_off) as u64,
            },
            crc32_u32: 0,
        });

        // TOC
        let toc_off = file.len();
        for e in &mut toc {
            if self.opts.with_crc {
                let start = e.section.off as usize;
                let end = start + e.section.len as usize;
                e.crc32_u32 = crc32_ieee(&file[start..end]);
            }
            let ent = encode_toc_entry(e);
            file.extend_from_slice(&ent);
        }

        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let header = Header {
            magic: *MAGIC,
            version_u16: VERSION,
            flags_u16: if self.opts.zstd { FLAG_ZSTD } else { 0 },
            created_unix64: created,
            toc_off_u64: toc_off as u64,
            toc_len_u32: toc.len() as u32,
            reserved_u32: 0,
        };
        header.write_into(&mut file[0..32]);

        if self.opts.with_crc {
            push_footer(&mut file, END_MAGIC);
        }

        let tmp = self.path.with_extension("snap.tmp");
        fs::write(&tmp, &file).map_err(SnapError::Io)?;
        fs::rename(&tmp, &self.path).map_err(SnapError::Io)?;
        Ok(())
    }
}

// ---------------- Oxigraph helpers ----------------

#[cfg(feature = "oxigraph")]
impl SnapshotWriter {
    /// Add every triple of an oxigraph graph, terms rendered in N-Triples syntax.
    pub fn add_oxigraph_graph(&mut self, graph: &oxigraph::model::Graph) -> Result<()> {
        for t in graph.iter() {
            self.add(
                &t.subject.to_string(),
                &t.predicate.to_string(),
                &t.object.to_string(),
            )?;
        }
        Ok(())
    }
}

fn write_term_dict(buf: &mut Vec<u8>, terms: &[&str]) -> Result<Section> {
    let off = buf.len();
    // header 32 bytes
    buf.resize(buf.len() + 32, 0);
    let blob_off = buf.len();
    let mut offs: Vec<u64> = Vec::with_capacity(terms.len() + 1);
    offs.push(0);
    for t in terms {
        buf.extend_from_slice(t.as_bytes());
        offs.push((buf.len() - blob_off) as u64);
    }
    let blob_len = buf.len() - blob_off;
    // offs u64*(n+1)
    let offs_off = buf.len();
    for o in offs {
        buf.extend_from_slice(&o.to_le_bytes());
    }
    // fill header
    buf[off..off + 8].copy_from_slice(&(terms.len() as u64).to_le_bytes());
    buf[off + 8..off + 16].copy_from_slice(&(blob_off as u64).to_le_bytes());
    buf[off + 16..off + 24].copy_from_slice(&(blob_len as u64).to_le_bytes());
    buf[off + 24..off + 32].copy_from_slice(&(offs_off as u64).to_le_bytes());
    Ok(Section {
        off: off as u64,
        len: (buf.len() - off) as u64,
    })
}

fn push_delta_run(vals: &[u64], out: &mut Vec<u8>, what: &'static str) -> Result<()> {
    let mut prev = 0u64;
    for (i, v) in vals.iter().enumerate() {
        if i == 0 {
            push_uvarint(*v, out);
        } else {
            push_uvarint(v.checked_sub(prev).ok_or(SnapError::Invalid(what))?, out);
        }
        prev = *v;
    }
    Ok(())
}

fn build_raw_spo(spo: &[(u64, u64, u64)]) -> Result<Vec<u8>> {
    // Precondition: spo sorted by (s,p,o)
    let n_t = spo.len();
    let mut out = Vec::with_capacity(n_t * 2);
    let mut s_vals: Vec<u64> = Vec::new();
    let mut s_heads: Vec<u64> = Vec::new();
    let mut p_vals: Vec<u64> = Vec::new();
    let mut p_heads: Vec<u64> = Vec::new();
    let mut o_vals: Vec<u64> = Vec::new();

    let mut i = 0usize;
    while i < spo.len() {
        let s = spo[i].0;
        s_vals.push(s);
        s_heads.push(p_vals.len() as u64);
        let mut j = i;
        while j < spo.len() && spo[j].0 == s {
            // new p run
            let p = spo[j].1;
            p_vals.push(p);
            p_heads.push(o_vals.len() as u64);
            let mut k = j;
            while k < spo.len() && spo[k].0 == s && spo[k].1 == p {
                o_vals.push(spo[k].2);
                k += 1;
            }
            j = k;
        }
        i = j;
    }
    s_heads.push(p_vals.len() as u64);
    p_heads.push(o_vals.len() as u64);

    push_uvarint(s_vals.len() as u64, &mut out);
    push_uvarint(p_vals.len() as u64, &mut out);
    push_uvarint(o_vals.len() as u64, &mut out);
    push_delta_run(&s_vals, &mut out, "s delta underflow")?;
    for v in &s_heads {
        push_uvarint(*v, &mut out);
    }
    for w in s_heads.windows(2) {
        push_delta_run(&p_vals[w[0] as usize..w[1] as usize], &mut out, "p delta underflow")?;
    }
    for v in &p_heads {
        push_uvarint(*v, &mut out);
    }
    for w in p_heads.windows(2) {
        push_delta_run(&o_vals[w[0] as usize..w[1] as usize], &mut out, "o delta underflow")?;
    }
    Ok(out)
}
