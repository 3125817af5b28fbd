//! Header, TOC, section kinds and small codec helpers for `.snap` files.

/// File magic at offset 0.
pub const MAGIC: &[u8; 4] = b"SNAP";
/// Trailing magic of the 16-byte footer.
pub const END_MAGIC: &[u8; 12] = b"SNAP_ENDMARK";
/// Current format version.
pub const VERSION: u16 = 1;

/// Enumerates the kinds of sections in a snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionKind {
    TermDict = 1,
    Triples = 2,
}

impl SectionKind {
    /// Convert a little-endian `u16` value into a kind, if recognized.
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => SectionKind::TermDict,
            2 => SectionKind::Triples,
            _ => return None,
        })
    }
}

/// Byte span for a section.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub off: u64,
    pub len: u64,
}

/// Entry in the table of contents mapping a kind to its section.
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    pub kind: SectionKind,
    pub section: Section,
    pub crc32_u32: u32, // 0 if absent
}

/// Parsed fixed-size file header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: [u8; 4],
    pub version_u16: u16,
    pub flags_u16: u16,
    pub created_unix64: u64,
    pub toc_off_u64: u64,
    pub toc_len_u32: u32,
    pub reserved_u32: u32,
}

/// Header flag: the triple section is zstd-compressed.
pub const FLAG_ZSTD: u16 = 1 << 1;

impl Header {
    /// Parse a header from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 32 {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Some(Header {
            magic,
            version_u16: read_u16(buf, 4)?,
            flags_u16: read_u16(buf, 6)?,
            created_unix64: read_u64(buf, 8)?,
            toc_off_u64: read_u64(buf, 16)?,
            toc_len_u32: read_u32(buf, 24)?,
            reserved_u32: read_u32(buf, 28)?,
        })
    }

    /// Serialize into the first 32 bytes of `buf`.
    pub fn write_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version_u16.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags_u16.to_le_bytes());
        buf[8..16].copy_from_slice(&self.created_unix64.to_le_bytes());
        buf[16..24].copy_from_slice(&self.toc_off_u64.to_le_bytes());
        buf[24..28].copy_from_slice(&self.toc_len_u32.to_le_bytes());
        buf[28..32].copy_from_slice(&self.reserved_u32.to_le_bytes());
    }
}

/// Parse the TOC entries referenced by `hdr`.
pub fn parse_toc(buf: &[u8], hdr: &Header) -> Option<Vec<TocEntry>> {
    // Each entry is 32 bytes; TOC starts at hdr.toc_off_u64
    let toc_off = hdr.toc_off_u64 as usize;
    let n = hdr.toc_len_u32 as usize;
    let need = toc_off.checked_add(n.checked_mul(32)?)?;
    if need > buf.len() {
        return None;
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let off = toc_off + i * 32;
        let kind = SectionKind::from_u16(read_u16(buf, off)?)?;
        // skip reserved_u16
        let section = Section {
            off: read_u64(buf, off + 4)?,
            len: read_u64(buf, off + 12)?,
        };
        // crc32_u32 at off+20..24 (optional), reserved_u32 off+24..28 (ignored here)
        let crc32_u32 = read_u32(buf, off + 20)?;
        out.push(TocEntry {
            kind,
            section,
            crc32_u32,
        });
    }
    Some(out)
}

/// Encode one 32-byte TOC entry. `crc` is only embedded when requested.
pub fn encode_toc_entry(e: &TocEntry) -> [u8; 32] {
    let mut ent = [0u8; 32];
    ent[0..2].copy_from_slice(&(e.kind as u16).to_le_bytes());
    ent[4..12].copy_from_slice(&e.section.off.to_le_bytes());
    ent[12..20].copy_from_slice(&e.section.len.to_le_bytes());
    ent[20..24].copy_from_slice(&e.crc32_u32.to_le_bytes());
    ent
}

/// True if `section` lies entirely within a buffer of `buf_len` bytes.
pub fn section_in_bounds(buf_len: usize, section: Section) -> bool {
    let start = section.off as usize;
    let len = section.len as usize;
    start <= buf_len && start.saturating_add(len) <= buf_len
}

/// Compute IEEE CRC-32.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ (b as u32)) & 0xFF;
        for _ in 0..8 {
            let lsb = x & 1;
            x >>= 1;
            if lsb != 0 {
                x ^= 0xEDB88320;
            }
        }
        crc = (crc >> 8) ^ x;
    }
    crc ^ 0xFFFF_FFFF
}

/// Parse the 16-byte footer holding the global CRC and an end marker.
///
/// `end_magic` lets other file kinds reuse the same footer layout.
pub fn parse_footer(buf: &[u8], end_magic: &[u8; 12]) -> Option<u32> {
    if buf.len() < 16 {
        return None;
    }
    let base = buf.len() - 16;
    if &buf[base + 4..base + 16] != end_magic {
        return None;
    }
    read_u32(buf, base)
}

/// Append the footer (CRC over everything written so far, then the marker).
pub fn push_footer(buf: &mut Vec<u8>, end_magic: &[u8; 12]) {
    let crc = crc32_ieee(&buf[..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(end_magic);
}

/// LEB128 encode.
pub fn push_uvarint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

/// LEB128 decode starting at `off`; returns the value and the next offset.
pub fn read_uvarint(buf: &[u8], mut off: usize) -> Option<(u64, usize)> {
    let (mut x, mut s) = (0u64, 0u32);
    for _ in 0..10 {
        let b = *buf.get(off)? as u64;
        off += 1;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Some((x, off));
        }
        s += 7;
    }
    None
}

pub(crate) fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(off..off + 2)?.try_into().ok()?))
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(off..off + 4)?.try_into().ok()?))
}

pub(crate) fn read_u64(buf: &[u8], off: usize) -> Option<u64> {
    Some(u64::from_le_bytes(buf.get(off..off + 8)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = Header {
            magic: *MAGIC,
            version_u16: VERSION,
            flags_u16: FLAG_ZSTD,
            created_unix64: 1_700_000_000,
            toc_off_u64: 96,
            toc_len_u32: 2,
            reserved_u32: 0,
        };
        let mut buf = [0u8; 32];
        h.write_into(&mut buf);
        let back = Header::parse(&buf).unwrap();
        assert_eq!(&back.magic, MAGIC);
        assert_eq!(back.flags_u16, FLAG_ZSTD);
        assert_eq!(back.toc_off_u64, 96);
        assert_eq!(back.toc_len_u32, 2);
        assert!(Header::parse(&buf[..31]).is_none());
    }

    #[test]
    fn uvarint_roundtrip_and_bounds() {
        let mut out = Vec::new();
        for v in [0u64, 1, 127, 128, 300, u64::MAX] {
            out.clear();
            push_uvarint(v, &mut out);
            assert_eq!(read_uvarint(&out, 0), Some((v, out.len())));
        }
        // truncated continuation byte
        assert!(read_uvarint(&[0x80], 0).is_none());
    }

    #[test]
    fn footer_requires_marker() {
        let mut buf = b"payload".to_vec();
        push_footer(&mut buf, END_MAGIC);
        let crc = parse_footer(&buf, END_MAGIC).unwrap();
        assert_eq!(crc, crc32_ieee(b"payload"));
        assert!(parse_footer(&buf, b"OTHER_ENDMRK").is_none());
    }

    #[test]
    fn crc_known_value() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
    }
}
