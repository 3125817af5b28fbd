#![cfg(feature = "zstd")]
use snapfile::{SnapshotFile, SnapshotWriter, WriterOptions, header::FLAG_ZSTD};

#[test]
fn zstd_roundtrip_matches_plain() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("plain.snap");
    let packed = dir.path().join("packed.snap");
    for (path, zstd) in [(&plain, false), (&packed, true)] {
        let mut w = SnapshotWriter::new(
            path,
            WriterOptions {
                zstd,
                with_crc: true,
            },
        );
        for i in 0..200 {
            w.add(&format!("<http://ex/s{}>", i % 17), "<http://ex/p>", &format!("\"{i}\""))
                .unwrap();
        }
        w.finalize().unwrap();
    }
    let a = SnapshotFile::open(&plain).unwrap();
    let b = SnapshotFile::open(&packed).unwrap();
    assert_eq!(b.header().flags_u16 & FLAG_ZSTD, FLAG_ZSTD);
    assert_eq!(a.len(), 200);
    assert_eq!(a.index(snapfile::TripleOrder::Spo), b.index(snapfile::TripleOrder::Spo));
}
