#![cfg(feature = "oxigraph")]
use oxigraph::model::{Graph, Literal, NamedNode, Triple};
use snapfile::{SnapshotFile, SnapshotWriter, WriterOptions};

#[test]
fn oxigraph_graph_terms_use_ntriples_syntax() {
    let mut g = Graph::new();
    g.insert(&Triple::new(
        NamedNode::new("http://ex/s1").unwrap(),
        NamedNode::new("http://ex/p1").unwrap(),
        Literal::new_language_tagged_literal("v1", "en").unwrap(),
    ));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oxigraph_conv.snap");
    let mut w = SnapshotWriter::new(&path, WriterOptions::default());
    w.add_oxigraph_graph(&g).unwrap();
    w.finalize().unwrap();
    let f = SnapshotFile::open(&path).unwrap();
    assert_eq!(f.len(), 1);
    assert!(f.term_id("<http://ex/s1>").is_some());
    assert!(f.term_id("\"v1\"@en").is_some());
}
