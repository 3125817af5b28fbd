mod common;

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use common::*;
use vtriples::{Controller, Error, PatchBuilderStreaming, StoreConfig};

/// Create a store with two versions and close it.
fn init_store(root: &Path) {
    let controller = Controller::open(StoreConfig::new(root)).expect("open store");
    commit(&controller, &[(t("a", "p", "o"), true), (t("b", "p", "o"), true)]);
    commit(&controller, &[(t("a", "p", "o"), false)]);
    controller.flush().expect("flush");
}

fn current_test_exe() -> PathBuf {
    env::current_exe().expect("current_exe")
}

fn spawn_worker(name: &str, root: &Path) -> std::process::Child {
    Command::new(current_test_exe())
        .arg("--exact")
        .arg(name)
        .arg("--ignored")
        .arg("--nocapture")
        .env("VTRIPLES_STORE", root.to_string_lossy().to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn worker")
}

/// Worker: open read-only and materialize version 1.
/// Invoked as an ignored test inside this binary via libtest filter.
#[test]
#[ignore]
fn worker_ro() {
    let root = PathBuf::from(env::var("VTRIPLES_STORE").expect("VTRIPLES_STORE missing"));
    let controller = Controller::open_path(&root, true).expect("open read-only");
    assert_eq!(version(&controller, &any(), 1), vec![t("b", "p", "o")]);
    println!("worker_ro ok");
}

#[test]
fn read_only_processes_share_a_store() {
    let dir = tempfile::tempdir().unwrap();
    init_store(dir.path());

    // a writer in this process does not block readers
    let _writer = Controller::open_path(dir.path(), false).unwrap();
    let workers = [
        spawn_worker("worker_ro", dir.path()),
        spawn_worker("worker_ro", dir.path()),
    ];
    for worker in workers {
        let output = worker.wait_with_output().expect("worker output");
        assert!(output.status.success(), "worker failed: {:?}", output);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("worker_ro ok"), "unexpected stdout: {stdout}");
    }
}

#[test]
fn second_writer_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    init_store(dir.path());
    let writer = Controller::open_path(dir.path(), false).unwrap();
    let err = Controller::open_path(dir.path(), false).unwrap_err();
    assert!(matches!(err, Error::Locked(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("store.lock"));
    drop(writer);
    assert!(Controller::open_path(dir.path(), false).is_ok());
}

#[test]
fn read_only_store_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    init_store(dir.path());
    let controller = Controller::open_path(dir.path(), true).unwrap();
    assert!(controller.is_read_only());
    let mut builder = vtriples::PatchBuilder::new(&controller);
    builder.addition("<c>", "<p>", "<o>");
    assert!(matches!(builder.commit(None), Err(Error::ReadOnly)));
    assert!(matches!(
        controller.create_snapshot(9, Vec::new(), ""),
        Err(Error::ReadOnly)
    ));
    assert_eq!(controller.get_max_patch_id().unwrap(), Some(1));

    let missing = dir.path().join("missing");
    assert!(matches!(
        Controller::open_path(&missing, true),
        Err(Error::Invalid(_))
    ));
}

#[test]
fn store_reopens_with_its_versions() {
    let dir = tempfile::tempdir().unwrap();
    init_store(dir.path());
    {
        let controller = Controller::open_path(dir.path(), false).unwrap();
        assert_eq!(version(&controller, &any(), 1), vec![t("b", "p", "o")]);
        commit(&controller, &[(t("c", "p", "o"), true)]);
    }
    let controller = Controller::open_path(dir.path(), true).unwrap();
    assert_eq!(controller.get_max_patch_id().unwrap(), Some(2));
    assert_eq!(
        version(&controller, &any(), 2),
        vec![t("b", "p", "o"), t("c", "p", "o")]
    );
    assert_eq!(
        version(&controller, &any(), 0),
        vec![t("a", "p", "o"), t("b", "p", "o")]
    );
}

#[test]
fn streaming_builder_commits_from_many_threads() {
    let dir = tempfile::tempdir().unwrap();
    let controller = Arc::new(Controller::open(StoreConfig::new(dir.path())).unwrap());

    let builder = Arc::new(PatchBuilderStreaming::new(Arc::clone(&controller), None).unwrap());
    assert_eq!(builder.patch_id(), 0);
    let producers: Vec<_> = (0..4)
        .map(|i| {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || {
                for j in 0..25 {
                    builder
                        .addition(&format!("<s{i}>"), "<p>", &format!("<o{j}>"))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    let builder = Arc::into_inner(builder).expect("producers finished");
    assert!(builder.close().unwrap());
    assert_eq!(version(&controller, &any(), 0).len(), 100);

    let builder = PatchBuilderStreaming::new(Arc::clone(&controller), None).unwrap();
    assert_eq!(builder.patch_id(), 1);
    builder.deletion("<s0>", "<p>", "<o0>").unwrap();
    builder.addition("<x>", "<p>", "<o>").unwrap();
    builder.addition("<x>", "<p>", "<o>").unwrap();
    assert!(builder.close().unwrap());

    let v1 = version(&controller, &any(), 1);
    assert_eq!(v1.len(), 100);
    assert!(!v1.contains(&t("s0", "p", "o0")));
    assert_eq!(v1.last(), Some(&t("x", "p", "o")));
}
