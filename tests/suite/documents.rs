//! Document synchronization: open/change/close bookkeeping and versions

use polyglot_lsp::LspError;

use crate::common::Harness;

fn versions(h: &Harness, method: &str) -> Vec<i64> {
    h.launcher
        .recorded("alpha")
        .iter()
        .filter(|r| r.method == method)
        .filter_map(|r| r.params["textDocument"]["version"].as_i64())
        .collect()
}

#[tokio::test]
async fn open_twice_keeps_one_document() {
    let h = Harness::new();
    let path = h.write("main.al", "fn main() {\n}\n");

    h.manager.open_file(&path, "fn main() {\n}\n").await.unwrap();
    h.manager.open_file(&path, "fn main() {\n}\nfn other() {\n}\n").await.unwrap();

    // The server sees the second content. The round trip also means both
    // notifications have been read.
    let symbols = h.manager.document_symbols(&path).await.unwrap();
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["main", "other"]);

    assert_eq!(h.launcher.count("alpha", "textDocument/didOpen"), 1);
    assert_eq!(versions(&h, "textDocument/didOpen"), [1]);
    assert_eq!(versions(&h, "textDocument/didChange"), [2]);
}

#[tokio::test]
async fn close_is_idempotent_and_never_errors() {
    let h = Harness::new();
    let path = h.write("a.al", "fn a() {\n}\n");

    // Never opened, and no session exists yet.
    h.manager.close_file(&path);
    h.manager.close_file("never/opened.al");

    h.manager.open_file(&path, "fn a() {\n}\n").await.unwrap();
    h.manager.close_file(&path);
    h.manager.close_file(&path);

    // Round trip on another document so the closes have been read.
    let other = h.write("b.al", "");
    h.manager.document_symbols(&other).await.unwrap();
    assert_eq!(h.launcher.count("alpha", "textDocument/didClose"), 1);
}

#[tokio::test]
async fn change_unopened_file_is_document_not_open() {
    let h = Harness::new();
    let path = h.write("a.al", "");

    let err = h.manager.change_file(&path, "x").unwrap_err();
    assert!(matches!(err, LspError::DocumentNotOpen { .. }));

    // Same once the session is running but the file is not open.
    let other = h.write("b.al", "");
    h.manager.open_file(&other, "").await.unwrap();
    let err = h.manager.change_file(&path, "x").unwrap_err();
    assert!(matches!(err, LspError::DocumentNotOpen { .. }));
    h.manager.document_symbols(&other).await.unwrap();
    assert_eq!(h.launcher.count("alpha", "textDocument/didChange"), 0);
}

#[tokio::test]
async fn change_versions_strictly_increase() {
    let h = Harness::new();
    let path = h.write("a.al", "");
    h.manager.open_file(&path, "").await.unwrap();
    for i in 0..5 {
        h.manager.change_file(&path, &format!("fn f{i}() {{\n}}\n")).unwrap();
    }
    h.manager.close_file(&path);
    h.manager.open_file(&path, "").await.unwrap();
    h.manager.document_symbols(&path).await.unwrap();

    assert_eq!(versions(&h, "textDocument/didChange"), [2, 3, 4, 5, 6]);
    // Reopening after close starts a fresh document.
    assert_eq!(versions(&h, "textDocument/didOpen"), [1, 1]);
}

#[tokio::test]
async fn relative_paths_resolve_against_workspace_root() {
    let h = Harness::new();
    let absolute = h.write("src/lib.al", "fn lib() {\n}\n");

    h.manager.open_file("src/./lib.al", "fn lib() {\n}\n").await.unwrap();
    h.manager.change_file("src/../src/lib.al", "fn lib2() {\n}\n").unwrap();
    let symbols = h.manager.document_symbols(&absolute).await.unwrap();
    assert_eq!(symbols[0].name, "lib2");

    let recorded = h.launcher.recorded("alpha");
    let opened = recorded
        .iter()
        .find(|r| r.method == "textDocument/didOpen")
        .unwrap();
    let uri = opened.params["textDocument"]["uri"].as_str().unwrap();
    assert_eq!(url::Url::parse(uri).unwrap().to_file_path().unwrap(), absolute);
    assert_eq!(versions(&h, "textDocument/didChange"), [2]);
}

#[tokio::test]
async fn unsupported_extension_is_a_silent_noop() {
    let h = Harness::new();
    let path = h.write("notes.txt", "hello");

    h.manager.open_file(&path, "hello").await.unwrap();
    h.manager.close_file(&path);
    assert!(h.manager.document_symbols(&path).await.unwrap().is_empty());
    assert!(h.manager.definition(&path, 0, 0).await.unwrap().is_empty());
    assert!(h.manager.completion(&path, 0, 0).await.unwrap().is_empty());

    assert_eq!(h.launcher.launches("alpha"), 0);
    assert_eq!(h.launcher.launches("beta"), 0);
}

#[tokio::test]
async fn query_opens_file_from_disk() {
    let h = Harness::new();
    let path = h.write("disk.al", "fn from_disk() {\n}\n");

    let symbols = h.manager.document_symbols(&path).await.unwrap();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "from_disk");

    let opens: Vec<_> = h
        .launcher
        .recorded("alpha")
        .into_iter()
        .filter(|r| r.method == "textDocument/didOpen")
        .collect();
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].params["textDocument"]["text"], "fn from_disk() {\n}\n");
}

#[tokio::test]
async fn query_on_missing_file_is_read_error() {
    let h = Harness::new();
    let err = h
        .manager
        .hover(h.root().join("missing.al"), 0, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, LspError::ReadFile { .. }), "got {err:?}");
}

#[tokio::test]
async fn binary_content_does_not_fail() {
    let h = Harness::new();
    let path = h.write("blob.al", [0xff_u8, 0xfe, 0x00, b'\n', 0x80, b'f']);

    assert!(h.manager.document_symbols(&path).await.unwrap().is_empty());
    assert!(h.manager.hover(&path, 1, 0).await.is_ok());
    h.manager.open_file(&path, "").await.unwrap();
    assert!(h.manager.completion(&path, 0, 0).await.unwrap().is_empty());
}
