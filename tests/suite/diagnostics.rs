//! Pushed diagnostics reach the handler without blocking the sessions

use std::sync::{Arc, Mutex};
use std::time::Duration;

use polyglot_lsp::{Diagnostic, DiagnosticSeverity};

use crate::common::{Harness, TWO_FUNCTIONS, eventually};

type Seen = Arc<Mutex<Vec<(String, Vec<Diagnostic>)>>>;

fn collect(h: &Harness) -> Seen {
    let seen: Seen = Arc::default();
    let sink = seen.clone();
    h.manager.set_diagnostic_handler(move |uri, diagnostics| {
        sink.lock()
            .unwrap()
            .push((uri.to_string(), diagnostics.to_vec()));
    });
    seen
}

#[tokio::test]
async fn published_diagnostics_reach_handler() {
    let h = Harness::new();
    let seen = collect(&h);
    let content = "fn ok() {\n    ERROR here\n}\n";
    let path = h.write("diag.al", content);

    h.manager.open_file(&path, content).await.unwrap();
    assert!(eventually(Duration::from_secs(5), || !seen.lock().unwrap().is_empty()).await);

    let (uri, diagnostics) = seen.lock().unwrap()[0].clone();
    assert_eq!(
        url::Url::parse(&uri).unwrap().to_file_path().unwrap(),
        path
    );
    assert_eq!(diagnostics.len(), 1);
    let d = &diagnostics[0];
    assert_eq!(d.severity(), DiagnosticSeverity::Error);
    assert_eq!(d.source(), "mock");
    assert_eq!(d.range().start.line, 1);
    assert_eq!(d.range().start.character, 4);
    assert_eq!(d.message(), "ERROR on line 2");
}

#[tokio::test]
async fn cleared_diagnostics_are_delivered_empty() {
    let h = Harness::new();
    let seen = collect(&h);
    let path = h.write("fix.al", "ERROR\n");

    h.manager.open_file(&path, "ERROR\n").await.unwrap();
    h.manager.change_file(&path, "fixed\n").unwrap();

    assert!(eventually(Duration::from_secs(5), || seen.lock().unwrap().len() == 2).await);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].1.len(), 1);
    assert!(seen[1].1.is_empty());
}

#[tokio::test]
async fn diagnostics_from_every_language_share_one_handler() {
    let h = Harness::new();
    let seen = collect(&h);
    let a = h.write("a.al", "ERROR\n");
    let b = h.write("b.be", "ERROR\n");

    h.manager.open_file(&a, "ERROR\n").await.unwrap();
    h.manager.open_file(&b, "ERROR\n").await.unwrap();

    assert!(eventually(Duration::from_secs(5), || seen.lock().unwrap().len() == 2).await);
    let mut uris: Vec<String> = seen.lock().unwrap().iter().map(|(u, _)| u.clone()).collect();
    uris.sort();
    assert!(uris[0].ends_with("/a.al"));
    assert!(uris[1].ends_with("/b.be"));
}

#[tokio::test]
async fn stalled_handler_does_not_block_queries() {
    let h = Harness::new();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    h.manager.set_diagnostic_handler(move |_, _| {
        let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(30));
    });

    let path = h.write("stall.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();
    for i in 0..20 {
        h.manager
            .change_file(&path, &format!("{TWO_FUNCTIONS}// ERROR {i}\n"))
            .unwrap();
    }

    let symbols = tokio::time::timeout(Duration::from_secs(10), h.manager.document_symbols(&path))
        .await
        .expect("query stalled behind diagnostics handler")
        .unwrap();
    assert_eq!(symbols.len(), 2);
    drop(release_tx);
}

#[tokio::test]
async fn panicking_handler_keeps_receiving() {
    let h = Harness::new();
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = seen.clone();
    h.manager.set_diagnostic_handler(move |uri, _| {
        assert!(!uri.ends_with("boom.al"), "handler panic");
        sink.lock().unwrap().push(uri.to_string());
    });

    let boom = h.write("boom.al", "");
    let fine = h.write("fine.al", "");
    h.manager.open_file(&boom, "").await.unwrap();
    h.manager.open_file(&fine, "").await.unwrap();

    assert!(eventually(Duration::from_secs(5), || !seen.lock().unwrap().is_empty()).await);
    assert!(seen.lock().unwrap()[0].ends_with("fine.al"));
    // The panic did not take the session down.
    assert!(h.manager.document_symbols(&fine).await.unwrap().is_empty());
}
