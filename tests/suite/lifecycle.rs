//! Session lifecycle: start failures, crashes, timeouts, stop and reload

use std::time::Duration;

use polyglot_lsp::{LspError, ServerConfig, SessionState};

use crate::common::{Harness, TWO_FUNCTIONS, eventually, mock_config};

#[tokio::test]
async fn first_use_starts_session_ready() {
    let h = Harness::new();
    assert_eq!(h.manager.statuses()["alpha"], SessionState::NotStarted);

    let path = h.write("a.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let statuses = h.manager.statuses();
    assert_eq!(statuses["alpha"], SessionState::Ready);
    assert_eq!(statuses["beta"], SessionState::NotStarted);
    assert_eq!(h.launcher.launches("alpha"), 1);
    h.manager.document_symbols(&path).await.unwrap();
    assert_eq!(h.launcher.count("alpha", "initialized"), 1);
}

#[tokio::test]
async fn server_configuration_request_is_answered() {
    let h = Harness::new();
    let path = h.write("a.al", "");
    h.manager.open_file(&path, "").await.unwrap();

    let answered = eventually(Duration::from_secs(5), || {
        h.launcher.count("alpha", "$/response") == 1
    })
    .await;
    assert!(answered);
    let reply = h
        .launcher
        .recorded("alpha")
        .into_iter()
        .find(|r| r.method == "$/response")
        .unwrap();
    assert_eq!(reply.params, serde_json::json!([null]));
}

#[tokio::test]
async fn stop_all_then_reopen_restarts() {
    let h = Harness::new();
    let path = h.write("a.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    h.manager.stop_all().await;
    assert_eq!(h.manager.statuses()["alpha"], SessionState::Stopped);
    assert_eq!(h.launcher.count("alpha", "shutdown"), 1);
    assert!(eventually(Duration::from_secs(5), || h.launcher.count("alpha", "exit") == 1).await);

    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();
    assert_eq!(h.manager.statuses()["alpha"], SessionState::Ready);
    assert_eq!(h.launcher.launches("alpha"), 2);

    // A fresh server: the document was opened again from version 1.
    let symbols = h.manager.document_symbols(&path).await.unwrap();
    assert_eq!(symbols.len(), 2);
    assert_eq!(h.launcher.count("alpha", "textDocument/didOpen"), 2);
}

#[tokio::test]
async fn reload_returns_sessions_to_not_started() {
    let h = Harness::new();
    let a = h.write("a.al", TWO_FUNCTIONS);
    let b = h.write("b.be", TWO_FUNCTIONS);
    h.manager.open_file(&a, TWO_FUNCTIONS).await.unwrap();
    h.manager.open_file(&b, TWO_FUNCTIONS).await.unwrap();

    h.manager.reload().await;
    let statuses = h.manager.statuses();
    assert_eq!(statuses["alpha"], SessionState::NotStarted);
    assert_eq!(statuses["beta"], SessionState::NotStarted);

    // Open documents do not survive; changes need a fresh open.
    assert!(matches!(
        h.manager.change_file(&a, "x"),
        Err(LspError::DocumentNotOpen { .. })
    ));
    assert_eq!(h.manager.hover(&a, 0, 4).await.unwrap().unwrap().contents, "`fn alpha() {`");
    assert_eq!(h.launcher.launches("alpha"), 2);
}

#[tokio::test]
async fn missing_binary_is_isolated_to_its_language() {
    let config = mock_config().with_server(
        "gamma",
        ServerConfig::new("polyglot-no-such-language-server", &[], "gamma", &["ga"]).unwrap(),
    );
    let h = Harness::with_config(config);
    let broken = h.write("x.ga", "fn x() {\n}\n");
    let good = h.write("x.al", TWO_FUNCTIONS);

    let err = h.manager.open_file(&broken, "fn x() {\n}\n").await.unwrap_err();
    assert!(matches!(err, LspError::BinaryNotFound { ref language, .. } if language == "gamma"));
    assert_eq!(err.language(), Some("gamma"));
    assert!(err.is_session_fatal());
    assert!(h.manager.document_symbols(&broken).await.is_err());

    h.manager.open_file(&good, TWO_FUNCTIONS).await.unwrap();
    assert_eq!(h.manager.document_symbols(&good).await.unwrap().len(), 2);

    let statuses = h.manager.statuses();
    assert!(matches!(statuses["gamma"], SessionState::StartFailed { .. }));
    assert_eq!(statuses["alpha"], SessionState::Ready);
}

#[tokio::test]
async fn crashed_server_fails_fast_and_restarts() {
    let h = Harness::new();
    let doomed = h.write("doomed.al", "CRASH\n");
    let fine = h.write("fine.al", TWO_FUNCTIONS);

    h.manager.open_file(&fine, TWO_FUNCTIONS).await.unwrap();
    // The mock dies on reading this content.
    h.manager.open_file(&doomed, "CRASH\n").await.unwrap();

    let crashed = eventually(Duration::from_secs(5), || {
        matches!(h.manager.statuses()["alpha"], SessionState::Crashed { .. })
    })
    .await;
    assert!(crashed, "status: {:?}", h.manager.statuses());

    // Other languages are unaffected.
    let other = h.write("other.be", TWO_FUNCTIONS);
    assert_eq!(h.manager.document_symbols(&other).await.unwrap().len(), 2);

    // The next use starts a new server.
    let symbols = h.manager.document_symbols(&fine).await.unwrap();
    assert_eq!(symbols.len(), 2);
    assert_eq!(h.launcher.launches("alpha"), 2);
    assert_eq!(h.manager.statuses()["alpha"], SessionState::Ready);
}

#[tokio::test]
async fn timeout_does_not_kill_session() {
    let h = Harness::new();
    let content = "fn quick() {\n}\n// SLOW\n";
    let path = h.write("slow.al", content);
    h.manager.open_file(&path, content).await.unwrap();

    let err = h.manager.hover(&path, 2, 0).await.unwrap_err();
    assert!(!err.is_session_fatal());
    match err {
        LspError::RequestTimeout {
            language, method, ..
        } => {
            assert_eq!(language, "alpha");
            assert_eq!(method, "textDocument/hover");
        }
        other => panic!("expected RequestTimeout, got {other:?}"),
    }
    assert_eq!(h.manager.statuses()["alpha"], SessionState::Ready);

    let hover = h.manager.hover(&path, 0, 3).await.unwrap().unwrap();
    assert_eq!(hover.contents, "`fn quick() {`");
    assert_eq!(h.launcher.launches("alpha"), 1);
    assert_eq!(h.launcher.count("alpha", "$/cancelRequest"), 1);
}

#[tokio::test]
async fn operations_after_stop_all_never_hang() {
    let h = Harness::new();
    let path = h.write("a.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();
    h.manager.stop_all().await;
    h.manager.stop_all().await;

    h.manager.close_file(&path);
    assert!(h.manager.change_file(&path, "x").is_err());
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        h.manager.references(&path, 1, 5, true),
    )
    .await
    .expect("query after stop_all hung");
    assert_eq!(result.unwrap().len(), 2);
}
