//! Query operations: symbols, hover, navigation, rename, completion

use polyglot_lsp::{LspError, SymbolKind};

use crate::common::{Harness, TWO_FUNCTIONS};

#[tokio::test]
async fn two_function_file_yields_ordered_symbols() {
    let h = Harness::new();
    let path = h.write("two.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let symbols = h.manager.document_symbols(&path).await.unwrap();
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(symbols[0].kind, Some(SymbolKind::Function));
    assert!(!symbols[0].range.overlaps(&symbols[1].range));
    assert!(symbols[0].range.start < symbols[1].range.start);
}

#[tokio::test]
async fn hover_past_end_of_file_is_empty() {
    let h = Harness::new();
    let content: String = (0..10).map(|i| format!("fn f{i}() {{}}\n")).collect();
    let path = h.write("ten.al", &content);
    h.manager.open_file(&path, &content).await.unwrap();

    assert!(h.manager.hover(&path, 99_999, 0).await.unwrap().is_none());
    assert!(h.manager.definition(&path, 99_999, 3).await.unwrap().is_empty());
    assert!(h.manager.rename(&path, 99_999, 3, "x").await.unwrap().is_empty());
    // Answered locally; the server never saw the position.
    assert_eq!(h.launcher.count("alpha", "textDocument/hover"), 0);

    let hover = h.manager.hover(&path, 3, 4).await.unwrap().unwrap();
    assert_eq!(hover.contents, "`fn f3() {}`");
}

#[tokio::test]
async fn column_past_end_of_line_is_empty() {
    let h = Harness::new();
    let content = "fn short() {}\n";
    let path = h.write("short.al", content);
    h.manager.open_file(&path, content).await.unwrap();

    // The mock rejects such columns with InvalidParams; none reach it.
    assert!(h.manager.hover(&path, 0, 99_999).await.unwrap().is_none());
    assert!(h.manager.hover(&path, 0, 14).await.unwrap().is_none());
    assert!(h.manager.references(&path, 0, 99_999, true).await.unwrap().is_empty());
    assert!(h.manager.completion(&path, 0, 99_999).await.unwrap().is_empty());
    assert_eq!(h.launcher.count("alpha", "textDocument/hover"), 0);

    // The end of the line is still a valid position.
    let hover = h.manager.hover(&path, 0, 13).await.unwrap().unwrap();
    assert_eq!(hover.contents, "`fn short() {}`");
}

#[tokio::test]
async fn definition_and_references() {
    let h = Harness::new();
    let path = h.write("nav.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    // `beta` in `    beta();`
    let defs = h.manager.definition(&path, 1, 5).await.unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].range.start.line, 4);
    assert_eq!(defs[0].range.start.character, 3);
    assert_eq!(defs[0].path().unwrap(), path);

    let with_decl = h.manager.references(&path, 1, 5, true).await.unwrap();
    let without_decl = h.manager.references(&path, 1, 5, false).await.unwrap();
    assert_eq!(with_decl.len(), 2);
    assert_eq!(without_decl.len(), 1);
    assert_eq!(without_decl[0].range.start.line, 1);

    // Whitespace: nothing to resolve.
    assert!(h.manager.definition(&path, 3, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn unicode_and_space_paths_round_trip() {
    let h = Harness::new();
    let path = h.write("dir with space/ünïcödé 文件.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let defs = h.manager.definition(&path, 1, 5).await.unwrap();
    assert_eq!(defs.len(), 1);

    let opened = h
        .launcher
        .recorded("alpha")
        .into_iter()
        .find(|r| r.method == "textDocument/didOpen")
        .unwrap();
    let uri = opened.params["textDocument"]["uri"].as_str().unwrap().to_string();
    assert!(uri.starts_with("file://"));
    assert!(!uri.contains(' '));
    assert_eq!(defs[0].uri, uri);
    assert_eq!(defs[0].path().unwrap(), path);
}

#[tokio::test]
async fn rename_edits_carry_exact_new_name() {
    let h = Harness::new();
    let path = h.write("rename.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let edit = h.manager.rename(&path, 4, 4, "Foo").await.unwrap();
    assert_eq!(edit.edit_count(), 2);
    for (uri, text_edit) in edit.edits() {
        assert!(uri.starts_with("file://"));
        assert_eq!(text_edit.new_text, "Foo");
    }
}

#[tokio::test]
async fn rename_with_rewritten_text_is_rejected() {
    let h = Harness::new();
    let path = h.write("rename.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let err = h.manager.rename(&path, 4, 4, "two words").await.unwrap_err();
    match err {
        LspError::RenameMismatch {
            language,
            expected,
            found,
        } => {
            assert_eq!(language, "alpha");
            assert_eq!(expected, "two words");
            assert_eq!(found, "two_words");
        }
        other => panic!("expected RenameMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn rename_on_nothing_is_empty_edit() {
    let h = Harness::new();
    let path = h.write("rename.al", TWO_FUNCTIONS);
    h.manager.open_file(&path, TWO_FUNCTIONS).await.unwrap();

    let edit = h.manager.rename(&path, 3, 0, "Foo").await.unwrap();
    assert!(edit.is_empty());
}

#[tokio::test]
async fn completion_on_empty_file_right_after_open() {
    let h = Harness::new();
    let path = h.write("empty.al", "");
    h.manager.open_file(&path, "").await.unwrap();

    let items = h.manager.completion(&path, 0, 0).await.unwrap();
    assert!(items.is_empty());

    h.manager.change_file(&path, TWO_FUNCTIONS).unwrap();
    let items = h.manager.completion(&path, 0, 0).await.unwrap();
    let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, ["alpha", "beta"]);
}

#[tokio::test]
async fn languages_route_to_separate_servers() {
    let h = Harness::new();
    let a = h.write("x.al", "fn in_alpha() {\n}\n");
    let b = h.write("x.be", "fn in_beta() {\n}\n");

    assert_eq!(h.manager.document_symbols(&a).await.unwrap()[0].name, "in_alpha");
    assert_eq!(h.manager.document_symbols(&b).await.unwrap()[0].name, "in_beta");
    assert_eq!(h.launcher.launches("alpha"), 1);
    assert_eq!(h.launcher.launches("beta"), 1);
    assert_eq!(h.launcher.count("alpha", "textDocument/documentSymbol"), 1);
    assert_eq!(h.launcher.count("beta", "textDocument/documentSymbol"), 1);
}
