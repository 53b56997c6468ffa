//! Diagnostics flowing from the export file to the client.

use serde_json::{Value, json};

use crate::common::{Project, TestClient, export_options, export_record, file_uri};

fn unused_variable() -> String {
    export_record("warning", "src/main.rs", 3, (9, 10), "unused variable: `x`", "_x")
}

#[tokio::test]
async fn opening_a_document_publishes_its_diagnostics() {
    let project = Project::new();
    project.write_export(&format!(
        "{}\n{}\n",
        unused_variable(),
        export_record("error", "src/lib.rs", 1, (1, 4), "expected item", "")
    ));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.open(&main).await;

    let published = client.notification("textDocument/publishDiagnostics").await;
    let params = &published["params"];
    assert_eq!(params["uri"], file_uri(&main));
    assert!(params["version"].as_u64().unwrap() >= 1);
    let diagnostics = params["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "unused variable: `x`");
    assert_eq!(diagnostics[0]["severity"], 2);
    assert_eq!(diagnostics[0]["source"], "lintlink");
    assert_eq!(
        diagnostics[0]["range"],
        json!({"start": {"line": 2, "character": 8}, "end": {"line": 2, "character": 9}})
    );
    assert_eq!(diagnostics[0]["data"]["corrections"], json!(["_x"]));

    client.shutdown().await;
}

#[tokio::test]
async fn reopening_a_document_shows_known_diagnostics() {
    let project = Project::new();
    project.write_export(&format!("{}\n", unused_variable()));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.open(&main).await;
    let first = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(first["params"]["diagnostics"].as_array().unwrap().len(), 1);

    client
        .notify(
            "textDocument/didClose",
            json!({"textDocument": {"uri": file_uri(&main)}}),
        )
        .await;
    // The run this open schedules finds nothing new; what the store holds
    // must still reach the client.
    client.open(&main).await;
    let second = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(second["params"]["uri"], file_uri(&main));
    let diagnostics = second["params"]["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "unused variable: `x`");
    assert!(
        second["params"]["version"].as_u64().unwrap()
            > first["params"]["version"].as_u64().unwrap()
    );

    client.shutdown().await;
}

#[tokio::test]
async fn export_writes_publish_without_a_save() {
    let project = Project::new();
    project.write_export(&format!("{}\n", unused_variable()));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.open(&main).await;
    client.notification("textDocument/publishDiagnostics").await;

    // The checker rewrites its export; no save, no refresh, sweep far off.
    project.write_export(&format!(
        "{}\n",
        export_record("error", "src/main.rs", 7, (1, 2), "mismatched types", "")
    ));
    let published = client.notification("textDocument/publishDiagnostics").await;
    let diagnostics = published["params"]["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "mismatched types");

    client.shutdown().await;
}

#[tokio::test]
async fn pull_diagnostics_and_code_actions() {
    let project = Project::new();
    project.write_export(&format!(
        "{}\n{}\n",
        unused_variable(),
        export_record("error", "src/lib.rs", 1, (1, 4), "expected item", "")
    ));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.open(&main).await;
    client.notification("textDocument/publishDiagnostics").await;

    let response = client
        .request(
            "textDocument/diagnostic",
            json!({"textDocument": {"uri": file_uri(&main)}}),
        )
        .await;
    assert_eq!(response["result"]["kind"], "full");
    assert_eq!(response["result"]["items"].as_array().unwrap().len(), 1);

    let response = client
        .request("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    let reports = response["result"]["items"].as_array().unwrap();
    let main_report = reports
        .iter()
        .find(|r| r["uri"] == file_uri(&main).as_str())
        .expect("no report for the open document");
    assert_eq!(main_report["kind"], "full");
    assert_eq!(main_report["items"][0]["message"], "unused variable: `x`");

    let response = client
        .request(
            "textDocument/codeAction",
            json!({
                "textDocument": {"uri": file_uri(&main)},
                "range": {"start": {"line": 2, "character": 8}, "end": {"line": 2, "character": 8}},
                "context": {"diagnostics": []},
            }),
        )
        .await;
    let actions = response["result"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["kind"], "quickfix");
    let edits = &actions[0]["edit"]["changes"][file_uri(&main)];
    assert_eq!(edits[0]["newText"], "_x");

    let response = client
        .request(
            "textDocument/codeAction",
            json!({
                "textDocument": {"uri": file_uri(&main)},
                "range": {"start": {"line": 40, "character": 0}, "end": {"line": 41, "character": 0}},
                "context": {"diagnostics": []},
            }),
        )
        .await;
    assert_eq!(response["result"], json!([]));

    client.shutdown().await;
}

#[tokio::test]
async fn refresh_picks_up_a_rewritten_export() {
    let project = Project::new();
    project.write_export(&format!("{}\n", unused_variable()));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.open(&main).await;
    let first = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(first["params"]["diagnostics"].as_array().unwrap().len(), 1);

    project.write_export(&format!(
        "{}\n",
        export_record("error", "src/main.rs", 7, (1, 2), "mismatched types", "")
    ));
    let response = client
        .request(
            "workspace/executeCommand",
            json!({"command": "lintlink.refresh", "arguments": []}),
        )
        .await;
    assert_eq!(response["result"], Value::Null);

    let second = client.notification("textDocument/publishDiagnostics").await;
    let diagnostics = second["params"]["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "mismatched types");
    assert!(diagnostics[0].get("data").is_none());
    assert!(
        second["params"]["version"].as_u64().unwrap()
            > first["params"]["version"].as_u64().unwrap()
    );

    client.shutdown().await;
}

#[tokio::test]
async fn missing_preferences_are_shown_to_the_user() {
    let project = Project::new();
    let prefs = project.path("bacon/prefs.toml");
    let mut client = TestClient::start();
    client
        .initialize(
            &project.root,
            export_options(json!({
                "validatePreferences": true,
                "createPreferencesFile": false,
                "preferencesFile": prefs,
            })),
        )
        .await;

    let shown = client.notification("window/showMessage").await;
    assert_eq!(shown["params"]["type"], 2);
    let message = shown["params"]["message"].as_str().unwrap();
    assert!(message.contains("prefs.toml"), "{message}");

    client.shutdown().await;
}

#[tokio::test]
async fn created_preferences_let_diagnostics_flow() {
    let project = Project::new();
    let prefs = project.path("bacon/prefs.toml");
    project.write_export(&format!("{}\n", unused_variable()));
    let main = project.path("src/main.rs");

    let mut client = TestClient::start();
    client
        .initialize(
            &project.root,
            export_options(json!({
                "validatePreferences": true,
                "createPreferencesFile": true,
                "preferencesFile": prefs,
            })),
        )
        .await;
    client.open(&main).await;

    let published = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(published["params"]["diagnostics"].as_array().unwrap().len(), 1);
    let written = std::fs::read_to_string(&prefs).unwrap();
    assert!(written.contains("cargo-json-spans"), "{written}");

    client.shutdown().await;
}
