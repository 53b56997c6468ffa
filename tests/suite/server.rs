//! Protocol lifecycle: initialize, errors, shutdown.

use serde_json::{Value, json};

use crate::common::{Project, TestClient, export_options, file_uri};

#[tokio::test]
async fn initialize_advertises_capabilities() {
    let project = Project::new();
    let mut client = TestClient::start();
    let response = client.initialize(&project.root, export_options(json!({}))).await;

    let result = &response["result"];
    assert_eq!(result["serverInfo"]["name"], "lintlink");
    let capabilities = &result["capabilities"];
    assert_eq!(capabilities["positionEncoding"], "utf-16");
    assert_eq!(capabilities["textDocumentSync"]["change"], 1);
    assert_eq!(capabilities["textDocumentSync"]["openClose"], true);
    assert_eq!(
        capabilities["codeActionProvider"]["codeActionKinds"],
        json!(["quickfix"])
    );
    assert_eq!(capabilities["diagnosticProvider"]["workspaceDiagnostics"], true);
    assert_eq!(
        capabilities["executeCommandProvider"]["commands"],
        json!(["lintlink.refresh"])
    );

    let log = client.notification("window/logMessage").await;
    assert_eq!(log["params"]["type"], 3);

    client.shutdown().await;
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let mut client = TestClient::start();
    let response = client
        .request("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    assert_eq!(response["error"]["code"], -32002);
    client.join().await;
}

#[tokio::test]
async fn invalid_settings_reject_initialize() {
    let project = Project::new();
    let mut client = TestClient::start();
    let response = client
        .request(
            "initialize",
            json!({
                "rootUri": file_uri(&project.root),
                "capabilities": {},
                "initializationOptions": {"runCheckerCommand": ""},
            }),
        )
        .await;
    assert_eq!(response["error"]["code"], -32602);
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("runCheckerCommand"), "{message}");

    // A rejected initialize leaves the server waiting for a good one.
    client.initialize(&project.root, export_options(json!({}))).await;
    client.shutdown().await;
}

#[tokio::test]
async fn unknown_methods() {
    let project = Project::new();
    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;

    let response = client.request("textDocument/hover", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);

    client.notify("$/cancelRequest", json!({"id": 1})).await;
    let response = client
        .request("workspace/executeCommand", json!({"command": "lintlink.nope"}))
        .await;
    assert_eq!(response["error"]["code"], -32602);

    client.shutdown().await;
}

#[tokio::test]
async fn requests_after_shutdown_are_invalid() {
    let project = Project::new();
    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;

    let response = client.request("shutdown", Value::Null).await;
    assert_eq!(response["result"], Value::Null);
    let response = client.request("workspace/diagnostic", json!({})).await;
    assert_eq!(response["error"]["code"], -32600);

    client.notify("exit", Value::Null).await;
    client.join().await;
}

#[tokio::test]
async fn crashing_checker_is_shown_to_the_user() {
    let project = Project::new();
    let mut client = TestClient::start();
    client
        .initialize(
            &project.root,
            export_options(json!({
                "runCheckerInBackground": true,
                "runCheckerCommand": "lintlink-test-no-such-checker-binary",
                "maxCheckerRestarts": 1,
                "checkerRestartDelayMillis": 50,
                "checkerRestartMaxDelayMillis": 50,
            })),
        )
        .await;

    let mut warnings = Vec::new();
    let fatal = loop {
        let shown = client.notification("window/showMessage").await;
        let message = shown["params"]["message"].as_str().unwrap().to_string();
        if shown["params"]["type"] == 1 {
            break message;
        }
        assert_eq!(shown["params"]["type"], 2);
        warnings.push(message);
    };
    assert!(
        warnings.iter().any(|m| m.contains("checker crashed") && m.contains("not found")),
        "{warnings:?}"
    );
    assert!(fatal.contains("repeated crashes"), "{fatal}");

    client.shutdown().await;
}

#[tokio::test]
async fn closing_the_stream_stops_the_server() {
    let project = Project::new();
    let mut client = TestClient::start();
    client.initialize(&project.root, export_options(json!({}))).await;
    client.join().await;
}
