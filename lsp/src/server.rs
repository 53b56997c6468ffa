//! Stdio language server: JSON-RPC dispatch on top of [`DiagnosticsEngine`].
//!
//! One task reads frames, one writes them; everything else runs on the
//! serving task, which owns the engine and drains its events.

use std::env;
use std::future;
use std::mem;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Result;
use lintlink_types::Settings;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::codec::{FrameReader, FrameWriter};
use crate::engine::DiagnosticsEngine;
use crate::protocol::{
    CodeActionParams, ExecuteCommandParams, INVALID_PARAMS, INVALID_REQUEST, InitializeParams,
    METHOD_NOT_FOUND, MessageType, Notification, REFRESH_COMMAND, SERVER_NOT_INITIALIZED, SOURCE,
    TextDocumentParams, code_action, diagnostic_to_lsp, error_response, file_uri_to_path,
    message_params, path_to_file_uri, response, server_capabilities,
};
use crate::types::{EngineEvent, SupervisorState, SupervisorStatus};

const WRITER_CHANNEL_CAPACITY: usize = 64;

const READER_CHANNEL_CAPACITY: usize = 16;

enum WriterCommand {
    Send(Value),
    Notify(Notification),
    Shutdown,
}

enum IncomingFrame {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A reply to something we sent. The server sends no requests, so
    /// these are dropped.
    Response,
}

fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let params = frame.get("params").cloned().unwrap_or(Value::Null);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(_), None, true) => Some(IncomingFrame::Response),
        (Some(id), Some(method), _) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method, params }),
        _ => None,
    }
}

enum Phase {
    Uninitialized,
    /// `initialize` answered; the engine starts on `initialized`.
    Initialized {
        root: PathBuf,
        settings: Settings,
    },
    Running(DiagnosticsEngine),
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Serve the language server protocol until the client sends `exit` or
/// closes `input`.
pub async fn serve<R, W>(input: R, output: W) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (frames_tx, mut frames_rx) = mpsc::channel::<Result<Value>>(READER_CHANNEL_CAPACITY);
    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(input);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if frames_tx.send(Ok(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = frames_tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(command) = writer_rx.recv().await {
            let written = match command {
                WriterCommand::Send(message) => writer.write(&message).await,
                WriterCommand::Notify(notification) => writer.write(&notification).await,
                WriterCommand::Shutdown => break,
            };
            if let Err(e) = written {
                tracing::warn!("LSP write error: {e:#}");
                break;
            }
        }
    });

    let mut server = Server {
        phase: Phase::Uninitialized,
        events: None,
        checker: None,
        checker_state: SupervisorState::NotStarted,
        writer: writer_tx.clone(),
        version: 0,
    };
    let result = server.run(&mut frames_rx).await;
    server.stop().await;

    let _ = writer_tx.send(WriterCommand::Shutdown).await;
    let _ = writer_handle.await;
    reader_handle.abort();
    result
}

struct Server {
    phase: Phase,
    events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    checker: Option<watch::Receiver<SupervisorStatus>>,
    /// Last checker state reported to the client.
    checker_state: SupervisorState,
    writer: mpsc::Sender<WriterCommand>,
    /// Version stamped on every publishDiagnostics.
    version: u64,
}

impl Server {
    async fn run(&mut self, frames: &mut mpsc::Receiver<Result<Value>>) -> Result<()> {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => {
                        if self.dispatch(frame).await == Flow::Exit {
                            tracing::info!("Client sent exit");
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e.context("reading from the client")),
                    None => {
                        tracing::info!("Client closed the stream");
                        return Ok(());
                    }
                },
                event = recv_event(&mut self.events) => match event {
                    Some(event) => self.on_event(event).await,
                    None => self.events = None,
                },
                status = recv_status(&mut self.checker) => match status {
                    Some(status) => self.on_checker_status(status).await,
                    None => self.checker = None,
                },
            }
        }
    }

    async fn dispatch(&mut self, frame: Value) -> Flow {
        match parse_incoming(&frame) {
            Some(IncomingFrame::Request { id, method, params }) => {
                let reply = self.handle_request(&id, &method, params).await;
                self.send(reply).await;
            }
            Some(IncomingFrame::Notification { method, params }) => {
                if method == "exit" {
                    return Flow::Exit;
                }
                self.handle_notification(&method, params).await;
            }
            Some(IncomingFrame::Response) => {}
            None => tracing::warn!("Ignoring malformed message: {frame}"),
        }
        Flow::Continue
    }

    async fn handle_request(&mut self, id: &Value, method: &str, params: Value) -> Value {
        match self.phase {
            Phase::Uninitialized if method == "initialize" => {
                return self.initialize(id, params).await;
            }
            Phase::Uninitialized => {
                return error_response(id, SERVER_NOT_INITIALIZED, "server not initialized");
            }
            Phase::ShutDown => {
                return error_response(id, INVALID_REQUEST, "server is shut down");
            }
            Phase::Initialized { .. } | Phase::Running(_) => {}
        }

        match method {
            "initialize" => error_response(id, INVALID_REQUEST, "server already initialized"),
            "shutdown" => {
                self.stop().await;
                response(id, Value::Null)
            }
            "textDocument/diagnostic" => self.document_diagnostic(id, params).await,
            "workspace/diagnostic" => self.workspace_diagnostic(id).await,
            "textDocument/codeAction" => self.code_action(id, params).await,
            "workspace/executeCommand" => self.execute_command(id, params).await,
            _ => error_response(id, METHOD_NOT_FOUND, format!("method not found: {method}")),
        }
    }

    async fn handle_notification(&mut self, method: &str, params: Value) {
        match method {
            "initialized" => self.start_engine().await,
            "textDocument/didOpen" => {
                if let Some(path) =
                    self.with_document(params, |engine, path| engine.on_document_opened(path))
                {
                    self.publish_known(path).await;
                }
            }
            "textDocument/didChange" => {
                self.with_document(params, |engine, path| engine.on_document_changed(path));
            }
            "textDocument/didSave" => {
                self.with_document(params, |engine, path| engine.on_document_saved(path));
            }
            "textDocument/didClose" => {
                self.with_document(params, |engine, path| engine.on_document_closed(path));
            }
            _ => tracing::debug!("Ignoring notification {method}"),
        }
    }

    async fn initialize(&mut self, id: &Value, params: Value) -> Value {
        let params: InitializeParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return error_response(id, INVALID_PARAMS, e),
        };
        let options = params
            .initialization_options
            .clone()
            .unwrap_or_else(|| json!({}));
        let settings: Settings = match serde_json::from_value(options) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Rejecting initializationOptions: {e}");
                return error_response(
                    id,
                    INVALID_PARAMS,
                    format!("invalid initializationOptions: {e}"),
                );
            }
        };

        let workspace = params
            .workspace_root()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let root = project_root(&workspace).await;
        tracing::info!(
            "Initialized for {} (project root {})",
            workspace.display(),
            root.display()
        );
        self.phase = Phase::Initialized { root, settings };

        response(
            id,
            json!({
                "capabilities": server_capabilities(),
                "serverInfo": { "name": SOURCE, "version": env!("CARGO_PKG_VERSION") }
            }),
        )
    }

    async fn start_engine(&mut self) {
        match mem::replace(&mut self.phase, Phase::ShutDown) {
            Phase::Initialized { root, settings } => {
                let (engine, events) = DiagnosticsEngine::start(settings, &root).await;
                self.events = Some(events);
                self.checker = engine.supervisor_status();
                self.phase = Phase::Running(engine);
                self.notify(
                    "window/logMessage",
                    message_params(
                        MessageType::Info,
                        &format!("lintlink serving diagnostics for {}", root.display()),
                    ),
                )
                .await;
            }
            other => {
                self.phase = other;
                tracing::warn!("Ignoring initialized outside of initialization");
            }
        }
    }

    /// Tear the engine down. Later requests get InvalidRequest.
    async fn stop(&mut self) {
        if let Phase::Running(engine) = mem::replace(&mut self.phase, Phase::ShutDown) {
            engine.shutdown().await;
        }
        self.events = None;
        self.checker = None;
    }

    fn engine(&self) -> Option<&DiagnosticsEngine> {
        match &self.phase {
            Phase::Running(engine) => Some(engine),
            _ => None,
        }
    }

    /// Run `hook` for the document named in `params`, returning its path.
    fn with_document(
        &mut self,
        params: Value,
        hook: impl FnOnce(&mut DiagnosticsEngine, &Path),
    ) -> Option<PathBuf> {
        let Phase::Running(engine) = &mut self.phase else {
            tracing::debug!("Document notification before the engine started");
            return None;
        };
        let Some(path) = document_path(params) else {
            tracing::debug!("Ignoring document notification without a file URI");
            return None;
        };
        hook(engine, &path);
        Some(path)
    }

    async fn document_diagnostic(&self, id: &Value, params: Value) -> Value {
        let params: TextDocumentParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return error_response(id, INVALID_PARAMS, e),
        };
        let path = file_uri_to_path(&params.text_document.uri);
        let items: Vec<Value> = match (self.engine(), path) {
            (Some(engine), Some(path)) => engine
                .get_document_diagnostics(&path)
                .await
                .iter()
                .map(diagnostic_to_lsp)
                .collect(),
            _ => Vec::new(),
        };
        response(id, json!({ "kind": "full", "items": items }))
    }

    async fn workspace_diagnostic(&self, id: &Value) -> Value {
        let mut reports = Vec::new();
        if let Some(engine) = self.engine() {
            let snapshot = engine.get_workspace_diagnostics().await;
            for (path, diagnostics) in snapshot.files() {
                let uri = match path_to_file_uri(path) {
                    Ok(uri) => uri,
                    Err(e) => {
                        tracing::warn!("{e}");
                        continue;
                    }
                };
                let items: Vec<Value> = diagnostics.iter().map(diagnostic_to_lsp).collect();
                reports.push(json!({
                    "kind": "full",
                    "uri": uri.as_str(),
                    "version": null,
                    "items": items,
                }));
            }
        }
        response(id, json!({ "items": reports }))
    }

    async fn code_action(&self, id: &Value, params: Value) -> Value {
        let params: CodeActionParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return error_response(id, INVALID_PARAMS, e),
        };
        let range = match params.range.to_range() {
            Ok(range) => range,
            Err(e) => return error_response(id, INVALID_PARAMS, e.to_string()),
        };
        let Some(path) = file_uri_to_path(&params.text_document.uri) else {
            return response(id, json!([]));
        };
        let Some(engine) = self.engine() else {
            return response(id, json!([]));
        };
        let actions: Vec<Value> = match path_to_file_uri(&path) {
            Ok(uri) => engine
                .get_code_actions(&path, &range)
                .await
                .iter()
                .map(|edit| code_action(&uri, edit))
                .collect(),
            Err(e) => {
                tracing::warn!("{e}");
                Vec::new()
            }
        };
        response(id, Value::Array(actions))
    }

    async fn execute_command(&mut self, id: &Value, params: Value) -> Value {
        let params: ExecuteCommandParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return error_response(id, INVALID_PARAMS, e),
        };
        if params.command != REFRESH_COMMAND {
            return error_response(
                id,
                INVALID_PARAMS,
                format!("unknown command: {}", params.command),
            );
        }
        if let Phase::Running(engine) = &mut self.phase {
            tracing::info!("Manual refresh requested");
            engine.refresh().await;
        }
        response(id, Value::Null)
    }

    async fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::DiagnosticsChanged { paths } => self.publish(paths).await,
            EngineEvent::PreferenceIssue(issue) => {
                self.show_message(MessageType::Warning, &format!("lintlink: {issue}"))
                    .await;
            }
            EngineEvent::BackendFailed(error) => {
                self.show_message(
                    MessageType::Error,
                    &format!("lintlink: diagnostics run failed: {error}"),
                )
                .await;
            }
            EngineEvent::CheckerUnavailable { detail } => {
                self.show_message(
                    MessageType::Error,
                    &format!(
                        "lintlink: checker stopped after repeated crashes ({detail}); \
                         run {REFRESH_COMMAND} to restart it"
                    ),
                )
                .await;
            }
        }
    }

    /// Push what the store already holds for a newly opened document.
    ///
    /// Runs only report paths whose diagnostics changed, so without this a
    /// document opened after a sweep would stay blank until its next change.
    async fn publish_known(&mut self, path: PathBuf) {
        let Some(engine) = self.engine() else {
            return;
        };
        if engine.get_document_diagnostics(&path).await.is_empty() {
            return;
        }
        self.publish(vec![path]).await;
    }

    async fn on_checker_status(&mut self, status: SupervisorStatus) {
        if status.state == self.checker_state {
            return;
        }
        self.checker_state = status.state;
        let label = status.state.label();
        match status.state {
            SupervisorState::Crashed => {
                let exit = status.last_exit.as_deref().unwrap_or("no exit status");
                self.show_message(
                    MessageType::Warning,
                    &format!("lintlink: checker {label} ({exit})"),
                )
                .await;
            }
            // CheckerUnavailable already told the user.
            SupervisorState::Stopped if status.fatal => {}
            _ => {
                tracing::info!("Checker {label} after {} restarts", status.restarts);
                self.notify(
                    "window/logMessage",
                    message_params(MessageType::Info, &format!("lintlink: checker {label}")),
                )
                .await;
            }
        }
    }

    /// Push fresh diagnostics for the changed documents the client has open.
    async fn publish(&mut self, paths: Vec<PathBuf>) {
        let Phase::Running(engine) = &self.phase else {
            return;
        };
        let mut notifications = Vec::new();
        for path in paths.iter().filter(|path| engine.is_open(path)) {
            let uri = match path_to_file_uri(path) {
                Ok(uri) => uri,
                Err(e) => {
                    tracing::warn!("{e}");
                    continue;
                }
            };
            let diagnostics: Vec<Value> = engine
                .get_document_diagnostics(path)
                .await
                .iter()
                .map(diagnostic_to_lsp)
                .collect();
            tracing::debug!(
                "Publishing {} diagnostics for {}",
                diagnostics.len(),
                path.display()
            );
            notifications.push(json!({
                "uri": uri.as_str(),
                "diagnostics": diagnostics,
            }));
        }
        for mut params in notifications {
            self.version += 1;
            params["version"] = json!(self.version);
            self.notify("textDocument/publishDiagnostics", params).await;
        }
    }

    async fn show_message(&self, kind: MessageType, message: &str) {
        match kind {
            MessageType::Error => tracing::error!("{message}"),
            MessageType::Warning => tracing::warn!("{message}"),
            MessageType::Info => tracing::info!("{message}"),
        }
        self.notify("window/showMessage", message_params(kind, message))
            .await;
    }

    async fn notify(&self, method: &'static str, params: Value) {
        self.write(WriterCommand::Notify(Notification::new(method, params)))
            .await;
    }

    async fn send(&self, message: Value) {
        self.write(WriterCommand::Send(message)).await;
    }

    async fn write(&self, command: WriterCommand) {
        if self.writer.send(command).await.is_err() {
            tracing::warn!("LSP writer is gone; dropping outgoing message");
        }
    }
}

async fn recv_event(events: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn recv_status(
    checker: &mut Option<watch::Receiver<SupervisorStatus>>,
) -> Option<SupervisorStatus> {
    match checker {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => future::pending().await,
    }
}

/// Missing params deserialize like an empty object.
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}

fn document_path(params: Value) -> Option<PathBuf> {
    let params: TextDocumentParams = serde_json::from_value(params).ok()?;
    file_uri_to_path(&params.text_document.uri)
}

/// The git toplevel containing `workspace`, else `workspace` itself.
async fn project_root(workspace: &Path) -> PathBuf {
    let Ok(git) = which::which("git") else {
        return workspace.to_path_buf();
    };
    let output = Command::new(git)
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if toplevel.is_empty() {
                workspace.to_path_buf()
            } else {
                PathBuf::from(toplevel)
            }
        }
        Ok(_) => workspace.to_path_buf(),
        Err(e) => {
            tracing::debug!("git rev-parse failed in {}: {e}", workspace.display());
            workspace.to_path_buf()
        }
    }
}
