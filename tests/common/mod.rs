//! Shared test utilities and fixtures
//!
//! A JSON-RPC client speaking to an in-process server over duplex streams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lintlink_lsp::codec::{FrameReader, FrameWriter};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use url::Url;

const TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    server: JoinHandle<anyhow::Result<()>>,
    /// Notifications that arrived while waiting for a response.
    stashed: VecDeque<Value>,
    next_id: i64,
}

impl TestClient {
    pub fn start() -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);
        Self {
            reader: FrameReader::new(client_read),
            writer: FrameWriter::new(client_write),
            server: tokio::spawn(lintlink_lsp::serve(server_read, server_write)),
            stashed: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Send a request and return the whole response frame.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        self.writer
            .write(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await
            .unwrap();
        loop {
            let frame = self.read().await;
            if frame.get("method").is_some() {
                self.stashed.push_back(frame);
            } else if frame["id"] == id {
                return frame;
            }
        }
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.writer
            .write(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
            .unwrap();
    }

    /// Wait for the next notification named `method`, skipping others.
    pub async fn notification(&mut self, method: &str) -> Value {
        if let Some(index) = self.stashed.iter().position(|n| n["method"] == method) {
            return self.stashed.remove(index).unwrap();
        }
        loop {
            let frame = self.read().await;
            if frame["method"] == method {
                return frame;
            }
        }
    }

    /// `initialize` for `root` with `options`, then `initialized`.
    pub async fn initialize(&mut self, root: &Path, options: Value) -> Value {
        let response = self
            .request(
                "initialize",
                json!({
                    "processId": null,
                    "rootUri": file_uri(root),
                    "capabilities": {},
                    "initializationOptions": options,
                }),
            )
            .await;
        assert!(response.get("error").is_none(), "initialize failed: {response}");
        self.notify("initialized", json!({})).await;
        response
    }

    pub async fn open(&mut self, path: &Path) {
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": file_uri(path),
                    "languageId": "rust",
                    "version": 1,
                    "text": "",
                }
            }),
        )
        .await;
    }

    /// `shutdown` then `exit`; the server must stop cleanly.
    pub async fn shutdown(mut self) {
        let response = self.request("shutdown", Value::Null).await;
        assert_eq!(response["result"], Value::Null);
        self.notify("exit", Value::Null).await;
        self.join().await;
    }

    /// Wait for the server task to finish and assert it succeeded.
    pub async fn join(self) {
        let Self {
            reader,
            writer,
            server,
            ..
        } = self;
        // Both halves share the stream; it only closes once both are gone.
        drop(reader);
        drop(writer);
        tokio::time::timeout(TIMEOUT, server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }

    async fn read(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
            .expect("server closed the stream")
    }
}

pub fn file_uri(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

/// A project directory with a canonical root path.
pub struct Project {
    pub dir: tempfile::TempDir,
    pub root: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        Self { dir, root }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write_export(&self, contents: &str) {
        std::fs::write(self.path(".bacon-locations"), contents).unwrap();
    }
}

/// Export backend settings that never spawn a checker.
pub fn export_options(extra: Value) -> Value {
    let mut options = json!({
        "useExportBackend": true,
        "runCheckerInBackground": false,
        "validatePreferences": false,
        "updateOnSaveWaitMillis": 20,
        "synchronizeAllOpenFilesWaitMillis": 60000,
    });
    if let (Some(base), Some(extra)) = (options.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    options
}

/// One export-file record. Lines and columns are 1-based.
pub fn export_record(
    level: &str,
    file: &str,
    line: u32,
    (start, end): (u32, u32),
    message: &str,
    replacement: &str,
) -> String {
    format!("{level}|:|{file}|:|{line}|:|{line}|:|{start}|:|{end}|:|{message}|:||:|{replacement}")
}
