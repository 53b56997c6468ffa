//! Integration test modules, all driving the server over in-memory streams.

mod server;
mod sync;
