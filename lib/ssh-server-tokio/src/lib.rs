//! The async Connection Driver (§4.6's "Async variant"): the same
//! `ssh-transport` state machine and `ssh-connection` Message Dispatcher
//! used by the blocking driver, driven here by a `tokio`-async
//! `progress` loop grounded in the teacher's
//! `cluelessh-tokio::ServerConnection::progress`.

pub mod server;

pub use server::{BindError, ConnectionError, ServerConnection, ServerListener};
