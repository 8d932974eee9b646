// src/protocol/mod.rs

//! Wire protocol between the client controller and the worker.
//!
//! Newline-delimited JSON over a Unix stream socket. The client sends
//! [`Request`]s; the worker answers each with exactly one
//! [`WorkerMessage::Reply`] carrying the same id, in request order, and
//! pushes [`WorkerMessage::Log`] events while a command runs.

pub mod frame;
pub mod messages;

pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_BYTES};
pub use messages::{RemoteError, RemoteErrorKind, Reply, Request, RequestBody, WorkerMessage};
