//! Worker process: poll loop, heartbeats, handlers and callbacks.
//!
//! - `worker`: poll loop, zombie sweep, per-job task lifecycle
//! - `heartbeat`: per-job liveness writer bound to a cancellation token
//! - `handlers`: one handler per job kind, dispatched by `match`
//! - `callback`: POST of the terminal job view

pub mod callback;
pub mod handlers;
pub mod heartbeat;
pub mod worker;

pub use callback::CallbackNotifier;
pub use handlers::{HandlerDeps, JobDispatcher, JobOutcome};
pub use heartbeat::spawn_heartbeat;
pub use worker::{NO_HANDLER_ERROR, Worker};
