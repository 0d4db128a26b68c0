//! Chat-driven app builder: a generative model writes HTML, the host renders
//! it in a sandboxed preview and lets the user point at elements to refine.

pub mod api;
pub mod attachments;
pub mod config;
pub mod controller;
pub mod dictation;
pub mod extract;
pub mod logging;
pub mod preview;
pub mod protocol;
pub mod session;
pub mod state;
pub mod tools;

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

pub use crate::api::{ApiError, GeminiClient, ModelClient};
pub use crate::config::Config;
pub use crate::controller::{Refinement, Rejection, SendOutcome, Studio};
pub use crate::extract::extract_code;
pub use crate::preview::DeviceFrame;
pub use crate::session::SessionStore;
pub use crate::state::{Message, Role, TokenUsage};

/// Global tokio runtime for async I/O. 2 worker threads.
pub static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime")
});
