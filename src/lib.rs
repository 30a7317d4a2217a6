//! Terminal client for a three-stage LLM council.
//!
//! A send streams `data: ` frames from the backend; [`protocol`] decodes them
//! into stage events, [`session::state`] folds those into the conversation
//! transcript, and [`session::runner`] drives one send end to end, rolling
//! the transcript back if the stream fails.

pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod display;
pub mod error;
pub mod protocol;
pub mod replay;
pub mod session;

pub use app::ClientSession;
pub use error::{ApiError, PreconditionError, SendError};
