// src/engine/mod.rs

//! Proctored assessment session engine.
//!
//! The loader decides whether a session may start. Once it does, one
//! runtime task owns an `AssessmentSession` and feeds it ticks, browser
//! signals, answer selections and finalize requests in arrival order.

pub mod answers;
pub mod audit;
pub mod coordinator;
pub mod countdown;
pub mod loader;
pub mod monitor;
pub mod registry;
pub mod runtime;
pub mod session;

pub use registry::SessionRegistry;
pub use runtime::{SessionContext, SessionHandle};
pub use session::{AssessmentSession, SessionNotice};
