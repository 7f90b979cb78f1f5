// src/models/mod.rs

pub mod attempt;
pub mod log_event;
pub mod question;
pub mod session;
