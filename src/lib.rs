//! Tollgate - Request Admission Control
//!
//! This crate decides, for every inbound API request, whether it may proceed.
//! It resolves the caller from a signed bearer token, enforces a global
//! per-address limit and optional per-route limits over moving windows, and
//! escalates addresses that keep exhausting the global limit into temporary
//! bans. Counter state lives in memory or in Redis so that several processes
//! can share one quota.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod token;
