//! Middleware module
//!
//! Contains the credential gate run before any call is routed.

pub mod auth;
