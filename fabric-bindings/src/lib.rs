//! Binding interceptors for fabric wires.
//!
//! [`common`] holds the interceptors every binding shares, [`ftp`] and [`ws`] the transport
//! specific ones.
pub mod common;
pub mod ftp;
pub mod ws;
