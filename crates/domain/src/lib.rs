//! `tether-domain`: shared configuration, error and trace types.
//!
//! Kept free of any networking so that embedding applications can
//! deserialize the `[mcp]` configuration without pulling in the client.

pub mod config;
pub mod error;
pub mod trace;
