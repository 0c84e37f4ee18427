//! Helpers shared by the drivers.

pub mod tls;

pub use tls::{SslMode, TlsBuilder};
