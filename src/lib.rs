//! mfproxy - function-routing TCP proxy
//!
//! Sniffs the first request line of each connection, pulls out the function
//! name it targets and forwards the untouched byte stream to a backend
//! serving that function.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
pub mod sniff;
