//! Function-name routing
//!
//! This module is the consumer of the sniffed parameter: it picks a backend
//! pool from the name a connection's first request carried and relays the
//! connection to it.

pub mod backend;
pub mod upstream;

pub use backend::{Backend, BackendPool, BackendState, RouteTable};
pub use upstream::ProxyHandler;
