//! Streamable HTTP transport: routing, admission control and per-call sessions

pub mod identity;
pub mod response;
pub mod router;
pub mod server;
pub mod session;

pub use identity::client_key;
pub use router::{classify, Route};
pub use server::{limiter_for, HttpTransport, RunningServer};
pub use session::{SessionFactory, SessionInstance};
