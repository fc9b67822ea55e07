// lumisync-api: Async Rust client for the lumisync lighting cloud (auth, REST, push stream)

pub mod auth;
pub mod client;
pub mod error;
pub mod stream;
pub mod transport;

pub use auth::{Credentials, SESSION_SAFETY_MARGIN, Session, SessionManager};
pub use client::{ByteStream, CloudClient, Endpoints, ThemeRecord};
pub use error::Error;
pub use transport::{TlsMode, TransportConfig};
