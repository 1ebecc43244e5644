pub mod client;
pub mod transport;
pub mod wire;

pub use client::{ConfigSyncClient, SyncState};
pub use transport::{ConfigTransport, HttpTransport};
