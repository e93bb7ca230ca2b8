pub mod client;
pub mod error;
pub mod poller;

pub use client::{GatewayClient, SessionSource};
pub use error::GatewayError;
pub use poller::{ConnectionState, PollEvent, Poller, RefreshHandle};
