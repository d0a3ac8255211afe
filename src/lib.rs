pub mod config;
pub mod logger;
pub mod playback;
pub mod server;

pub use config::*;
pub use logger::*;
pub use server::RelayApplicationServer;
