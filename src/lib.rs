pub mod api;
pub mod config;
pub mod message;
pub mod process;
pub mod reactor;
pub mod rib;
pub mod session;
pub mod signal;
pub mod utils;

pub use config::ServerConfig;
pub use reactor::serve;
