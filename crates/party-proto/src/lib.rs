pub mod config;
pub mod party;
pub mod platform;
pub mod protocol;
pub mod state;
