pub mod config;
pub mod delivery;
pub mod geo;
pub mod server;
pub mod zones;
