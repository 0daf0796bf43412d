pub mod cluster;
pub mod config;
pub mod driver;
pub mod sampling;
