pub mod bus;
pub mod config;
