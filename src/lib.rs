pub mod db;
pub mod engine;
pub mod server;
pub mod web;
