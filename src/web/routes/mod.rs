pub mod discovery_routes;
pub mod provision_routes;
