pub mod availability;
pub mod collector;
pub mod credentials;
pub mod discovery;
pub mod polling;
pub mod protocol;
pub mod provisioning;

#[cfg(test)]
pub(crate) mod testing;
