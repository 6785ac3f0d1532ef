//! SeaORM entities for the tables the engine reads and writes.
//!
//! The rows are created by the surrounding management service; the engine
//! only reads credentials, updates discovery status, inserts provisions and
//! appends polling metrics.

pub mod credential;
pub mod discovery;
pub mod polling_metric;
pub mod provision;

pub mod prelude {
    pub use super::credential::Entity as Credential;
    pub use super::credential::Model as CredentialModel;

    pub use super::discovery::Entity as Discovery;
    pub use super::discovery::Model as DiscoveryModel;

    pub use super::provision::Entity as Provision;
    pub use super::provision::Model as ProvisionModel;

    pub use super::polling_metric::Entity as PollingMetric;
    pub use super::polling_metric::Model as PollingMetricModel;
}
