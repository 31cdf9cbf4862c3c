pub mod gateway;
pub mod reconciliation;
