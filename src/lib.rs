//! Vault risk alerts for the Inter Protocol vault factory.
//!
//! Watches vault, quote and asset catalog keys in chain storage, recomputes
//! each followed vault's collateralization ratio and emails the owners of
//! notifiers whose threshold was crossed.

pub mod config;
pub mod email;
pub mod follower;
pub mod ratio;
pub mod store;
pub mod vstorage;
