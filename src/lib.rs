//! One-shot backup of a Terraform Cloud workspace's current state into
//! object storage, with credentials resolved from a secret store at runtime.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
