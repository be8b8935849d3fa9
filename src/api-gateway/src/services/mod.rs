//! Core services for the API Gateway

pub mod directory;
pub mod maintenance;
