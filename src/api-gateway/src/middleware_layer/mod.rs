//! Middleware modules for the API Gateway

pub mod gate;
