pub mod engine;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod services;
pub mod state;
