pub mod cognito_routes;
pub mod cognito_service;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state_store;
