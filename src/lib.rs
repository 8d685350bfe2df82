pub mod audit;
pub mod auth;
pub mod clock;
pub mod configuration;
pub mod email_client;
pub mod emergency;
pub mod error;
pub mod flows;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod single_use;
pub mod startup;
pub mod store;
pub mod telemetry;
pub mod validators;
