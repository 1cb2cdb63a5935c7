pub mod configuration;
pub mod domain;
pub mod handlers;
pub mod ports;
pub mod repositories;
pub mod routes;
pub mod startup;
