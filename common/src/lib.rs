// Common library for shared code across scheduler and API

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod connector;
pub mod credential;
pub mod db;
pub mod errors;
pub mod executor;
pub mod lock;
pub mod models;
pub mod reconcile;
pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod transfer;
