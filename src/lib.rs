//! Billhook - recurring billing and software licensing server for digital products
//!
//! This library provides the core functionality for the billhook service,
//! including the subscription lifecycle, the license store and its remote
//! activation API, payment gateway webhook ingestion, and renewal reminders.

pub mod billing;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extractors;
pub mod gateways;
pub mod handlers;
pub mod id;
pub mod licensing;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod reminders;
pub mod util;
