pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod membership;
pub mod service;
pub mod store;
pub mod transaction;
pub mod utils;
