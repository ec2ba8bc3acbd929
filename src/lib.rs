pub mod admission;
pub mod config;
pub mod db;
pub mod feed;
pub mod fetch;
pub mod model;
pub mod poller;
pub mod sanitize;
pub mod store;
