pub mod app;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod indicator;
pub mod model;
pub mod notify;
pub mod runtime;
pub mod tracker;
