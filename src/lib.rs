pub mod app;
pub mod builder;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod ftp;
pub mod lister;
pub mod output;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod thredds;
pub mod tree;
