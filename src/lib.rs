pub mod config;
pub mod csv;
pub mod domain;
pub mod engine;
pub mod rates;
pub mod replay;
pub mod webhook;
