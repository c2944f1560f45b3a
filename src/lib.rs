pub mod config;
pub mod database;
pub mod dataset;
pub mod domain;
pub mod environment;
pub mod error;
pub mod fetch;
pub mod npy;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod simulation;
pub mod subset;
