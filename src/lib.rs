pub mod app;
pub mod combiner;
pub mod config;
pub mod correspondence;
pub mod domain;
pub mod error;
pub mod geo;
pub mod model;
pub mod ncbi;
pub mod output;
pub mod parser;
pub mod quantitation;
pub mod store;
pub mod string_distance;
pub mod values;
