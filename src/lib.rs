#![doc = "catalog-sync: CLI and network backends for the catalogue synchronisation engine."]

//! The engine itself lives in `catalog-sync-core`. This crate wires it to the
//! outside world: YAML configuration, the upstream REST client, the
//! Elasticsearch document store and the command line.

pub mod cli;
pub mod elasticsearch;
pub mod load_config;
pub mod logging;
pub mod upstream;
