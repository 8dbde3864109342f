#![doc = "catalog-sync-core: engine logic for mirroring an upstream product catalogue into a document store."]

//! This crate holds every piece of the synchronisation engine that does not talk
//! to the network directly: the collaborator traits, the payload helpers, the
//! checkpoint/staleness bookkeeping, filtering, reference discovery and the
//! phase orchestrator.
//!
//! Concrete HTTP clients for the upstream catalogue and the document store live
//! in the `catalog-sync` binary crate.
//!
//! # Usage
//! Build a [`config::SyncConfig`], pick a [`contract::CatalogSource`] and a
//! [`contract::DocumentStore`], then hand them to [`synchronise::Synchroniser`].

pub mod annotator;
pub mod clock;
pub mod collections;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod error;
pub mod pager;
pub mod payload;
pub mod scheduler;
pub mod store;
pub mod synchronise;
pub mod taxonomy;
