//! RSSKing - a ranked RSS curation pipeline
//!
//! This crate fetches many RSS feeds on a schedule, scores every entry
//! with a multi-signal relevance formula, collapses the same story
//! reported by several feeds into one record with merged source badges,
//! caps each feed's contribution, and upserts the surviving ranked
//! items into SQLite keyed by URL.

pub mod config;
pub mod correlate;
pub mod db;
pub mod fetch;
pub mod merge;
pub mod pipeline;
pub mod score;
