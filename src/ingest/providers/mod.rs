// src/ingest/providers/mod.rs
pub mod courtlistener;
pub mod push;
pub mod rss;
