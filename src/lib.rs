// src/lib.rs

//! Beatmap catalog mirror.
//!
//! Crawls the upstream catalog API under its rate limits and keeps a local
//! document index of beatmap sets and their maps up to date.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
