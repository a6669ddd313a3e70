//! # Capture OS
//!
//! License-gated capture service: a web page or a text snippet goes in, a
//! structured knowledge page comes out in the customer's Notion database.
//!
//! ## Architecture
//!
//! ```text
//!  /auth ─▶ Notion OAuth ─▶ /callback ─▶ token bound ─▶ discovery (retry, then browser poll)
//!                                                            │
//!                                                            ▼
//!  /capture ─▶ 202 ─▶ spawned job: resolve target ─▶ acquire ─▶ extract (LLM) ─▶ build page ─▶ write
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! capos init                         # create the license database
//! capos keygen --count 50 --channel TB
//! capos admin first 5
//! capos serve                        # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | License records and capture payloads |
//! | [`store`] | License store trait with SQLite and in-memory backends |
//! | [`notion`] | Notion OAuth, search, and page client |
//! | [`resolver`] | Target-database discovery state machine |
//! | [`acquire`] | Page fetching and main-text extraction |
//! | [`llm`] | Chat-completion client |
//! | [`extractor`] | Structured knowledge extraction |
//! | [`document`] | Notion page builder |
//! | [`pipeline`] | Background capture jobs |
//! | [`server`] | HTTP server |
//! | [`ratelimit`] | Per-IP quotas |
//! | [`views`] | HTML for the OAuth flow |
//! | [`keygen`] | Batch key issuance |
//! | [`admin`] | Operator commands |
//! | [`stats`] | Database overview |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod acquire;
pub mod admin;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod extractor;
pub mod keygen;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod notion;
pub mod pipeline;
pub mod ratelimit;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod store;
pub mod testing;
pub mod views;
