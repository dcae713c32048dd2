//! # Repo Tutor
//!
//! Turns a source repository into a beginner-friendly, multi-chapter
//! tutorial using an LLM, and keeps it up to date incrementally: prompts
//! and their responses are cached, and a rerun over a changed checkout
//! only rewrites the chapters the change touches.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌─────────────┐
//! │  Crawler   │──▶│  Pipeline (six stages)   │──▶│  Markdown   │
//! │ local dir  │   │ identify → … → combine   │   │  index.md   │
//! └────────────┘   └──────┬─────────────┬─────┘   │  NN_*.md    │
//!                         │             │         └─────────────┘
//!                         ▼             ▼
//!                  ┌────────────┐ ┌─────────────┐
//!                  │ LLM client │ │ Repo cache  │
//!                  │ + prompt   │ │ JSON per    │
//!                  │ cache (SQL)│ │ repository  │
//!                  └────────────┘ └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tutor init                          # create cache database
//! tutor generate ./my-project         # write ./output/my_project/
//! tutor plan ./my-project             # what a rerun would regenerate
//! tutor cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`connector_fs`] | Local directory crawler |
//! | [`llm`] | OpenAI and Anthropic clients |
//! | [`prompts`] | Stage prompt templates |
//! | [`pipeline`] | Orchestrator and the six stages |
//! | [`prompt_store`] | SQLite prompt cache store |
//! | [`repo_store`] | JSON repository cache store |
//! | [`progress`] | Progress reporters |
//! | [`export`] | Tutorial file output |
//! | [`generate`] | `generate` / `plan` commands |
//! | [`cache_cmd`] | `cache` subcommands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//!
//! The I/O-free logic lives in [`repo_tutor_core`].

pub mod cache_cmd;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod export;
pub mod generate;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod prompt_store;
pub mod prompts;
pub mod repo_store;
