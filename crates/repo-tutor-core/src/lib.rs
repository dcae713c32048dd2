//! # Repo Tutor Core
//!
//! Pure logic for incremental documentation generation: data models,
//! content packing, structured-output validation, prompt caching, change
//! detection and regeneration planning.
//!
//! This crate contains no tokio, sqlx, filesystem or network I/O. The
//! `repo-tutor` app crate supplies the stores, model clients and the
//! pipeline that drives them.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Snapshot, analysis and cache records |
//! | [`error`] | Pipeline and LLM error taxonomy |
//! | [`hash`] | Content hashes and repository ids |
//! | [`pack`] | Token-budget-aware content packer |
//! | [`validate`] | Fenced YAML extraction and stage schemas |
//! | [`prompt_cache`] | Exact + fuzzy prompt cache |
//! | [`change`] | Change detector |
//! | [`plan`] | Regeneration planner |
//! | [`chapter`] | Chapter slugs, links and narrative fold |
//! | [`render`] | Index and chapter rendering |
//! | [`llm`] | Model client trait |
//! | [`store`] | Store traits and in-memory stores |

pub mod change;
pub mod chapter;
pub mod error;
pub mod hash;
pub mod llm;
pub mod models;
pub mod pack;
pub mod plan;
pub mod prompt_cache;
pub mod render;
pub mod store;
pub mod validate;
