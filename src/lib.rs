// SPDX-License-Identifier: MIT

//! fitledger: fitness activities in, reward tokens out.
//!
//! This crate provides the backend API that receives provider webhooks,
//! backfills historical activities, computes deterministic token rewards
//! and maintains an append-only ledger with materialized balances.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::Db;
use services::{LedgerService, ProviderService, SyncService, TasksService};

/// Shared application state. Services are constructed once at startup and
/// shared across requests, so token caches and per-user locks are
/// instance-wide.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub provider: ProviderService,
    pub ledger: LedgerService,
    pub sync: SyncService,
    pub tasks: TasksService,
}
