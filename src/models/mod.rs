// SPDX-License-Identifier: MIT

//! Data models for the reward pipeline.

pub mod activity;
pub mod sync;
pub mod transaction;
pub mod user;
pub mod webhook;

pub use activity::{Activity, ActivityType};
pub use sync::SyncState;
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
pub use user::{ProviderConnection, User};
pub use webhook::WebhookEventRecord;
