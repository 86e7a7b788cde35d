// SPDX-License-Identifier: MIT

//! Business logic services.

pub mod jobs;
pub mod ledger;
pub mod provider;
pub mod rewards;
pub mod signature;
pub mod sync;

pub use jobs::{ContinueBackfillPayload, ProcessActivityPayload, TasksService};
pub use ledger::LedgerService;
pub use provider::{ProviderActivity, ProviderClient, ProviderService};
pub use sync::{IngestOutcome, SyncService};
