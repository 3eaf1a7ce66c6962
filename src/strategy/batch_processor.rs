//! User-partitioned batch execution
//!
//! A batch is split by user. Each user's commands run in file order inside
//! one tokio task, and different users' tasks run in parallel. The balance
//! store's per-user locks would serialize a user anyway; partitioning keeps
//! the order deterministic instead of leaving it to lock acquisition.

use std::collections::HashMap;

use crate::core::TransactionCoordinator;
use crate::strategy::apply_command;
use crate::types::{LedgerCommand, LedgerError, Receipt, UserId};
use tracing::error;

/// Outcome of one command within a batch
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: LedgerCommand,
    pub result: Result<Receipt, LedgerError>,
}

#[derive(Debug, Clone)]
pub struct BatchProcessor {
    coordinator: TransactionCoordinator,
}

impl BatchProcessor {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    /// Group commands by user, preserving each user's relative order
    pub fn partition_by_user(
        &self,
        batch: Vec<LedgerCommand>,
    ) -> HashMap<UserId, Vec<LedgerCommand>> {
        let mut user_batches: HashMap<UserId, Vec<LedgerCommand>> = HashMap::new();

        for command in batch {
            user_batches
                .entry(command.request.user_id.clone())
                .or_default()
                .push(command);
        }

        user_batches
    }

    /// Run one user's commands strictly in order
    pub async fn process_user_commands(&self, commands: Vec<LedgerCommand>) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let result = apply_command(&self.coordinator, &command).await;
            results.push(CommandResult { command, result });
        }

        results
    }

    /// Run a batch, one task per user, and wait for all of them
    ///
    /// Results are grouped by user; their order across users is unspecified.
    pub async fn process_batch(&self, batch: Vec<LedgerCommand>) -> Vec<CommandResult> {
        let user_batches = self.partition_by_user(batch);

        let mut tasks = Vec::with_capacity(user_batches.len());
        for (_user_id, commands) in user_batches {
            let processor = self.clone();
            tasks.push(tokio::spawn(async move {
                processor.process_user_commands(commands).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(user_results) => results.extend(user_results),
                Err(e) => error!(error = %e, "user task failed"),
            }
        }

        results
    }
}
