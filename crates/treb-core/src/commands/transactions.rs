//! Settling pending transactions and multisig proposals.

use crate::context::AppContext;
use crate::error::Result;
use crate::registry::{Upsert, transaction_id};

pub struct TransactionsCommand<'a> {
    ctx: &'a AppContext,
}

impl<'a> TransactionsCommand<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Accepts either a `tx-<hash>` id or a bare hash.
    fn normalize_id(id: &str) -> String {
        if id.starts_with("tx-") {
            id.to_ascii_lowercase()
        } else {
            transaction_id(id)
        }
    }

    pub fn mark_executed(&self, id: &str, block_number: u64) -> Result<Upsert> {
        self.ctx
            .registry()
            .mark_transaction_executed(&Self::normalize_id(id), block_number)
    }

    pub fn mark_failed(&self, id: &str) -> Result<Upsert> {
        self.ctx
            .registry()
            .mark_transaction_failed(&Self::normalize_id(id))
    }

    pub fn execute_safe(
        &self,
        safe_tx_hash: &str,
        execution_tx_hash: &str,
        block_number: u64,
    ) -> Result<Upsert> {
        self.ctx
            .registry()
            .execute_safe_transaction(safe_tx_hash, execution_tx_hash, block_number)
    }
}
