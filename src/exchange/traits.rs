use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::events::{AccountSnapshot, OrderRequest, OrderResult, OrderStatusRecord, PositionSnapshot};

pub type BackendResult<T> = Result<T, BackendError>;

/// Source of account state for risk evaluation.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn get_account_info(&self) -> BackendResult<AccountSnapshot>;
}

/// Broker the execution service submits orders to.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> BackendResult<()>;
    async fn disconnect(&self) -> BackendResult<()>;

    /// `Ok` with `success == false` is a clean refusal by the broker;
    /// `Err` is a fault the caller may retry.
    async fn place_order(&self, order: OrderRequest) -> BackendResult<OrderResult>;

    async fn get_account_info(&self) -> BackendResult<AccountSnapshot>;
    async fn get_positions(&self) -> BackendResult<HashMap<String, PositionSnapshot>>;
    async fn get_order_status(&self, order_id: &str) -> BackendResult<OrderStatusRecord>;
}

/// Account provider that always reports a fixed balance and no positions.
#[derive(Debug, Clone)]
pub struct StaticAccountProvider {
    snapshot: AccountSnapshot,
}

impl StaticAccountProvider {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn with_balance(balance: f64) -> Self {
        Self::new(AccountSnapshot::with_balance(balance))
    }
}

#[async_trait]
impl AccountProvider for StaticAccountProvider {
    async fn get_account_info(&self) -> BackendResult<AccountSnapshot> {
        Ok(self.snapshot.clone())
    }
}
