use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::events::{OrderResult, OrderStatus};
use crate::gateway::CallbackError;
use crate::services::orchestrator::OrderCallback;

/// One JSONL line per order outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: String,
    pub correlation_id: String,
    pub symbol: String,
    pub success: bool,
    pub status: OrderStatus,
    pub order_id: Option<String>,
    pub qty: Option<u64>,
    pub price: Option<f64>,

    /// qty * price when both are known
    pub notional: Option<f64>,
    pub error: Option<String>,
    pub execution_time_ms: Option<f64>,
}

impl From<&OrderResult> for JournalEntry {
    fn from(result: &OrderResult) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            correlation_id: result.correlation_id.clone(),
            symbol: result.symbol.clone(),
            success: result.success,
            status: result.status,
            order_id: result.order_id.clone(),
            qty: result.filled_quantity,
            price: result.filled_price,
            notional: match (result.filled_quantity, result.filled_price) {
                (Some(q), Some(p)) => Some(q as f64 * p),
                _ => None,
            },
            error: result.error.clone(),
            execution_time_ms: result.execution_time_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalSummary {
    pub total_orders: u64,
    pub filled: u64,
    pub failed: u64,
    pub circuit_open: u64,
    pub total_notional: f64,

    /// Orders per symbol, successful or not
    pub per_symbol: HashMap<String, u64>,
}

/// Order-callback sink writing a JSONL journal plus a rolling summary file
/// (`journal_summary.json`) next to it.
#[derive(Clone)]
pub struct TradeJournal {
    summary: Arc<Mutex<JournalSummary>>,
    log_path: PathBuf,
}

impl TradeJournal {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        let log_path = log_path.into();
        info!("📒 [JOURNAL] Writing orders to {}", log_path.display());
        Self {
            summary: Arc::new(Mutex::new(JournalSummary::default())),
            log_path,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn summary(&self) -> JournalSummary {
        self.summary.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn summary_path(&self) -> PathBuf {
        self.log_path.with_file_name("journal_summary.json")
    }

    pub fn record(&self, result: &OrderResult) -> Result<(), CallbackError> {
        let entry = JournalEntry::from(result);

        if let Ok(mut s) = self.summary.lock() {
            s.total_orders += 1;
            match result.status {
                _ if result.success => s.filled += 1,
                OrderStatus::CircuitOpen => {
                    s.failed += 1;
                    s.circuit_open += 1;
                }
                _ => s.failed += 1,
            }
            if let Some(notional) = entry.notional {
                s.total_notional += notional;
            }
            *s.per_symbol.entry(result.symbol.clone()).or_insert(0) += 1;
        }

        self.append_jsonl(&entry)?;
        self.flush_summary()
    }

    /// Adapter for [`crate::services::orchestrator::Orchestrator::add_order_callback`].
    pub fn callback(&self) -> OrderCallback {
        let journal = self.clone();
        Box::new(move |result: &OrderResult| journal.record(result))
    }

    fn append_jsonl(&self, entry: &JournalEntry) -> Result<(), CallbackError> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let line = serde_json::to_string(entry)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    fn flush_summary(&self) -> Result<(), CallbackError> {
        let summary = self.summary();
        if let Err(e) = std::fs::write(self.summary_path(), serde_json::to_vec_pretty(&summary)?) {
            error!("📒 [JOURNAL] Failed to flush summary: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
