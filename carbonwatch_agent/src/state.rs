//! Shared agent state: monitor, calculator, history and the cached latest sample.

use crate::calculator::CarbonCalculator;
use crate::history::HistoryBuffer;
use crate::monitor::ActivityMonitor;
use crate::optimizer::{OptimizationRecord, Optimizer};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<ActivityMonitor>,
    pub calculator: Arc<CarbonCalculator>,
    pub optimizer: Arc<Optimizer>,
    // Written only by the collector
    pub history: Arc<HistoryBuffer>,
    pub optimization: Arc<RwLock<OptimizationRecord>>,

    // Last serialized sample for fast WS responses
    pub last_json: Arc<RwLock<String>>,
    pub hostname: String,
}

impl AppState {
    pub fn new(monitor: Arc<ActivityMonitor>, calculator: Arc<CarbonCalculator>) -> Self {
        Self {
            monitor,
            calculator,
            optimizer: Arc::new(Optimizer::new()),
            history: Arc::new(HistoryBuffer::default()),
            optimization: Arc::new(RwLock::new(OptimizationRecord::default())),
            last_json: Arc::new(RwLock::new(String::new())),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".into()),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = Arc::new(optimizer);
        self
    }
}
