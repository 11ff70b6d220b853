//! Per-stock detection pipeline and batch runs
//!
//! For one stock the pipeline is strictly sequential: Block 1 candidates are
//! persisted first so each has an id before its Block 2 scan runs. Different
//! stocks are independent and may run in parallel.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use volblock::prelude::*;
//!
//! let stocks = Arc::new(InMemoryStockRepository::new());
//! let samsung = Stock::new(StockId(1), "005930", "Samsung Electronics", Market::Kospi).unwrap();
//! stocks.insert(samsung).unwrap();
//!
//! let orchestrator = DetectionOrchestrator::new(
//!     stocks,
//!     InMemoryPriceDataRepository::new(),
//!     InMemoryBlockRepository::new(),
//! );
//!
//! let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
//! // No price history loaded
//! let err = orchestrator.detect_for_stock("005930", start, end, None).unwrap_err();
//! assert!(matches!(err, DetectionError::InsufficientData { .. }));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::detectors::{Block1Scanner, Block2Scanner};
use crate::repository::{BlockRepository, PriceDataRepository, StockRepository};
use crate::settings::DetectionSettings;
use crate::{BlockKey, DetectionError, Result, Stock, StockId, VolumeBlockEvent};

// ============================================================
// REPORTS
// ============================================================

/// Events persisted for one stock
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    pub stock_id: StockId,
    pub stock_code: String,
    pub stock_name: String,
    pub block1: Vec<VolumeBlockEvent>,
    pub block2: Vec<VolumeBlockEvent>,
}

impl DetectionReport {
    #[inline]
    pub fn block1_count(&self) -> usize {
        self.block1.len()
    }

    #[inline]
    pub fn block2_count(&self) -> usize {
        self.block2.len()
    }

    /// No qualifying events
    pub fn is_empty(&self) -> bool {
        self.block1.is_empty() && self.block2.is_empty()
    }
}

/// How a batch entry names its stock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StockRef {
    Id(StockId),
    Code(String),
}

impl fmt::Display for StockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockRef::Id(id) => write!(f, "#{id}"),
            StockRef::Code(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockFailure {
    pub stock: StockRef,
    pub error: DetectionError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StockOutcome {
    Detected(DetectionReport),
    Failed(StockFailure),
}

impl StockOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, StockOutcome::Detected(_))
    }

    pub fn report(&self) -> Option<&DetectionReport> {
        match self {
            StockOutcome::Detected(report) => Some(report),
            StockOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StockFailure> {
        match self {
            StockOutcome::Detected(_) => None,
            StockOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// Result of a batch run. Outcomes keep the input order; stocks never reached
/// because of cancellation only show up in `cancelled`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub outcomes: Vec<StockOutcome>,
    pub cancelled: usize,
}

impl BatchReport {
    /// Stocks with at least one event
    pub fn succeeded(&self) -> usize {
        self.reports().filter(|r| !r.is_empty()).count()
    }

    /// Stocks processed without error but with no qualifying events
    pub fn skipped(&self) -> usize {
        self.reports().filter(|r| r.is_empty()).count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn block1_total(&self) -> usize {
        self.reports().map(DetectionReport::block1_count).sum()
    }

    pub fn block2_total(&self) -> usize {
        self.reports().map(DetectionReport::block2_count).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.cancelled == 0
    }

    pub fn reports(&self) -> impl Iterator<Item = &DetectionReport> {
        self.outcomes.iter().filter_map(StockOutcome::report)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StockFailure> {
        self.outcomes.iter().filter_map(StockOutcome::failure)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stocks: {} succeeded, {} skipped, {} failed, {} cancelled ({} Block 1, {} Block 2)",
            self.total,
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.cancelled,
            self.block1_total(),
            self.block2_total()
        )
    }
}

// ============================================================
// CANCELLATION
// ============================================================

/// Cooperative stop signal, checked between stocks
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================
// ORCHESTRATOR
// ============================================================

pub struct DetectionOrchestrator<S, P, B> {
    stocks: S,
    prices: P,
    blocks: B,
    settings: DetectionSettings,
}

impl<S, P, B> DetectionOrchestrator<S, P, B>
where
    S: StockRepository,
    P: PriceDataRepository,
    B: BlockRepository,
{
    pub fn new(stocks: S, prices: P, blocks: B) -> Self {
        Self {
            stocks,
            prices,
            blocks,
            settings: DetectionSettings::default(),
        }
    }

    /// Replace the settings used when a call passes none
    pub fn with_settings(mut self, settings: DetectionSettings) -> Result<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn blocks(&self) -> &B {
        &self.blocks
    }

    /// Detect and persist Block 1 and Block 2 events of one stock over `[start, end]`.
    pub fn run(
        &self,
        stock_id: StockId,
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
    ) -> Result<DetectionReport> {
        let settings = self.resolve(settings)?;
        let stock = self.lookup(&StockRef::Id(stock_id))?;
        self.detect(&stock, start, end, settings)
    }

    /// Like [`run`](Self::run), resolving the stock by its code.
    pub fn detect_for_stock(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
    ) -> Result<DetectionReport> {
        let settings = self.resolve(settings)?;
        let stock = self.lookup(&StockRef::Code(code.to_string()))?;
        self.detect(&stock, start, end, settings)
    }

    /// Sequential batch over stock ids.
    ///
    /// A failing stock is recorded and the batch moves on. `on_progress(done, total, message)`
    /// runs once per processed stock. Settings are validated before any stock runs.
    pub fn run_many<F>(
        &self,
        stock_ids: &[StockId],
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
        on_progress: F,
        stop: Option<&StopFlag>,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let refs: Vec<_> = stock_ids.iter().copied().map(StockRef::Id).collect();
        self.run_batch(&refs, start, end, settings, on_progress, stop)
    }

    /// Sequential batch over stock codes
    pub fn detect_for_many<C, F>(
        &self,
        codes: &[C],
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
        on_progress: F,
        stop: Option<&StopFlag>,
    ) -> Result<BatchReport>
    where
        C: AsRef<str>,
        F: FnMut(usize, usize, &str),
    {
        let refs: Vec<_> = codes.iter().map(|c| StockRef::Code(c.as_ref().to_string())).collect();
        self.run_batch(&refs, start, end, settings, on_progress, stop)
    }

    /// Batch across a rayon worker pool.
    ///
    /// Each stock still runs its own pipeline sequentially. `on_progress` may be
    /// called from several threads and out of order; every `done` value is
    /// reported exactly once, reaching `total` when nothing is cancelled.
    pub fn run_many_parallel<F>(
        &self,
        stocks: &[StockRef],
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
        on_progress: F,
        stop: Option<&StopFlag>,
    ) -> Result<BatchReport>
    where
        F: Fn(usize, usize, &str) + Sync,
    {
        let settings = self.resolve(settings)?;
        let total = stocks.len();
        let done = AtomicUsize::new(0);

        let results: Vec<Option<StockOutcome>> = stocks
            .par_iter()
            .map(|stock| {
                if stop.is_some_and(StopFlag::is_stopped) {
                    return None;
                }
                let outcome = self.outcome(stock, start, end, settings);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                on_progress(n, total, progress_message(stock, &outcome).as_str());
                Some(outcome)
            })
            .collect();

        let outcomes: Vec<_> = results.into_iter().flatten().collect();
        let report = BatchReport {
            total,
            cancelled: total - outcomes.len(),
            outcomes,
        };
        log_batch(&report);
        Ok(report)
    }

    fn run_batch<F>(
        &self,
        stocks: &[StockRef],
        start: NaiveDate,
        end: NaiveDate,
        settings: Option<&DetectionSettings>,
        mut on_progress: F,
        stop: Option<&StopFlag>,
    ) -> Result<BatchReport>
    where
        F: FnMut(usize, usize, &str),
    {
        let settings = self.resolve(settings)?;
        let total = stocks.len();
        let mut outcomes = Vec::with_capacity(total);

        for stock in stocks {
            if stop.is_some_and(StopFlag::is_stopped) {
                break;
            }
            let outcome = self.outcome(stock, start, end, settings);
            on_progress(outcomes.len() + 1, total, progress_message(stock, &outcome).as_str());
            outcomes.push(outcome);
        }

        let report = BatchReport {
            total,
            cancelled: total - outcomes.len(),
            outcomes,
        };
        log_batch(&report);
        Ok(report)
    }

    fn outcome(
        &self,
        stock: &StockRef,
        start: NaiveDate,
        end: NaiveDate,
        settings: &DetectionSettings,
    ) -> StockOutcome {
        let result = self
            .lookup(stock)
            .and_then(|found| self.detect(&found, start, end, settings));
        match result {
            Ok(report) => StockOutcome::Detected(report),
            Err(error) => {
                warn!(%stock, %error, "detection failed");
                StockOutcome::Failed(StockFailure {
                    stock: stock.clone(),
                    error,
                })
            }
        }
    }

    fn lookup(&self, stock: &StockRef) -> Result<Stock> {
        let found = match stock {
            StockRef::Id(id) => self.stocks.get_by_id(*id)?,
            StockRef::Code(code) => self.stocks.get_by_code(code)?,
        };
        found.ok_or_else(|| DetectionError::EntityNotFound {
            entity: "stock",
            key: stock.to_string(),
        })
    }

    fn resolve<'a>(
        &'a self,
        settings: Option<&'a DetectionSettings>,
    ) -> Result<&'a DetectionSettings> {
        match settings {
            Some(s) => {
                s.validate()?;
                Ok(s)
            }
            None => Ok(&self.settings),
        }
    }

    fn detect(
        &self,
        stock: &Stock,
        start: NaiveDate,
        end: NaiveDate,
        settings: &DetectionSettings,
    ) -> Result<DetectionReport> {
        let series = self.prices.get_by_stock_range(stock.id, start, end)?;

        let block1_scanner =
            Block1Scanner::new(settings.block1.clone(), settings.min_history_records);
        let mut block1 = Vec::new();
        for candidate in block1_scanner.detect(stock.id, &series)? {
            block1.push(self.blocks.save(candidate)?);
        }

        let block2_scanner = Block2Scanner::new(settings.block2.clone());
        let mut block2 = BTreeMap::<BlockKey, VolumeBlockEvent>::new();
        for parent in &block1 {
            let tail = self.prices.get_by_stock_range(stock.id, parent.date, end)?;
            for candidate in block2_scanner.detect(parent, &tail)? {
                let saved = self.blocks.save(candidate)?;
                block2.insert(saved.key(), saved);
            }
        }

        let report = DetectionReport {
            stock_id: stock.id,
            stock_code: stock.code.clone(),
            stock_name: stock.name.clone(),
            block1,
            block2: block2.into_values().collect(),
        };
        info!(
            stock = %stock,
            records = series.len(),
            block1 = report.block1_count(),
            block2 = report.block2_count(),
            "detection complete"
        );
        Ok(report)
    }
}

fn progress_message(stock: &StockRef, outcome: &StockOutcome) -> String {
    match outcome {
        StockOutcome::Detected(r) => format!(
            "{} {}: {} Block 1, {} Block 2",
            r.stock_code,
            r.stock_name,
            r.block1_count(),
            r.block2_count()
        ),
        StockOutcome::Failed(f) => format!("{stock}: failed: {}", f.error),
    }
}

fn log_batch(report: &BatchReport) {
    if report.cancelled > 0 {
        warn!(
            processed = report.outcomes.len(),
            cancelled = report.cancelled,
            "batch cancelled"
        );
    }
    info!(
        total = report.total,
        succeeded = report.succeeded(),
        skipped = report.skipped(),
        failed = report.failed(),
        "batch complete"
    );
}
