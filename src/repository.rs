//! Persistence contracts consumed by the orchestrator, plus in-memory stores.
//!
//! The traits are synchronous and `Send + Sync` so one repository instance can
//! serve a parallel batch. Each `save`/`save_bulk` call is a single atomic
//! write: it either commits completely or leaves the store untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::{
    BlockId, BlockKey, BlockKind, DetectionError, PriceRecord, PriceSeries, Result, Stock, StockId,
    VolumeBlockEvent, OHLCV,
};

// ============================================================
// TRAITS
// ============================================================

pub trait StockRepository: Send + Sync {
    fn get_by_id(&self, id: StockId) -> Result<Option<Stock>>;
    fn get_by_code(&self, code: &str) -> Result<Option<Stock>>;

    fn exists(&self, id: StockId) -> Result<bool> {
        Ok(self.get_by_id(id)?.is_some())
    }
}

pub trait PriceDataRepository: Send + Sync {
    /// Records of `stock_id` with `start <= date <= end`, in date order.
    /// An unknown stock yields an empty series.
    fn get_by_stock_range(
        &self,
        stock_id: StockId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries>;
}

pub trait BlockRepository: Send + Sync {
    /// Upsert by (stock, kind, date). Returns the stored event with its id.
    fn save(&self, event: VolumeBlockEvent) -> Result<VolumeBlockEvent>;

    /// Upsert many events in one transaction
    fn save_bulk(&self, events: Vec<VolumeBlockEvent>) -> Result<Vec<VolumeBlockEvent>>;

    fn get_by_id(&self, id: BlockId) -> Result<Option<VolumeBlockEvent>>;

    /// Events of one stock, optionally of one kind, in date order
    fn get_by_stock(
        &self,
        stock_id: StockId,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>>;

    /// Events of every stock dated within `[start, end]`, optionally of one kind
    fn get_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>>;

    fn count_by_type(&self, kind: BlockKind) -> Result<usize>;

    fn exists_by_stock_date_type(
        &self,
        stock_id: StockId,
        date: NaiveDate,
        kind: BlockKind,
    ) -> Result<bool>;
}

impl<T: StockRepository + ?Sized> StockRepository for Arc<T> {
    fn get_by_id(&self, id: StockId) -> Result<Option<Stock>> {
        (**self).get_by_id(id)
    }

    fn get_by_code(&self, code: &str) -> Result<Option<Stock>> {
        (**self).get_by_code(code)
    }

    fn exists(&self, id: StockId) -> Result<bool> {
        (**self).exists(id)
    }
}

impl<T: PriceDataRepository + ?Sized> PriceDataRepository for Arc<T> {
    fn get_by_stock_range(
        &self,
        stock_id: StockId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        (**self).get_by_stock_range(stock_id, start, end)
    }
}

impl<T: BlockRepository + ?Sized> BlockRepository for Arc<T> {
    fn save(&self, event: VolumeBlockEvent) -> Result<VolumeBlockEvent> {
        (**self).save(event)
    }

    fn save_bulk(&self, events: Vec<VolumeBlockEvent>) -> Result<Vec<VolumeBlockEvent>> {
        (**self).save_bulk(events)
    }

    fn get_by_id(&self, id: BlockId) -> Result<Option<VolumeBlockEvent>> {
        (**self).get_by_id(id)
    }

    fn get_by_stock(
        &self,
        stock_id: StockId,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>> {
        (**self).get_by_stock(stock_id, kind)
    }

    fn get_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>> {
        (**self).get_by_date_range(start, end, kind)
    }

    fn count_by_type(&self, kind: BlockKind) -> Result<usize> {
        (**self).count_by_type(kind)
    }

    fn exists_by_stock_date_type(
        &self,
        stock_id: StockId,
        date: NaiveDate,
        kind: BlockKind,
    ) -> Result<bool> {
        (**self).exists_by_stock_date_type(stock_id, date, kind)
    }
}

// ============================================================
// IN-MEMORY STOCKS
// ============================================================

#[derive(Debug, Default)]
pub struct InMemoryStockRepository {
    stocks: RwLock<BTreeMap<StockId, Stock>>,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a stock. Codes must stay unique across ids.
    pub fn insert(&self, stock: Stock) -> Result<()> {
        let mut stocks = self.stocks.write();
        if stocks.values().any(|s| s.code == stock.code && s.id != stock.id) {
            return Err(DetectionError::Repository(format!("duplicate stock code {}", stock.code)));
        }
        stocks.insert(stock.id, stock);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.read().is_empty()
    }
}

impl StockRepository for InMemoryStockRepository {
    fn get_by_id(&self, id: StockId) -> Result<Option<Stock>> {
        Ok(self.stocks.read().get(&id).cloned())
    }

    fn get_by_code(&self, code: &str) -> Result<Option<Stock>> {
        Ok(self.stocks.read().values().find(|s| s.code == code).cloned())
    }
}

// ============================================================
// IN-MEMORY PRICES
// ============================================================

#[derive(Debug, Default)]
pub struct InMemoryPriceDataRepository {
    series: RwLock<HashMap<StockId, PriceSeries>>,
}

impl InMemoryPriceDataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stock_id: StockId, series: PriceSeries) {
        self.series.write().insert(stock_id, series);
    }
}

impl PriceDataRepository for InMemoryPriceDataRepository {
    fn get_by_stock_range(
        &self,
        stock_id: StockId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries> {
        let guard = self.series.read();
        let Some(series) = guard.get(&stock_id) else {
            return Ok(PriceSeries::default());
        };
        let records: Vec<PriceRecord> = series
            .iter()
            .filter(|r| r.date() >= start && r.date() <= end)
            .copied()
            .collect();
        PriceSeries::new(records)
    }
}

// ============================================================
// IN-MEMORY BLOCKS
// ============================================================

#[derive(Debug, Clone, Default)]
struct BlockStore {
    events: BTreeMap<BlockKey, VolumeBlockEvent>,
    keys: HashMap<BlockId, BlockKey>,
    next_id: u64,
}

impl BlockStore {
    fn upsert(&mut self, mut event: VolumeBlockEvent) -> Result<VolumeBlockEvent> {
        event.validate_for_commit()?;
        if let Some(parent_id) = event.parent_block_id {
            let parent = self
                .keys
                .get(&parent_id)
                .and_then(|key| self.events.get(key))
                .ok_or_else(|| DetectionError::EntityNotFound {
                    entity: "parent block",
                    key: parent_id.to_string(),
                })?;
            if parent.stock_id != event.stock_id {
                return Err(DetectionError::InvalidEvent("parent belongs to another stock"));
            }
            if event.date <= parent.date {
                return Err(DetectionError::InvalidEvent("block must follow its parent"));
            }
        }

        let key = event.key();
        let id = match self.events.get(&key).and_then(|existing| existing.id) {
            Some(id) => id,
            None => {
                self.next_id += 1;
                BlockId(self.next_id)
            }
        };
        event.id = Some(id);
        self.keys.insert(id, key);
        self.events.insert(key, event.clone());
        Ok(event)
    }
}

/// Block store keyed by (stock, kind, date), so saving the same detection twice
/// updates in place and keeps the first id.
#[derive(Debug, Default)]
pub struct InMemoryBlockRepository {
    store: RwLock<BlockStore>,
}

impl InMemoryBlockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().events.is_empty()
    }

    /// Administrative removal of every event of a stock
    pub fn delete_by_stock(&self, stock_id: StockId) -> usize {
        let mut store = self.store.write();
        let before = store.events.len();
        store.events.retain(|key, _| key.stock_id != stock_id);
        store.keys.retain(|_, key| key.stock_id != stock_id);
        before - store.events.len()
    }
}

impl BlockRepository for InMemoryBlockRepository {
    fn save(&self, event: VolumeBlockEvent) -> Result<VolumeBlockEvent> {
        self.store.write().upsert(event)
    }

    fn save_bulk(&self, events: Vec<VolumeBlockEvent>) -> Result<Vec<VolumeBlockEvent>> {
        let mut store = self.store.write();
        let mut staged = store.clone();
        let saved = events
            .into_iter()
            .map(|e| staged.upsert(e))
            .collect::<Result<Vec<_>>>()?;
        *store = staged;
        Ok(saved)
    }

    fn get_by_id(&self, id: BlockId) -> Result<Option<VolumeBlockEvent>> {
        let store = self.store.read();
        Ok(store.keys.get(&id).and_then(|key| store.events.get(key)).cloned())
    }

    fn get_by_stock(
        &self,
        stock_id: StockId,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>> {
        let store = self.store.read();
        let mut events: Vec<_> = store
            .events
            .values()
            .filter(|e| e.stock_id == stock_id && kind.map_or(true, |k| e.block_kind == k))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.date, e.block_kind));
        Ok(events)
    }

    fn get_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        kind: Option<BlockKind>,
    ) -> Result<Vec<VolumeBlockEvent>> {
        let store = self.store.read();
        let mut events: Vec<_> = store
            .events
            .values()
            .filter(|e| e.date >= start && e.date <= end)
            .filter(|e| kind.map_or(true, |k| e.block_kind == k))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.date, e.stock_id, e.block_kind));
        Ok(events)
    }

    fn count_by_type(&self, kind: BlockKind) -> Result<usize> {
        Ok(self.store.read().events.keys().filter(|k| k.block_kind == kind).count())
    }

    fn exists_by_stock_date_type(
        &self,
        stock_id: StockId,
        date: NaiveDate,
        kind: BlockKind,
    ) -> Result<bool> {
        let key = BlockKey {
            stock_id,
            block_kind: kind,
            date,
        };
        Ok(self.store.read().events.contains_key(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Market, NewHighGrade};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, d).unwrap()
    }

    fn bar(d: u32, volume: u64) -> PriceRecord {
        PriceRecord::new(day(d), 100.0, 110.0, 90.0, 105.0, volume).unwrap()
    }

    fn block1(stock: u64, d: u32) -> VolumeBlockEvent {
        let bar = bar(d, 1_000);
        VolumeBlockEvent::block1(StockId(stock), &bar, 1e9, NewHighGrade::S, Some(730)).unwrap()
    }

    #[test]
    fn test_save_assigns_id_and_upserts() {
        let repo = InMemoryBlockRepository::new();
        let first = repo.save(block1(1, 1)).unwrap();
        assert_eq!(first.id, Some(BlockId(1)));

        let mut again = block1(1, 1);
        again.new_high_grade = Some(NewHighGrade::A);
        let second = repo.save(again).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(repo.len(), 1);
        let stored = repo.get_by_id(BlockId(1)).unwrap().unwrap();
        assert_eq!(stored.new_high_grade, Some(NewHighGrade::A));
    }

    #[test]
    fn test_block2_requires_persisted_parent() {
        let repo = InMemoryBlockRepository::new();
        let unsaved = block1(1, 1);
        let orphan = VolumeBlockEvent::block2(&unsaved, &bar(3, 900), 1e9, 0.9, None).unwrap();
        assert!(repo.save(orphan.clone()).is_err());

        let mut dangling = orphan;
        dangling.parent_block_id = Some(BlockId(42));
        assert!(matches!(repo.save(dangling), Err(DetectionError::EntityNotFound { .. })));

        let parent = repo.save(block1(1, 1)).unwrap();
        let child = VolumeBlockEvent::block2(&parent, &bar(3, 900), 1e9, 0.9, None).unwrap();
        let child = repo.save(child).unwrap();
        assert_eq!(child.parent_block_id, parent.id);
        assert!(repo.exists_by_stock_date_type(StockId(1), day(3), BlockKind::Block2).unwrap());
    }

    #[test]
    fn test_save_bulk_is_atomic() {
        let repo = InMemoryBlockRepository::new();
        let parent = repo.save(block1(1, 1)).unwrap();
        let good = VolumeBlockEvent::block2(&parent, &bar(3, 900), 1e9, 0.9, None).unwrap();
        let mut bad = good.clone();
        bad.date = day(4);
        bad.parent_block_id = Some(BlockId(99));

        assert!(repo.save_bulk(vec![good.clone(), bad]).is_err());
        assert_eq!(repo.len(), 1);

        let saved = repo.save_bulk(vec![good, block1(1, 5)]).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(repo.len(), 3);
    }

    #[test]
    fn test_queries() {
        let repo = InMemoryBlockRepository::new();
        let p = repo.save(block1(1, 1)).unwrap();
        repo.save(block1(1, 2)).unwrap();
        repo.save(block1(2, 2)).unwrap();
        repo.save(VolumeBlockEvent::block2(&p, &bar(4, 900), 1e9, 0.9, None).unwrap()).unwrap();

        assert_eq!(repo.get_by_stock(StockId(1), None).unwrap().len(), 3);
        assert_eq!(repo.get_by_stock(StockId(1), Some(BlockKind::Block2)).unwrap().len(), 1);
        assert_eq!(repo.count_by_type(BlockKind::Block1).unwrap(), 3);
        assert_eq!(repo.get_by_date_range(day(2), day(3), None).unwrap().len(), 2);
        assert_eq!(repo.delete_by_stock(StockId(1)), 3);
        assert_eq!(repo.len(), 1);
        assert!(repo.get_by_id(BlockId(1)).unwrap().is_none());
    }

    #[test]
    fn test_price_range_filter() {
        let repo = InMemoryPriceDataRepository::new();
        let series = PriceSeries::new((1..=9).map(|d| bar(d, 10)).collect()).unwrap();
        repo.insert(StockId(1), series);
        let got = repo.get_by_stock_range(StockId(1), day(3), day(5)).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got.first().map(|r| r.date()), Some(day(3)));
        assert!(repo.get_by_stock_range(StockId(2), day(1), day(9)).unwrap().is_empty());
    }

    #[test]
    fn test_stock_lookup() {
        let repo = InMemoryStockRepository::new();
        repo.insert(Stock::new(StockId(1), "005930", "Samsung Electronics", Market::Kospi).unwrap())
            .unwrap();
        assert!(repo.exists(StockId(1)).unwrap());
        assert_eq!(repo.get_by_code("005930").unwrap().map(|s| s.id), Some(StockId(1)));
        assert!(repo.get_by_code("000660").unwrap().is_none());
        let dup = Stock::new(StockId(2), "005930", "Other", Market::Kosdaq).unwrap();
        assert!(repo.insert(dup).is_err());
    }
}
