//! Benchmarks for volume block scanning.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use volblock::prelude::*;

/// Generate a deterministic daily history with periodic volume spikes
fn generate_series(n: usize) -> PriceSeries {
  let start = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
  let mut records = Vec::with_capacity(n);
  let mut price = 10_000.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let o = price;
    let c = (price * (1.0 + change / 100.0)).max(1.0);
    let h = o.max(c) * 1.01;
    let l = o.min(c) * 0.99;
    let volume = if i % 97 == 0 { 8_000_000 } else { 1_000_000 + ((i * 31) % 500_000) as u64 };

    records.push(PriceRecord::new(start + Days::new(i as u64), o, h, l, c, volume).unwrap());
    price = c;
  }

  PriceSeries::new(records).unwrap()
}

fn loose_settings() -> DetectionSettings {
  let mut settings = DetectionSettings::default();
  settings.block1.min_trading_value = None;
  settings
}

fn bench_block1(c: &mut Criterion) {
  let series = generate_series(2500);
  let settings = loose_settings();
  let scanner = Block1Scanner::new(settings.block1, settings.min_history_records);

  c.bench_function("block1_scan_2500_days", |b| {
    b.iter(|| {
      let _ = black_box(scanner.detect(StockId(1), black_box(&series)));
    })
  });
}

fn bench_block1_scaling(c: &mut Criterion) {
  let settings = loose_settings();
  let scanner = Block1Scanner::new(settings.block1, settings.min_history_records);

  let mut group = c.benchmark_group("block1_scaling");

  for size in [250, 1000, 2500, 5000].iter() {
    let series = generate_series(*size);

    group.bench_with_input(BenchmarkId::new("scan", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(scanner.detect(StockId(1), black_box(&series)));
      })
    });
  }

  group.finish();
}

fn bench_block2(c: &mut Criterion) {
  let series = generate_series(2500);
  let mut parent =
    VolumeBlockEvent::block1(StockId(1), series.get(970).unwrap(), 1e10, NewHighGrade::S, Some(730))
      .unwrap();
  parent.id = Some(BlockId(1));

  let mut settings = Block2Settings::default();
  settings.min_volume_ratio = Some(0.1);
  let scanner = Block2Scanner::new(settings);

  c.bench_function("block2_scan_180_days", |b| {
    b.iter(|| {
      let _ = black_box(scanner.detect(black_box(&parent), black_box(&series)));
    })
  });
}

fn bench_grade(c: &mut Criterion) {
  let series = generate_series(5000);

  c.bench_function("classify_new_high_last_of_5000", |b| {
    b.iter(|| {
      let _ = black_box(classify_new_high(black_box(series.as_slice()), black_box(4999)));
    })
  });
}

fn bench_parallel_batch(c: &mut Criterion) {
  let stocks = Arc::new(InMemoryStockRepository::new());
  let prices = Arc::new(InMemoryPriceDataRepository::new());
  let refs: Vec<StockRef> = (1..=8u64)
    .map(|id| {
      let stock = Stock::new(StockId(id), format!("{:06}", id), format!("S{id}"), Market::Kospi);
      stocks.insert(stock.unwrap()).unwrap();
      prices.insert(StockId(id), generate_series(1500));
      StockRef::Id(StockId(id))
    })
    .collect();

  let orchestrator = DetectionOrchestrator::new(stocks, prices, InMemoryBlockRepository::new())
    .with_settings(loose_settings())
    .unwrap();
  let start = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
  let end = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();

  c.bench_function("parallel_batch_8_stocks", |b| {
    b.iter(|| {
      let report = orchestrator.run_many_parallel(&refs, start, end, None, |_, _, _| {}, None);
      let _ = black_box(report);
    })
  });
}

criterion_group!(
  benches,
  bench_block1,
  bench_block1_scaling,
  bench_block2,
  bench_grade,
  bench_parallel_batch,
);

criterion_main!(benches);
