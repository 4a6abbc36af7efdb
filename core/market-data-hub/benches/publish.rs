//! Publish-path latency with varying subscriber counts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use market_data_hub::{DataType, MarketData, MarketDataHub, SubscriptionOptions, Trade};
use std::time::Duration;

fn trade(i: i64) -> Trade {
    Trade {
        timestamp: i,
        symbol: "BTCUSDT".into(),
        price: 50000.0 + (i % 100) as f64,
        quantity: 1.0,
        is_buyer_maker: i % 2 == 0,
    }
}

fn hub_with_subscribers(n: usize) -> MarketDataHub {
    let hub = MarketDataHub::new();
    for _ in 0..n {
        hub.subscribe(DataType::Trade, |_: DataType, ev: &MarketData| -> anyhow::Result<()> {
            black_box(ev.timestamp());
            Ok(())
        })
        .expect("subscribe");
    }
    hub
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_trade");

    for subscribers in [0usize, 1, 8] {
        for copy in [true, false] {
            let hub = hub_with_subscribers(subscribers);
            let label = if copy { "copy" } else { "shared" };
            let mut i = 0i64;

            group.bench_with_input(BenchmarkId::new(label, subscribers), &subscribers, |b, _| {
                b.iter(|| {
                    i += 1;
                    black_box(hub.add_trade(trade(i), copy).expect("publish"));
                })
            });
            hub.stop_all();
        }
    }

    group.finish();
}

fn bench_slow_subscriber(c: &mut Criterion) {
    let hub = MarketDataHub::new();
    let slow = SubscriptionOptions::default().with_capacity(64);
    hub.subscribe_with(DataType::Trade, slow, |_: DataType, _: &MarketData| -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(1));
        Ok(())
    })
    .expect("subscribe");

    let mut i = 0i64;
    c.bench_function("add_trade/slow_subscriber", |b| {
        b.iter(|| {
            i += 1;
            black_box(hub.add_trade(trade(i), true).expect("publish"));
        })
    });
    hub.stop_all();
}

criterion_group!(benches, bench_publish, bench_slow_subscriber);
criterion_main!(benches);
