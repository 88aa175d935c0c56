//! 실행 흐름이 남기는 Prometheus 지표 검증.

use std::sync::Arc;

use mm_core::{OrderIntent, ReconciliationConfig};
use mm_execution::{build_prometheus_recorder, ExecutionEngine};
use mm_gateway::{GatewayError, RetryConfig, SimulatedConfig, SimulatedGateway};
use mm_risk::RiskLimits;
use rust_decimal_macros::dec;

fn current_thread() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn paused_current_thread() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

#[test]
fn order_lifecycle_is_exported() {
    let recorder = build_prometheus_recorder().unwrap();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        current_thread().block_on(async {
            let gateway = SimulatedGateway::deterministic();
            let engine = ExecutionEngine::new(
                Arc::new(gateway),
                RiskLimits::default(),
                RetryConfig::default(),
                ReconciliationConfig::default(),
            );
            engine.on_mark_price("BTCUSDT", dec!(50000)).unwrap();

            let intent = OrderIntent::limit_buy("q-1", "BTCUSDT", dec!(0.01), dec!(50000));
            engine.submit(&intent).await.unwrap();
            engine.process_fills("q-1").await.unwrap();

            // 심볼 한도 초과
            let oversized = OrderIntent::limit_buy("q-2", "BTCUSDT", dec!(1), dec!(50000));
            assert!(!engine.submit(&oversized).await.unwrap().is_placed());
        });
    });

    let rendered = handle.render();
    assert!(rendered.contains("mm_orders_placed_total{symbol=\"BTCUSDT\",side=\"buy\"} 1"));
    assert!(rendered.contains("mm_orders_filled_total{symbol=\"BTCUSDT\",side=\"buy\"} 1"));
    assert!(rendered.contains("mm_order_latency_seconds_count{symbol=\"BTCUSDT\"} 1"));
    assert!(rendered.contains("mm_fill_latency_seconds_count{symbol=\"BTCUSDT\"} 1"));
    assert!(rendered.contains("mm_position_qty{symbol=\"BTCUSDT\"} 0.01"));
    assert!(rendered.contains("mm_risk_blocks_total{reason=\"symbol_limit\"} 1"));
}

#[test]
fn venue_rejection_carries_reason_label() {
    let recorder = build_prometheus_recorder().unwrap();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        current_thread().block_on(async {
            let gateway = SimulatedGateway::new(
                SimulatedConfig::default()
                    .with_rejection_rate(1.0)
                    .with_seed(1),
            );
            let engine = ExecutionEngine::new(
                Arc::new(gateway),
                RiskLimits::default(),
                RetryConfig::default(),
                ReconciliationConfig::default(),
            );

            let intent = OrderIntent::limit_sell("q-1", "ETHUSDT", dec!(0.5), dec!(3000));
            assert!(engine.submit(&intent).await.is_err());
        });
    });

    let rendered = handle.render();
    assert!(rendered.contains(
        "mm_orders_rejected_total{symbol=\"ETHUSDT\",side=\"sell\",reason=\"InsufficientMargin\"} 1"
    ));
    assert!(!rendered.contains("mm_orders_placed_total{symbol=\"ETHUSDT\""));
}

#[test]
fn every_attempt_records_latency_and_retry_count() {
    let recorder = build_prometheus_recorder().unwrap();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        paused_current_thread().block_on(async {
            let gateway = SimulatedGateway::deterministic();
            gateway
                .push_place_fault(GatewayError::Timeout("first attempt".into()))
                .await;
            let engine = ExecutionEngine::new(
                Arc::new(gateway),
                RiskLimits::default(),
                RetryConfig::default(),
                ReconciliationConfig::default(),
            );

            let intent = OrderIntent::limit_buy("q-1", "BTCUSDT", dec!(0.01), dec!(50000));
            let outcome = engine.submit(&intent).await.unwrap();
            assert_eq!(outcome.order_result().unwrap().retries, 1);
        });
    });

    // 시도 두 번: 재시도 0회 시점과 1회 시점이 하나씩 기록된다
    let rendered = handle.render();
    assert!(rendered.contains("mm_order_latency_seconds_count{symbol=\"BTCUSDT\"} 2"));
    assert!(rendered.contains("mm_order_retry_count_count{symbol=\"BTCUSDT\"} 2"));
    assert!(rendered.contains("mm_order_retry_count_sum{symbol=\"BTCUSDT\"} 1"));
    assert!(rendered.contains("mm_orders_placed_total{symbol=\"BTCUSDT\",side=\"buy\"} 1"));
}
