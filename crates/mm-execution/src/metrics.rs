//! 실행 코어 메트릭.
//!
//! `metrics` 파사드로 값을 기록하고, Prometheus 텍스트 형식 렌더링은
//! `PrometheusHandle`에 맡깁니다. 전송 계층은 이 크레이트가 소유하지 않습니다.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use mm_core::{DecimalExt, Quantity, Side};
use rust_decimal::Decimal;
use std::time::Duration;

/// 주문 지연 히스토그램 버킷 (초).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// 체결 지연 히스토그램 버킷 (초).
const FILL_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// 재시도 횟수 버킷.
const RETRY_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 3.0, 5.0, 10.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("mm_order_latency_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("mm_fill_latency_seconds".to_string()),
            FILL_LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("mm_order_retry_count".to_string()),
            RETRY_BUCKETS,
        )
}

/// 전역 Prometheus 레코더를 설치하고 렌더링 핸들을 반환합니다.
///
/// 레코더가 이미 설치되어 있으면 에러를 반환합니다.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// 설치하지 않은 레코더를 생성합니다 (테스트 및 임베딩용).
pub fn build_prometheus_recorder() -> Result<PrometheusRecorder, BuildError> {
    Ok(builder()?.build_recorder())
}

// ============================================================================
// 주문 카운터
// ============================================================================

pub fn record_order_placed(symbol: &str, side: Side) {
    counter!(
        "mm_orders_placed_total",
        "symbol" => symbol.to_string(),
        "side" => side.as_str()
    )
    .increment(1);
}

pub fn record_order_filled(symbol: &str, side: Side) {
    counter!(
        "mm_orders_filled_total",
        "symbol" => symbol.to_string(),
        "side" => side.as_str()
    )
    .increment(1);
}

pub fn record_order_partially_filled(symbol: &str, side: Side) {
    counter!(
        "mm_orders_partially_filled_total",
        "symbol" => symbol.to_string(),
        "side" => side.as_str()
    )
    .increment(1);
}

pub fn record_order_canceled(symbol: &str, side: Side) {
    counter!(
        "mm_orders_canceled_total",
        "symbol" => symbol.to_string(),
        "side" => side.as_str()
    )
    .increment(1);
}

/// 거부 카운터. 사유 레이블이 추가됩니다.
pub fn record_order_rejected(symbol: &str, side: Side, reason: &str) {
    counter!(
        "mm_orders_rejected_total",
        "symbol" => symbol.to_string(),
        "side" => side.as_str(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// 지연 및 재시도
// ============================================================================

/// 게이트웨이 시도 한 번의 지연 시간.
pub fn record_attempt_latency(symbol: &str, latency: Duration) {
    histogram!("mm_order_latency_seconds", "symbol" => symbol.to_string())
        .record(latency.as_secs_f64());
}

/// 주문 생성부터 완전 체결까지의 시간.
pub fn record_fill_latency(symbol: &str, latency: Duration) {
    histogram!("mm_fill_latency_seconds", "symbol" => symbol.to_string())
        .record(latency.as_secs_f64());
}

pub fn record_retry_count(symbol: &str, retries: u32) {
    histogram!("mm_order_retry_count", "symbol" => symbol.to_string()).record(f64::from(retries));
}

// ============================================================================
// 포지션 게이지
// ============================================================================

pub fn record_position(symbol: &str, qty: Quantity, pnl: Decimal) {
    gauge!("mm_position_qty", "symbol" => symbol.to_string()).set(qty.as_f64());
    gauge!("mm_position_pnl", "symbol" => symbol.to_string()).set(pnl.as_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rendered_names_and_labels() {
        let recorder = build_prometheus_recorder().unwrap();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_order_placed("BTCUSDT", Side::Buy);
            record_order_rejected("BTCUSDT", Side::Sell, "InsufficientMargin");
            record_attempt_latency("BTCUSDT", Duration::from_millis(20));
            record_attempt_latency("BTCUSDT", Duration::from_millis(30));
            record_retry_count("BTCUSDT", 1);
            record_position("BTCUSDT", dec!(-0.01), dec!(1.5));
        });

        let rendered = handle.render();
        assert!(rendered.contains("mm_orders_placed_total{symbol=\"BTCUSDT\",side=\"buy\"} 1"));
        assert!(rendered.contains(
            "mm_orders_rejected_total{symbol=\"BTCUSDT\",side=\"sell\",reason=\"InsufficientMargin\"} 1"
        ));
        assert!(rendered.contains("mm_order_latency_seconds_count{symbol=\"BTCUSDT\"} 2"));
        assert!(rendered.contains("mm_order_retry_count_bucket"));
        assert!(rendered.contains("mm_position_qty{symbol=\"BTCUSDT\"} -0.01"));
        assert!(rendered.contains("mm_position_pnl{symbol=\"BTCUSDT\"} 1.5"));
    }
}
