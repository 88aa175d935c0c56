//! 사전 리스크 모니터.
//!
//! 제공 기능:
//! - 주문 전 심볼별/전체 명목 한도 검사
//! - 엣지 하한 미만 시 자동 동결
//! - 동결 중 모든 주문 차단 (fail-closed)
//! - 누적 감사 카운터 (리셋되지 않음)
//!
//! 동결 플래그, 카운터, 포지션 스냅샷은 하나의 뮤텍스 뒤에 있으며
//! 모든 검사는 가장 최근에 완료된 동결 결정을 관찰합니다.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use mm_core::{Bps, Price, Quantity, Side};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RiskLimits;

/// 심볼의 현재 마크 가격 제공자.
pub trait MarkPriceSource: Send + Sync {
    fn mark_price(&self, symbol: &str) -> Option<Price>;
}

impl<F> MarkPriceSource for F
where
    F: Fn(&str) -> Option<Price> + Send + Sync,
{
    fn mark_price(&self, symbol: &str) -> Option<Price> {
        self(symbol)
    }
}

/// 주문 차단 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// 거래 동결 중
    Frozen,
    /// 심볼별 재고 한도 초과
    SymbolLimit,
    /// 전체 명목 한도 초과
    TotalLimit,
    /// 명목 계산에 필요한 가격 없음
    NoPrice,
}

impl BlockReason {
    /// 메트릭 레이블용 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Frozen => "frozen",
            BlockReason::SymbolLimit => "symbol_limit",
            BlockReason::TotalLimit => "total_limit",
            BlockReason::NoPrice => "no_price",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 사전 검사 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Blocked(BlockReason),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }
}

/// 마지막 동결 기록.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRecord {
    pub reason: String,
    pub symbol: Option<String>,
    pub at: DateTime<Utc>,
}

/// 리스크 카운터 스냅샷.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounters {
    /// 차단된 주문 누적 수
    pub blocks_total: u64,
    /// 동결 발생 누적 수
    pub freezes_total: u64,
    /// 현재 동결 여부
    pub frozen: bool,
    /// 마지막 동결 기록
    pub last_freeze: Option<FreezeRecord>,
}

#[derive(Debug, Default)]
struct RiskMonitorState {
    positions: HashMap<String, Quantity>,
    frozen: bool,
    last_freeze: Option<FreezeRecord>,
    blocks_total: u64,
    freezes_total: u64,
}

/// 세션당 하나의 사전 리스크 모니터.
pub struct RiskMonitor {
    limits: RiskLimits,
    prices: Arc<dyn MarkPriceSource>,
    state: Mutex<RiskMonitorState>,
}

impl std::fmt::Debug for RiskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskMonitor")
            .field("limits", &self.limits)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

impl RiskMonitor {
    /// 새 리스크 모니터를 생성한다.
    pub fn new(limits: RiskLimits, prices: Arc<dyn MarkPriceSource>) -> Self {
        info!(
            max_inventory_per_symbol = %limits.max_inventory_per_symbol,
            max_total_notional = %limits.max_total_notional,
            edge_freeze_floor_bps = %limits.edge_freeze_floor_bps,
            "리스크 모니터 초기화"
        );
        gauge!("mm_risk_frozen").set(0.0);
        Self {
            limits,
            prices,
            state: Mutex::new(RiskMonitorState::default()),
        }
    }

    /// 설정된 한도.
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    // ==================== 사전 검사 ====================

    /// 주문을 허용할지 판단한다. 차단 시 false.
    pub fn check_before_order(
        &self,
        symbol: &str,
        side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> bool {
        self.evaluate(symbol, side, qty, price).is_allowed()
    }

    /// 차단 사유를 포함한 사전 검사.
    ///
    /// 심볼 검사는 체결 후 포지션 `|현재 + 부호수량| * 가격`을 사용하므로
    /// 노출을 줄이는 주문은 허용된다. 전체 합산은 각 심볼의 마크 가격을 쓴다.
    /// 가격을 알 수 없거나 명목 계산이 넘치면 차단한다.
    pub fn evaluate(
        &self,
        symbol: &str,
        side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> RiskDecision {
        let mut state = self.state.lock();

        let decision = if state.frozen {
            RiskDecision::Blocked(BlockReason::Frozen)
        } else {
            self.check_limits(&state, symbol, side, qty, price)
        };

        if let RiskDecision::Blocked(reason) = decision {
            state.blocks_total += 1;
            counter!("mm_risk_blocks_total", "reason" => reason.as_str()).increment(1);
            warn!(
                symbol,
                side = %side,
                qty = %qty,
                reason = %reason,
                blocks_total = state.blocks_total,
                "리스크 검사 차단"
            );
        }

        decision
    }

    fn check_limits(
        &self,
        state: &RiskMonitorState,
        symbol: &str,
        side: Side,
        qty: Quantity,
        price: Option<Price>,
    ) -> RiskDecision {
        let current = state.positions.get(symbol).copied().unwrap_or(Decimal::ZERO);
        let Some(new_position) = current.checked_add(side.signed(qty)) else {
            return RiskDecision::Blocked(BlockReason::SymbolLimit);
        };
        let mark = self.prices.mark_price(symbol);

        let symbol_notional = if new_position.is_zero() {
            Decimal::ZERO
        } else {
            let Some(effective_price) = price.or(mark) else {
                return RiskDecision::Blocked(BlockReason::NoPrice);
            };
            match notional(new_position, effective_price) {
                Some(n) => n,
                None => return RiskDecision::Blocked(BlockReason::SymbolLimit),
            }
        };
        if symbol_notional > self.limits.max_inventory_per_symbol {
            debug!(
                symbol,
                notional = %symbol_notional,
                limit = %self.limits.max_inventory_per_symbol,
                "심볼 한도 초과"
            );
            return RiskDecision::Blocked(BlockReason::SymbolLimit);
        }

        // 전체 합산은 지정가와 무관하게 마크 가격으로 평가한다.
        // 마크가 아직 없는 심볼만 주문 가격으로 대신한다.
        let own_term = if new_position.is_zero() {
            Some(Decimal::ZERO)
        } else {
            match mark.or(price) {
                Some(p) => notional(new_position, p),
                None => return RiskDecision::Blocked(BlockReason::NoPrice),
            }
        };
        let Some(mut total) = own_term else {
            return RiskDecision::Blocked(BlockReason::TotalLimit);
        };
        for (other, qty) in state.positions.iter() {
            if other == symbol || qty.is_zero() {
                continue;
            }
            let Some(other_mark) = self.prices.mark_price(other) else {
                return RiskDecision::Blocked(BlockReason::NoPrice);
            };
            let Some(sum) = notional(*qty, other_mark).and_then(|n| total.checked_add(n)) else {
                return RiskDecision::Blocked(BlockReason::TotalLimit);
            };
            total = sum;
        }

        if total > self.limits.max_total_notional {
            debug!(
                symbol,
                total_notional = %total,
                limit = %self.limits.max_total_notional,
                "전체 명목 한도 초과"
            );
            return RiskDecision::Blocked(BlockReason::TotalLimit);
        }

        RiskDecision::Allowed
    }

    // ==================== 상태 업데이트 ====================

    /// 체결을 포지션 스냅샷에 반영한다.
    pub fn on_fill(&self, symbol: &str, side: Side, qty: Quantity) {
        let mut state = self.state.lock();
        let position = state.positions.entry(symbol.to_string()).or_default();
        match position.checked_add(side.signed(qty)) {
            Some(next) => {
                *position = next;
                debug!(symbol, position = %position, "리스크 포지션 갱신");
            }
            None => warn!(symbol, qty = %qty, "리스크 포지션 오버플로우, 갱신 무시"),
        }
    }

    /// 심볼 포지션을 외부 기준값으로 맞춘다 (복구 후 동기화용).
    pub fn sync_position(&self, symbol: &str, qty: Quantity) {
        self.state.lock().positions.insert(symbol.to_string(), qty);
    }

    /// 순 엣지를 관찰한다. 하한보다 엄격히 낮으면 동결하고 true를 반환한다.
    pub fn on_edge_update(&self, symbol: &str, net_bps: Bps) -> bool {
        let floor = self.limits.edge_freeze_floor_bps;
        if net_bps < floor {
            let reason = format!("net edge {}bps below floor {}bps", net_bps, floor);
            self.freeze(reason, Some(symbol));
            true
        } else {
            false
        }
    }

    /// 거래를 동결한다.
    ///
    /// 카운터는 동결되지 않은 상태에서 동결 상태로 바뀔 때만 증가한다.
    /// 이미 동결된 상태에서의 호출은 마지막 사유/심볼/시각만 갱신한다.
    /// 새로 동결되었으면 true.
    pub fn freeze(&self, reason: impl Into<String>, symbol: Option<&str>) -> bool {
        let reason = reason.into();
        let mut state = self.state.lock();
        let newly_frozen = !state.frozen;

        state.frozen = true;
        state.last_freeze = Some(FreezeRecord {
            reason: reason.clone(),
            symbol: symbol.map(str::to_string),
            at: Utc::now(),
        });

        if newly_frozen {
            state.freezes_total += 1;
            counter!("mm_risk_freezes_total").increment(1);
            gauge!("mm_risk_frozen").set(1.0);
            warn!(
                reason = %reason,
                symbol = symbol.unwrap_or("-"),
                freezes_total = state.freezes_total,
                "거래 동결"
            );
        } else {
            debug!(reason = %reason, symbol = symbol.unwrap_or("-"), "이미 동결 상태, 사유 갱신");
        }

        newly_frozen
    }

    /// 운영자 리셋. 동결과 포지션 스냅샷을 지우고 카운터는 유지한다.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.frozen = false;
        state.last_freeze = None;
        state.positions.clear();
        gauge!("mm_risk_frozen").set(0.0);
        info!(
            blocks_total = state.blocks_total,
            freezes_total = state.freezes_total,
            "리스크 모니터 리셋"
        );
    }

    // ==================== 조회 ====================

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    /// 심볼별 부호 있는 포지션 스냅샷.
    pub fn get_positions(&self) -> HashMap<String, Quantity> {
        self.state.lock().positions.clone()
    }

    /// 카운터 스냅샷.
    pub fn counters(&self) -> RiskCounters {
        let state = self.state.lock();
        RiskCounters {
            blocks_total: state.blocks_total,
            freezes_total: state.freezes_total,
            frozen: state.frozen,
            last_freeze: state.last_freeze.clone(),
        }
    }
}

/// `|qty * price|`. 오버플로우는 None.
fn notional(qty: Quantity, price: Price) -> Option<Decimal> {
    qty.checked_mul(price).map(|n| n.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fixed_prices(prices: &[(&str, Decimal)]) -> Arc<dyn MarkPriceSource> {
        let map: HashMap<String, Decimal> = prices
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect();
        Arc::new(move |symbol: &str| map.get(symbol).copied())
    }

    fn monitor() -> RiskMonitor {
        RiskMonitor::new(
            RiskLimits::new(dec!(10000), dec!(15000), dec!(1.5)),
            fixed_prices(&[("BTCUSDT", dec!(50000)), ("ETHUSDT", dec!(3000))]),
        )
    }

    #[test]
    fn test_symbol_limit_uses_mark_price() {
        let monitor = monitor();

        assert!(!monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.5), None));
        assert!(monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.1), None));
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Sell, dec!(0.5), None),
            RiskDecision::Blocked(BlockReason::SymbolLimit)
        );
        assert_eq!(monitor.counters().blocks_total, 2);
    }

    #[test]
    fn test_aggregate_uses_mark_even_with_limit_price() {
        // 심볼 한도를 지정가로 통과해도 합산에서 걸린다
        assert_eq!(
            monitor().evaluate("BTCUSDT", Side::Buy, dec!(0.5), Some(dec!(10000))),
            RiskDecision::Blocked(BlockReason::TotalLimit)
        );

        let monitor = RiskMonitor::new(
            RiskLimits::new(dec!(30000), dec!(15000), dec!(1.5)),
            fixed_prices(&[("BTCUSDT", dec!(50000))]),
        );

        // 지정가 10,000 기준 5,000이지만 마크 기준 25,000은 전체 한도를 넘는다
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Buy, dec!(0.5), Some(dec!(10000))),
            RiskDecision::Blocked(BlockReason::TotalLimit)
        );
        assert!(monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.25), Some(dec!(10000))));
    }

    #[test]
    fn test_unmarked_symbol_uses_order_price_for_aggregate() {
        let monitor = monitor();
        monitor.on_fill("ETHUSDT", Side::Buy, dec!(3)); // 9,000
        // SOLUSDT는 마크가 없어 주문 가격 100 * 70 = 7,000으로 합산된다
        assert_eq!(
            monitor.evaluate("SOLUSDT", Side::Buy, dec!(70), Some(dec!(100))),
            RiskDecision::Blocked(BlockReason::TotalLimit)
        );
        assert!(monitor.check_before_order("SOLUSDT", Side::Buy, dec!(50), Some(dec!(100))));
    }

    #[test]
    fn test_overflowing_notional_is_blocked() {
        let monitor = monitor();
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Buy, Decimal::MAX, Some(Decimal::MAX)),
            RiskDecision::Blocked(BlockReason::SymbolLimit)
        );
        monitor.sync_position("BTCUSDT", Decimal::MAX);
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Buy, Decimal::MAX, None),
            RiskDecision::Blocked(BlockReason::SymbolLimit)
        );
        assert_eq!(monitor.counters().blocks_total, 2);
    }

    #[test]
    fn test_exact_ceiling_is_allowed() {
        let monitor = monitor();
        assert!(monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.2), None));
    }

    #[test]
    fn test_reducing_order_is_allowed() {
        let monitor = monitor();
        monitor.sync_position("BTCUSDT", dec!(0.19));
        assert!(!monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.05), None));
        assert!(monitor.check_before_order("BTCUSDT", Side::Sell, dec!(0.1), None));
    }

    #[test]
    fn test_aggregate_limit() {
        let monitor = monitor();
        monitor.on_fill("ETHUSDT", Side::Buy, dec!(3)); // 9,000
        assert!(monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.1), None)); // 14,000
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Buy, dec!(0.15), None), // 16,500
            RiskDecision::Blocked(BlockReason::TotalLimit)
        );
        // short 노출도 절대값으로 합산된다
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Sell, dec!(0.15), None),
            RiskDecision::Blocked(BlockReason::TotalLimit)
        );
    }

    #[test]
    fn test_missing_price_fails_closed() {
        let monitor = monitor();
        assert_eq!(
            monitor.evaluate("SOLUSDT", Side::Buy, dec!(1), None),
            RiskDecision::Blocked(BlockReason::NoPrice)
        );
        assert!(monitor.check_before_order("SOLUSDT", Side::Buy, dec!(1), Some(dec!(100))));

        monitor.on_fill("SOLUSDT", Side::Buy, dec!(1));
        assert_eq!(
            monitor.evaluate("BTCUSDT", Side::Buy, dec!(0.01), None),
            RiskDecision::Blocked(BlockReason::NoPrice)
        );
    }

    #[test]
    fn test_edge_floor_is_exclusive() {
        let monitor = monitor();

        assert!(!monitor.on_edge_update("BTCUSDT", dec!(1.5)));
        assert!(!monitor.is_frozen());

        assert!(monitor.on_edge_update("BTCUSDT", dec!(1.2)));
        assert!(monitor.is_frozen());

        let counters = monitor.counters();
        let record = counters.last_freeze.unwrap();
        assert_eq!(record.symbol.as_deref(), Some("BTCUSDT"));
        assert!(record.reason.contains("1.2"));
    }

    #[test]
    fn test_frozen_blocks_every_symbol() {
        let monitor = monitor();
        monitor.freeze("operator", None);

        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            assert_eq!(
                monitor.evaluate(symbol, Side::Buy, dec!(0.0001), Some(dec!(1))),
                RiskDecision::Blocked(BlockReason::Frozen)
            );
        }
        assert_eq!(monitor.counters().blocks_total, 3);

        monitor.reset();
        assert!(monitor.check_before_order("ETHUSDT", Side::Buy, dec!(0.1), None));
    }

    #[test]
    fn test_freeze_counts_transitions_not_calls() {
        let monitor = monitor();

        assert!(monitor.freeze("edge collapse", Some("BTCUSDT")));
        assert!(!monitor.freeze("still bad", Some("ETHUSDT")));
        assert!(!monitor.on_edge_update("BTCUSDT", dec!(2.0)));
        monitor.on_edge_update("ETHUSDT", dec!(0.1));

        let counters = monitor.counters();
        assert_eq!(counters.freezes_total, 1);
        let record = counters.last_freeze.unwrap();
        assert_eq!(record.symbol.as_deref(), Some("ETHUSDT"));

        monitor.reset();
        assert!(monitor.freeze("again", None));
        assert_eq!(monitor.counters().freezes_total, 2);
    }

    #[test]
    fn test_reset_keeps_counters() {
        let monitor = monitor();
        monitor.on_fill("BTCUSDT", Side::Buy, dec!(0.1));
        monitor.freeze("manual", Some("BTCUSDT"));
        monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.1), None);

        monitor.reset();

        let counters = monitor.counters();
        assert!(!counters.frozen);
        assert!(counters.last_freeze.is_none());
        assert_eq!(counters.freezes_total, 1);
        assert_eq!(counters.blocks_total, 1);
        assert!(monitor.get_positions().is_empty());
    }

    #[test]
    fn test_concurrent_checks_observe_freeze() {
        let monitor = Arc::new(monitor());
        monitor.freeze("kill switch", None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    (0..100).all(|_| !monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.01), None))
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(monitor.counters().blocks_total, 800);
    }

    #[test]
    fn test_metrics_emitted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let monitor = monitor();
            monitor.freeze("edge", Some("BTCUSDT"));
            monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.1), None);
        });

        let rendered = handle.render();
        assert!(rendered.contains("mm_risk_freezes_total 1"));
        assert!(rendered.contains("mm_risk_blocks_total{reason=\"frozen\"} 1"));
        assert!(rendered.contains("mm_risk_frozen 1"));
    }
}
