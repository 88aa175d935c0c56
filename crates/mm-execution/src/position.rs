//! 포지션 추적 및 대사.
//!
//! 제공 기능:
//! - 체결에 따른 심볼별 포지션 업데이트 (VWAP, 청산, 반전)
//! - 마크 가격 기반 미실현 손익
//! - 포지션 조회 및 집계
//! - 거래소 포지션과의 대사 (보고만 하며 자동 보정하지 않음)
//!
//! 모든 심볼이 하나의 `RwLock`을 공유합니다. 집계 조회는 읽기 잠금만
//! 잡으므로 다른 심볼의 쓰기가 끝나기를 잠깐 기다릴 뿐입니다.

use chrono::{DateTime, Utc};
use mm_core::{FillImpact, Position, Price, Quantity, ReconciliationConfig, Side};
use mm_risk::MarkPriceSource;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, PositionError};

/// 포지션 스냅샷 형식 버전.
pub const POSITION_SNAPSHOT_VERSION: u32 = 1;

/// 포지션 스냅샷.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub positions: BTreeMap<String, Position>,
}

/// 대사 결과.
///
/// `drift`가 true이면 로컬 상태와 거래소 상태가 허용 오차를 넘어 다릅니다.
/// 보정은 운영자 몫입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub symbol: String,
    pub local_qty: Quantity,
    pub exchange_qty: Quantity,
    /// `exchange_qty - local_qty`
    pub qty_drift: Quantity,
    pub local_avg_price: Option<Price>,
    pub exchange_avg_price: Option<Price>,
    /// 양쪽 평균가가 있을 때 `exchange - local`
    pub price_drift: Option<Decimal>,
    pub qty_mismatch: bool,
    pub price_mismatch: bool,
    pub drift: bool,
    pub checked_at: DateTime<Utc>,
}

/// 심볼별 포지션 트래커.
#[derive(Debug)]
pub struct PositionTracker {
    positions: RwLock<HashMap<String, Position>>,
    tolerances: ReconciliationConfig,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    /// 기본 대사 허용 오차로 생성합니다.
    pub fn new() -> Self {
        Self::with_tolerances(ReconciliationConfig::default())
    }

    pub fn with_tolerances(tolerances: ReconciliationConfig) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            tolerances,
        }
    }

    // ==================== 업데이트 ====================

    /// 체결을 반영합니다.
    pub fn on_fill(
        &self,
        symbol: &str,
        side: Side,
        qty: Quantity,
        price: Price,
    ) -> Result<FillImpact, PositionError> {
        if qty <= Decimal::ZERO {
            return Err(PositionError::InvalidQuantity(qty));
        }
        if price <= Decimal::ZERO {
            return Err(PositionError::InvalidPrice(price));
        }

        let mut positions = self.positions.write();
        let position = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
        let impact = position.apply_fill(side, qty, price).map_err(|e| {
            warn!(symbol, qty = %qty, price = %price, error = %e, "포지션 계산 오버플로우");
            PositionError::Overflow(e)
        })?;

        info!(
            symbol,
            side = %side,
            qty = %qty,
            price = %price,
            change = ?impact.change,
            position = %position.quantity,
            avg_entry = ?position.avg_entry_price,
            realized = %impact.realized_pnl,
            "포지션 업데이트"
        );
        publish(position);

        Ok(impact)
    }

    /// 마크 가격을 갱신합니다. 기록이 없으면 플랫 포지션을 만듭니다.
    pub fn update_mark_price(&self, symbol: &str, price: Price) -> Result<(), PositionError> {
        if price <= Decimal::ZERO {
            return Err(PositionError::InvalidPrice(price));
        }

        let mut positions = self.positions.write();
        let position = positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
        position.mark(price);
        debug!(symbol, mark = %price, unrealized = %position.unrealized_pnl(), "마크 가격 갱신");
        publish(position);

        Ok(())
    }

    // ==================== 조회 ====================

    /// 심볼 포지션. 기록이 없으면 플랫 포지션.
    pub fn get_position(&self, symbol: &str) -> Position {
        self.positions
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::flat(symbol))
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions
            .read()
            .get(symbol)
            .is_some_and(|p| !p.is_flat())
    }

    /// 모든 포지션 (심볼 순).
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// 플랫이 아닌 포지션.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions()
            .into_iter()
            .filter(|p| !p.is_flat())
            .collect()
    }

    /// 심볼별 부호 있는 수량.
    pub fn signed_quantities(&self) -> HashMap<String, Quantity> {
        self.positions
            .read()
            .iter()
            .map(|(symbol, p)| (symbol.clone(), p.quantity))
            .collect()
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.read().values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.read().values().map(|p| p.unrealized_pnl()).sum()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.positions.read().values().map(|p| p.total_pnl()).sum()
    }

    /// 마크 가격 기준 절대 명목 합계. 마크 가격이 없는 심볼은 제외됩니다.
    pub fn total_notional(&self) -> Decimal {
        self.positions
            .read()
            .values()
            .filter_map(|p| p.last_mark_price.map(|mark| p.notional_at(mark)))
            .sum()
    }

    // ==================== 대사 ====================

    /// 거래소 포지션과 비교합니다.
    ///
    /// 로컬 기록이 없으면 플랫으로 간주합니다. 평균가는 양쪽 모두
    /// 포지션이 있을 때만 비교합니다.
    pub fn reconcile_position(
        &self,
        symbol: &str,
        exchange_qty: Quantity,
        exchange_avg_price: Option<Price>,
    ) -> ReconciliationReport {
        let local = self.get_position(symbol);

        let qty_drift = exchange_qty - local.quantity;
        let qty_mismatch = qty_drift.abs() > self.tolerances.qty_tolerance;

        let exchange_avg_price = if exchange_qty.is_zero() {
            None
        } else {
            exchange_avg_price
        };
        let (price_drift, price_mismatch) = match (local.avg_entry_price, exchange_avg_price) {
            (Some(local_avg), Some(venue_avg)) => {
                let drift = venue_avg - local_avg;
                (Some(drift), drift.abs() > self.tolerances.price_tolerance)
            }
            _ => (None, false),
        };

        let report = ReconciliationReport {
            symbol: symbol.to_string(),
            local_qty: local.quantity,
            exchange_qty,
            qty_drift,
            local_avg_price: local.avg_entry_price,
            exchange_avg_price,
            price_drift,
            qty_mismatch,
            price_mismatch,
            drift: qty_mismatch || price_mismatch,
            checked_at: Utc::now(),
        };

        if report.drift {
            warn!(
                symbol,
                local_qty = %report.local_qty,
                exchange_qty = %report.exchange_qty,
                qty_drift = %report.qty_drift,
                price_drift = ?report.price_drift,
                "포지션 대사 불일치"
            );
        } else {
            debug!(symbol, qty = %report.local_qty, "포지션 대사 일치");
        }

        report
    }

    // ==================== 스냅샷 ====================

    pub fn persist(&self) -> PositionSnapshot {
        PositionSnapshot {
            version: POSITION_SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            positions: self
                .positions
                .read()
                .iter()
                .map(|(symbol, p)| (symbol.clone(), p.clone()))
                .collect(),
        }
    }

    /// 스냅샷으로 모든 포지션을 교체합니다.
    pub fn restore(&self, snapshot: PositionSnapshot) -> Result<usize, PersistenceError> {
        if snapshot.version != POSITION_SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                kind: "position",
                found: snapshot.version,
                expected: POSITION_SNAPSHOT_VERSION,
            });
        }

        let mut positions = self.positions.write();
        positions.clear();
        positions.extend(snapshot.positions);
        for position in positions.values() {
            publish(position);
        }
        info!(positions = positions.len(), "포지션 복구");
        Ok(positions.len())
    }
}

impl MarkPriceSource for PositionTracker {
    fn mark_price(&self, symbol: &str) -> Option<Price> {
        self.positions
            .read()
            .get(symbol)
            .and_then(|p| p.last_mark_price)
    }
}

fn publish(position: &Position) {
    crate::metrics::record_position(
        &position.symbol,
        position.quantity,
        position.total_pnl(),
    );
}
