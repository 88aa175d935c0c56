//! 주문 상태 기계 레지스트리.
//!
//! 제공 기능:
//! - 멱등성 키별 주문 생명주기 기록 (유일한 소유자)
//! - 상태 전이 검증 및 감사용 이벤트 이력
//! - 체결 ID 기반 중복 제거와 과체결 거부
//! - 크래시 복구용 결정적 스냅샷
//!
//! 주문별 변경은 `DashMap` 샤드 잠금으로 직렬화되며, 다른 주문의 기록
//! 조회는 서로를 막지 않습니다.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mm_core::{
    is_legal_transition, FillEvent, OrderEvent, OrderIntent, OrderState, Price, Quantity, Side,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

use crate::error::{PersistenceError, StateTransitionError};

/// 레지스트리 스냅샷 형식 버전.
pub const REGISTRY_SNAPSHOT_VERSION: u32 = 1;

/// 이벤트 이력 항목.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event: OrderEvent,
    pub from: OrderState,
    pub to: OrderState,
    pub at: DateTime<Utc>,
}

/// 이벤트 적용 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// 상태 전이가 적용됨
    Transitioned { from: OrderState, to: OrderState },
    /// 이미 적용된 체결 ID (변경 없음)
    DuplicateFill,
}

impl EventOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EventOutcome::DuplicateFill)
    }
}

/// 주문 하나의 권위 있는 상태 기록.
///
/// 관찰 가능한 모든 시점에서 `filled_qty + remaining_qty == requested_qty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStateRecord {
    /// 멱등성 키
    pub order_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 지정가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Price>,
    /// 현재 상태
    pub state: OrderState,
    /// 요청 수량
    pub requested_qty: Quantity,
    /// 체결 수량
    pub filled_qty: Quantity,
    /// 잔량
    pub remaining_qty: Quantity,
    /// 체결 가중 평균가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Price>,
    /// 거래소 주문 ID (접수 확인 시 설정)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    /// 거부 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 추가 전용 이벤트 이력
    pub history: Vec<HistoryEntry>,
    /// 적용된 체결 ID
    #[serde(default)]
    pub applied_fills: BTreeSet<String>,
}

impl OrderStateRecord {
    fn new(intent: &OrderIntent) -> Self {
        let now = Utc::now();
        Self {
            order_id: intent.order_id.clone(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            limit_price: intent.price,
            state: OrderState::Pending,
            requested_qty: intent.quantity,
            filled_qty: Decimal::ZERO,
            remaining_qty: intent.quantity,
            avg_fill_price: None,
            exchange_order_id: None,
            reject_reason: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            applied_fills: BTreeSet::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 수량 불변식 검사.
    pub fn quantities_consistent(&self) -> bool {
        self.filled_qty + self.remaining_qty == self.requested_qty
    }

    /// 이벤트를 적용합니다. 실패하면 기록은 변경되지 않습니다.
    fn apply(&mut self, event: OrderEvent) -> Result<EventOutcome, StateTransitionError> {
        let fill = event
            .fill_parts()
            .map(|(qty, price, fill_id)| (qty, price, fill_id.map(str::to_string)));

        // 재생된 체결은 최종 상태에서도 조용히 무시한다
        if let Some((_, _, Some(fill_id))) = &fill {
            if self.applied_fills.contains(fill_id) {
                return Ok(EventOutcome::DuplicateFill);
            }
        }

        if self.state.is_terminal() {
            return Err(StateTransitionError::Terminal {
                order_id: self.order_id.clone(),
                state: self.state,
                event: event.kind(),
            });
        }
        if !is_legal_transition(self.state, &event) {
            return Err(StateTransitionError::Illegal {
                order_id: self.order_id.clone(),
                from: self.state,
                event: event.kind(),
            });
        }

        if let Some((qty, price, fill_id)) = fill {
            self.check_fill(&event, qty, price)?;

            let prior_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_qty;
            self.filled_qty += qty;
            self.remaining_qty -= qty;
            self.avg_fill_price = Some((prior_notional + qty * price) / self.filled_qty);
            if let Some(fill_id) = fill_id {
                self.applied_fills.insert(fill_id);
            }
        }

        match &event {
            OrderEvent::Ack { exchange_order_id } => {
                self.exchange_order_id = Some(exchange_order_id.clone());
            }
            OrderEvent::Reject { reason } => {
                self.reject_reason = Some(reason.clone());
            }
            _ => {}
        }

        let from = self.state;
        let to = event.target_state();
        let now = Utc::now();
        self.state = to;
        self.updated_at = now;
        self.history.push(HistoryEntry {
            event,
            from,
            to,
            at: now,
        });

        Ok(EventOutcome::Transitioned { from, to })
    }

    fn check_fill(
        &self,
        event: &OrderEvent,
        qty: Quantity,
        price: Price,
    ) -> Result<(), StateTransitionError> {
        if qty <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(StateTransitionError::InvalidFill {
                order_id: self.order_id.clone(),
            });
        }
        if qty > self.remaining_qty {
            return Err(StateTransitionError::Overfill {
                order_id: self.order_id.clone(),
                remaining: self.remaining_qty,
                attempted: qty,
            });
        }
        let mismatch = match event {
            OrderEvent::PartialFill { .. } => qty == self.remaining_qty,
            OrderEvent::FullFill { .. } => qty != self.remaining_qty,
            _ => false,
        };
        if mismatch {
            return Err(StateTransitionError::QuantityMismatch {
                order_id: self.order_id.clone(),
                event: event.kind(),
                quantity: qty,
                remaining: self.remaining_qty,
            });
        }
        Ok(())
    }
}

/// 레지스트리 스냅샷.
///
/// 기록은 주문 ID 순으로 정렬되어 같은 상태는 같은 문서를 만듭니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub records: BTreeMap<String, OrderStateRecord>,
}

/// 주문 상태 기계 레지스트리.
#[derive(Debug, Default)]
pub struct OrderRegistry {
    records: DashMap<String, OrderStateRecord>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 스냅샷에서 레지스트리를 생성합니다.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self, PersistenceError> {
        let registry = Self::new();
        registry.restore(snapshot)?;
        Ok(registry)
    }

    // ==================== 생성 및 전이 ====================

    /// `Pending` 상태의 새 기록을 등록합니다.
    pub fn create(&self, intent: &OrderIntent) -> Result<OrderStateRecord, StateTransitionError> {
        match self.records.entry(intent.order_id.clone()) {
            Entry::Occupied(_) => Err(StateTransitionError::DuplicateOrder(
                intent.order_id.clone(),
            )),
            Entry::Vacant(vacant) => {
                let record = OrderStateRecord::new(intent);
                debug!(
                    order_id = %record.order_id,
                    symbol = %record.symbol,
                    side = %record.side,
                    qty = %record.requested_qty,
                    "주문 기록 생성"
                );
                vacant.insert(record.clone());
                Ok(record)
            }
        }
    }

    /// 상태 전이 이벤트를 적용합니다.
    ///
    /// 잘못된 전이는 에러로 기록되고 이벤트는 폐기됩니다.
    pub fn handle_event(
        &self,
        order_id: &str,
        event: OrderEvent,
    ) -> Result<EventOutcome, StateTransitionError> {
        let Some(mut record) = self.records.get_mut(order_id) else {
            error!(order_id, event = event.kind(), "알 수 없는 주문에 대한 이벤트 폐기");
            return Err(StateTransitionError::UnknownOrder(order_id.to_string()));
        };
        Self::apply_logged(&mut record, event)
    }

    /// 체결을 적용합니다.
    ///
    /// 잔량과 같으면 `FullFill`, 작으면 `PartialFill`로 처리합니다.
    /// 이미 적용된 `fill_id`는 변경 없이 `DuplicateFill`을 반환합니다.
    pub fn apply_fill(&self, fill: &FillEvent) -> Result<EventOutcome, StateTransitionError> {
        let Some(mut record) = self.records.get_mut(&fill.order_id) else {
            error!(order_id = %fill.order_id, fill_id = %fill.fill_id, "알 수 없는 주문의 체결 폐기");
            return Err(StateTransitionError::UnknownOrder(fill.order_id.clone()));
        };

        let event = if fill.quantity == record.remaining_qty {
            OrderEvent::FullFill {
                quantity: fill.quantity,
                price: fill.price,
                fill_id: Some(fill.fill_id.clone()),
            }
        } else {
            OrderEvent::PartialFill {
                quantity: fill.quantity,
                price: fill.price,
                fill_id: Some(fill.fill_id.clone()),
            }
        };
        Self::apply_logged(&mut record, event)
    }

    fn apply_logged(
        record: &mut OrderStateRecord,
        event: OrderEvent,
    ) -> Result<EventOutcome, StateTransitionError> {
        let kind = event.kind();
        match record.apply(event) {
            Ok(EventOutcome::DuplicateFill) => {
                debug!(order_id = %record.order_id, "이미 적용된 체결, 무시");
                Ok(EventOutcome::DuplicateFill)
            }
            Ok(EventOutcome::Transitioned { from, to }) => {
                info!(
                    order_id = %record.order_id,
                    symbol = %record.symbol,
                    event = kind,
                    from = %from,
                    to = %to,
                    filled = %record.filled_qty,
                    remaining = %record.remaining_qty,
                    "주문 상태 전이"
                );
                Ok(EventOutcome::Transitioned { from, to })
            }
            Err(e) => {
                error!(
                    order_id = %record.order_id,
                    state = %record.state,
                    event = kind,
                    error = %e,
                    "잘못된 상태 전이, 이벤트 폐기"
                );
                Err(e)
            }
        }
    }

    // ==================== 조회 ====================

    /// 기록 스냅샷을 반환합니다.
    pub fn get(&self, order_id: &str) -> Option<OrderStateRecord> {
        self.records.get(order_id).map(|r| r.value().clone())
    }

    pub fn state(&self, order_id: &str) -> Option<OrderState> {
        self.records.get(order_id).map(|r| r.state)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.records.contains_key(order_id)
    }

    /// 모든 기록 (생성 시각, 주문 ID 순).
    pub fn all(&self) -> Vec<OrderStateRecord> {
        self.collect(|_| true)
    }

    pub fn by_state(&self, state: OrderState) -> Vec<OrderStateRecord> {
        self.collect(|r| r.state == state)
    }

    pub fn by_symbol(&self, symbol: &str) -> Vec<OrderStateRecord> {
        self.collect(|r| r.symbol == symbol)
    }

    /// 최종 상태가 아닌 기록.
    pub fn active(&self) -> Vec<OrderStateRecord> {
        self.collect(|r| r.state.is_active())
    }

    pub fn terminal(&self) -> Vec<OrderStateRecord> {
        self.collect(|r| r.state.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect(&self, filter: impl Fn(&OrderStateRecord) -> bool) -> Vec<OrderStateRecord> {
        let mut records: Vec<OrderStateRecord> = self
            .records
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        records
    }

    // ==================== 스냅샷 ====================

    /// 모든 기록의 결정적 스냅샷.
    pub fn persist(&self) -> RegistrySnapshot {
        let records = self
            .records
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        RegistrySnapshot {
            version: REGISTRY_SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            records,
        }
    }

    /// 스냅샷으로 모든 기록을 교체합니다. 주문을 재제출하지 않습니다.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> Result<usize, PersistenceError> {
        if snapshot.version != REGISTRY_SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                kind: "registry",
                found: snapshot.version,
                expected: REGISTRY_SNAPSHOT_VERSION,
            });
        }

        self.records.clear();
        let count = snapshot.records.len();
        let mut active = 0usize;
        for (order_id, record) in snapshot.records {
            if record.state.is_active() {
                active += 1;
            }
            self.records.insert(order_id, record);
        }

        info!(
            orders = count,
            active,
            taken_at = %snapshot.taken_at,
            "주문 레지스트리 복구"
        );
        Ok(count)
    }
}
