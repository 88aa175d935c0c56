//! 멱등 주문 라우터.
//!
//! 제공 기능:
//! - 멱등성 키별 단일 제출 보장 (결과 캐시)
//! - 일시적 오류에 대한 지수 백오프 재시도, 시도당 타임아웃, 주문별 마감 시간
//! - 검증 오류/거래소 거부와 일시적 오류의 명시적 구분
//! - 응답이 유실된 `Pending` 주문의 거래소 상태 조회 해소
//! - 시도별 지연 및 재시도 횟수 메트릭
//!
//! 같은 키에 대한 작업은 키별 비동기 뮤텍스로 직렬화되고, 다른 키는
//! 전역 잠금 없이 독립적으로 진행됩니다.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mm_core::{FillEvent, OrderEvent, OrderIntent, OrderState, Quantity, Side};
use mm_gateway::{
    with_retry, Gateway, GatewayError, PlaceOrderResponse, RetryConfig, RetryStats,
    VenueOrderStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use crate::error::RouteError;
use crate::metrics;
use crate::registry::{OrderRegistry, OrderStateRecord};

/// 라우터 작업을 위한 Result 타입.
pub type RouteResult<T> = Result<T, RouteError>;

/// 주문 제출 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub exchange_order_id: Option<String>,
    /// 결과 생성 시점의 상태
    pub state: OrderState,
    pub filled_qty: Quantity,
    /// 재시도 횟수 (시도 횟수 - 1)
    pub retries: u32,
}

impl OrderResult {
    fn from_record(record: &OrderStateRecord, retries: u32) -> Self {
        Self {
            order_id: record.order_id.clone(),
            symbol: record.symbol.clone(),
            side: record.side,
            exchange_order_id: record.exchange_order_id.clone(),
            state: record.state,
            filled_qty: record.filled_qty,
            retries,
        }
    }
}

/// 주문 취소 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelResult {
    pub order_id: String,
    pub state: OrderState,
    pub filled_qty: Quantity,
    /// 거래소가 취소를 확인했는지 여부
    pub confirmed: bool,
}

/// 주문별 라우팅 통계.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteStats {
    pub attempts: u32,
    pub retries: u32,
    pub total_latency: Duration,
    pub total_backoff: Duration,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub deadline_exceeded: bool,
    pub last_error: Option<String>,
}

type Slot = Arc<Mutex<Option<RouteResult<OrderResult>>>>;

/// 멱등 주문 라우터.
pub struct OrderRouter {
    gateway: Arc<dyn Gateway>,
    registry: Arc<OrderRegistry>,
    retry: RetryConfig,
    /// 키별 직렬화 잠금과 캐시된 제출 결과
    slots: DashMap<String, Slot>,
    stats: DashMap<String, RouteStats>,
}

impl std::fmt::Debug for OrderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRouter")
            .field("gateway", &self.gateway.name())
            .field("retry", &self.retry)
            .field("keys", &self.slots.len())
            .finish()
    }
}

impl OrderRouter {
    pub fn new(gateway: Arc<dyn Gateway>, registry: Arc<OrderRegistry>, retry: RetryConfig) -> Self {
        Self {
            gateway,
            registry,
            retry,
            slots: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 주문별 라우팅 통계.
    pub fn route_stats(&self, order_id: &str) -> Option<RouteStats> {
        self.stats.get(order_id).map(|s| s.value().clone())
    }

    fn slot(&self, order_id: &str) -> Slot {
        Arc::clone(self.slots.entry(order_id.to_string()).or_default().value())
    }

    /// 최종 상태에 도달한 키의 캐시와 통계를 해제합니다.
    ///
    /// 이후 같은 키의 `place`는 레지스트리 기록으로 결과를 만듭니다.
    pub fn release_if_terminal(&self, order_id: &str) -> bool {
        let terminal = self
            .registry
            .state(order_id)
            .is_some_and(|state| state.is_terminal());
        if terminal {
            self.slots.remove(order_id);
            self.stats.remove(order_id);
            debug!(order_id, "최종 상태 주문의 라우터 캐시 해제");
        }
        terminal
    }

    /// 캐시에 남아 있는 키 수.
    pub fn cached_keys(&self) -> usize {
        self.slots.len()
    }

    // ==================== 제출 ====================

    /// 주문을 제출합니다.
    ///
    /// 같은 키로 다시 호출하면 게이트웨이를 호출하지 않고 캐시된 결과를
    /// 반환합니다. 동시에 호출되면 두 번째 호출은 첫 번째 결과를 기다립니다.
    /// 레지스트리에 이미 기록이 있는 키 (복구된 주문)는 재제출하지 않습니다.
    pub async fn place(&self, intent: &OrderIntent) -> RouteResult<OrderResult> {
        if let Err(e) = intent.validate() {
            warn!(order_id = %intent.order_id, error = %e, "주문 검증 실패");
            return Err(RouteError::Validation(e));
        }

        let slot = self.slot(&intent.order_id);
        let mut cached = slot.lock().await;
        if let Some(result) = cached.as_ref() {
            debug!(order_id = %intent.order_id, "캐시된 제출 결과 반환");
            return result.clone();
        }

        let result = match self.registry.get(&intent.order_id) {
            Some(record) => {
                info!(
                    order_id = %record.order_id,
                    state = %record.state,
                    "기존 주문 기록 발견, 재제출하지 않음"
                );
                result_from_record(&record)
            }
            None => {
                let span = mm_core::order_span!(
                    "place_order",
                    intent.order_id,
                    intent.symbol,
                    intent.side
                );
                self.dispatch(intent).instrument(span).await
            }
        };

        *cached = Some(result.clone());
        drop(cached);
        self.release_if_terminal(&intent.order_id);
        result
    }

    async fn dispatch(&self, intent: &OrderIntent) -> RouteResult<OrderResult> {
        let record = self.registry.create(intent)?;

        let gateway: &dyn Gateway = self.gateway.as_ref();
        let started_at = Utc::now();
        let outcome = with_retry(&self.retry, "place_order", |attempt| {
            debug!(attempt, "주문 제출 시도");
            gateway.place_order(intent)
        })
        .await;

        self.observe(
            &intent.order_id,
            &intent.symbol,
            &outcome.stats,
            started_at,
            outcome.result.as_ref().err(),
        );

        let retries = outcome.stats.retries();
        match outcome.result {
            Ok(response) => self.on_venue_report(&record, response, retries),
            Err(e) => self.on_place_error(&record, e, &outcome.stats).await,
        }
    }

    /// 거래소가 보고한 주문 상태를 레지스트리에 반영합니다.
    fn on_venue_report(
        &self,
        record: &OrderStateRecord,
        response: PlaceOrderResponse,
        retries: u32,
    ) -> RouteResult<OrderResult> {
        if response.status == VenueOrderStatus::Rejected {
            let reason = response
                .reject_reason
                .unwrap_or_else(|| "unspecified".to_string());
            return self.reject(record, reason);
        }

        self.registry.handle_event(
            &record.order_id,
            OrderEvent::Ack {
                exchange_order_id: response.exchange_order_id.clone(),
            },
        )?;
        metrics::record_order_placed(&record.symbol, record.side);

        // 체결 없이 취소된 주문만 여기서 닫는다. 체결이 있으면 체결 조회가 먼저다
        if response.status == VenueOrderStatus::Canceled && response.filled_qty.is_zero() {
            self.registry
                .handle_event(&record.order_id, OrderEvent::CancelAck)?;
            metrics::record_order_canceled(&record.symbol, record.side);
        }

        info!(
            exchange_order_id = %response.exchange_order_id,
            venue_status = ?response.status,
            qty = %record.requested_qty,
            price = ?record.limit_price,
            retries,
            "주문 접수됨"
        );

        let record = self
            .registry
            .get(&record.order_id)
            .ok_or_else(|| RouteError::NotFound(record.order_id.clone()))?;
        Ok(OrderResult::from_record(&record, retries))
    }

    async fn on_place_error(
        &self,
        record: &OrderStateRecord,
        error: GatewayError,
        stats: &RetryStats,
    ) -> RouteResult<OrderResult> {
        match error {
            e if e.is_retryable() => {
                // 타임아웃은 최종 전이가 아니다. 이후 조회로 해소된다
                warn!(
                    attempts = stats.attempts,
                    deadline_exceeded = stats.deadline_exceeded,
                    error = %e,
                    "주문 제출 타임아웃, Pending 유지"
                );
                Err(RouteError::Timeout {
                    order_id: record.order_id.clone(),
                    attempts: stats.attempts,
                    message: e.to_string(),
                })
            }
            GatewayError::Rejected(reason) => self.reject(record, reason),
            GatewayError::DuplicateOrder(_) => {
                info!(attempts = stats.attempts, "거래소에 이미 있는 주문, 상태 조회로 해소");
                self.resolve_from_venue(record, stats.retries()).await
            }
            e if stats.attempts > 1 => {
                // 앞선 시도가 거래소에 도달했을 수 있으므로 거부로 닫지 않는다
                warn!(
                    attempts = stats.attempts,
                    error = %e,
                    "재시도 중 비일시적 에러, 상태 조회로 해소"
                );
                self.resolve_from_venue(record, stats.retries()).await
            }
            e => {
                warn!(error = %e, "게이트웨이가 요청을 거부함");
                self.registry.handle_event(
                    &record.order_id,
                    OrderEvent::Reject {
                        reason: e.to_string(),
                    },
                )?;
                metrics::record_order_rejected(&record.symbol, record.side, e.label());
                Err(RouteError::Gateway(e))
            }
        }
    }

    /// 거래소 주문 상태를 조회하여 `Pending` 기록을 해소합니다.
    ///
    /// 거래소가 주문을 모르면 도달하지 않은 것이므로 거부로 닫습니다.
    /// 조회 자체가 실패하면 기록은 `Pending`으로 남습니다.
    async fn resolve_from_venue(
        &self,
        record: &OrderStateRecord,
        retries: u32,
    ) -> RouteResult<OrderResult> {
        let gateway: &dyn Gateway = self.gateway.as_ref();
        let order_id = record.order_id.as_str();
        let outcome = with_retry(&self.retry, "query_order", |_| gateway.query_order(order_id)).await;

        match outcome.result {
            Ok(report) => {
                info!(
                    exchange_order_id = %report.exchange_order_id,
                    venue_status = ?report.status,
                    "거래소 조회로 주문 상태 해소"
                );
                self.on_venue_report(record, report.into(), retries)
            }
            Err(GatewayError::OrderNotFound(_)) => {
                self.reject(record, UNKNOWN_AT_VENUE.to_string())
            }
            Err(e) => {
                warn!(error = %e, "주문 상태 조회 실패, Pending 유지");
                Err(self.map_error(order_id, e, outcome.stats.attempts))
            }
        }
    }

    /// `Pending` 주문을 거래소 상태 조회로 해소하고 현재 상태를 반환합니다.
    ///
    /// 이미 해소된 주문은 게이트웨이를 호출하지 않습니다.
    pub async fn resolve_pending(&self, order_id: &str) -> RouteResult<OrderState> {
        if !self.registry.contains(order_id) {
            return Err(RouteError::NotFound(order_id.to_string()));
        }
        let slot = self.slot(order_id);
        let mut cached = slot.lock().await;
        let state = self.resolve_locked(order_id, &mut cached).await;
        drop(cached);
        self.release_if_terminal(order_id);
        state
    }

    async fn resolve_locked(
        &self,
        order_id: &str,
        cached: &mut Option<RouteResult<OrderResult>>,
    ) -> RouteResult<OrderState> {
        let record = self
            .registry
            .get(order_id)
            .ok_or_else(|| RouteError::NotFound(order_id.to_string()))?;
        if record.state != OrderState::Pending {
            return Ok(record.state);
        }

        let retries = self.stats.get(order_id).map(|s| s.retries).unwrap_or(0);
        let span = mm_core::order_span!("resolve_order", record.order_id, record.symbol, record.side);
        let result = self.resolve_from_venue(&record, retries).instrument(span).await;

        let state = self.registry.state(order_id).unwrap_or(record.state);
        if state == OrderState::Pending {
            return result.map(|r| r.state);
        }
        *cached = Some(result);
        Ok(state)
    }

    fn reject(&self, record: &OrderStateRecord, reason: String) -> RouteResult<OrderResult> {
        self.registry.handle_event(
            &record.order_id,
            OrderEvent::Reject {
                reason: reason.clone(),
            },
        )?;
        metrics::record_order_rejected(&record.symbol, record.side, &reason);
        warn!(reason = %reason, "주문 거부로 종료");
        Err(RouteError::Rejected {
            order_id: record.order_id.clone(),
            reason,
        })
    }

    fn observe(
        &self,
        order_id: &str,
        symbol: &str,
        retry: &RetryStats,
        started_at: DateTime<Utc>,
        error: Option<&GatewayError>,
    ) {
        // 시도마다 지연과 그 시점까지의 재시도 횟수를 하나씩 기록한다
        for (retries_so_far, latency) in (0u32..).zip(&retry.attempt_latencies) {
            metrics::record_attempt_latency(symbol, *latency);
            metrics::record_retry_count(symbol, retries_so_far);
        }

        let stats = RouteStats {
            attempts: retry.attempts,
            retries: retry.retries(),
            total_latency: retry.total_latency(),
            total_backoff: retry.total_delay,
            first_attempt_at: Some(started_at),
            last_attempt_at: Some(Utc::now()),
            succeeded: error.is_none(),
            deadline_exceeded: retry.deadline_exceeded,
            last_error: error.map(|e| e.to_string()),
        };
        self.stats.insert(order_id.to_string(), stats);
    }

    // ==================== 취소 ====================

    /// 주문을 취소합니다.
    ///
    /// `Pending` 주문은 먼저 거래소 상태 조회로 해소한 뒤 취소합니다.
    /// 알 수 없는 주문이나 최종 상태 주문은 취소를 보내지 않고 에러를 반환합니다.
    pub async fn cancel(&self, order_id: &str) -> RouteResult<CancelResult> {
        if !self.registry.contains(order_id) {
            return Err(RouteError::NotFound(order_id.to_string()));
        }

        let slot = self.slot(order_id);
        let mut cached = slot.lock().await;
        let result = self.cancel_locked(order_id, &mut cached).await;
        drop(cached);
        self.release_if_terminal(order_id);
        result
    }

    async fn cancel_locked(
        &self,
        order_id: &str,
        cached: &mut Option<RouteResult<OrderResult>>,
    ) -> RouteResult<CancelResult> {
        if self.registry.state(order_id) == Some(OrderState::Pending) {
            self.resolve_locked(order_id, cached).await?;
        }

        let record = self
            .registry
            .get(order_id)
            .ok_or_else(|| RouteError::NotFound(order_id.to_string()))?;
        if !record.state.is_working() {
            return Err(RouteError::InvalidState {
                order_id: order_id.to_string(),
                state: record.state,
            });
        }

        let gateway: &dyn Gateway = self.gateway.as_ref();
        let outcome = with_retry(&self.retry, "cancel_order", |attempt| {
            debug!(order_id, attempt, "주문 취소 시도");
            gateway.cancel_order(order_id)
        })
        .await;

        match outcome.result {
            Ok(response) if response.status == VenueOrderStatus::Canceled => {
                self.registry.handle_event(order_id, OrderEvent::CancelAck)?;
                metrics::record_order_canceled(&record.symbol, record.side);
                info!(
                    order_id,
                    filled = %record.filled_qty,
                    remaining = %record.remaining_qty,
                    "주문 취소됨"
                );
                self.cancel_result(order_id, true)
            }
            Ok(response) => {
                warn!(order_id, status = ?response.status, "거래소가 취소를 확인하지 않음");
                self.cancel_result(order_id, false)
            }
            Err(e) => Err(self.map_error(order_id, e, outcome.stats.attempts)),
        }
    }

    fn cancel_result(&self, order_id: &str, confirmed: bool) -> RouteResult<CancelResult> {
        let record = self
            .registry
            .get(order_id)
            .ok_or_else(|| RouteError::NotFound(order_id.to_string()))?;
        Ok(CancelResult {
            order_id: record.order_id,
            state: record.state,
            filled_qty: record.filled_qty,
            confirmed,
        })
    }

    // ==================== 체결 조회 ====================

    /// 거래소에서 주문의 체결 목록을 조회합니다.
    ///
    /// 같은 재시도 정책을 따릅니다. 레지스트리에 적용하지는 않습니다.
    pub async fn poll_fills(&self, order_id: &str) -> RouteResult<Vec<FillEvent>> {
        if !self.registry.contains(order_id) {
            return Err(RouteError::NotFound(order_id.to_string()));
        }

        let gateway: &dyn Gateway = self.gateway.as_ref();
        let outcome = with_retry(&self.retry, "poll_fills", |_| gateway.poll_fills(order_id)).await;
        outcome
            .result
            .map_err(|e| self.map_error(order_id, e, outcome.stats.attempts))
    }

    fn map_error(&self, order_id: &str, error: GatewayError, attempts: u32) -> RouteError {
        if error.is_retryable() {
            RouteError::Timeout {
                order_id: order_id.to_string(),
                attempts,
                message: error.to_string(),
            }
        } else {
            RouteError::Gateway(error)
        }
    }
}

/// 거래소가 모르는 주문을 닫을 때의 거부 사유.
pub const UNKNOWN_AT_VENUE: &str = "UnknownAtVenue";

fn result_from_record(record: &OrderStateRecord) -> RouteResult<OrderResult> {
    match (record.state, &record.reject_reason) {
        (OrderState::Rejected, reason) => Err(RouteError::Rejected {
            order_id: record.order_id.clone(),
            reason: reason.clone().unwrap_or_else(|| "unspecified".to_string()),
        }),
        _ => Ok(OrderResult::from_record(record, 0)),
    }
}
