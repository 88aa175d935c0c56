//! 실행 엔진.
//!
//! 리스크 모니터, 라우터, 상태 기계 레지스트리, 포지션 트래커를 하나의
//! 제어 흐름으로 묶습니다:
//!
//! 호출자 → 리스크 사전 검사 → 라우터 제출 → 게이트웨이 → 레지스트리 전이,
//! 체결 조회 → 레지스트리 체결 적용 → 포지션 트래커 → 리스크 포지션 갱신.
//!
//! 심볼별 워커가 공유 참조(`Arc<ExecutionEngine>`)로 동시에 호출합니다.

use chrono::Utc;
use futures::future::join_all;
use mm_core::{
    try_init_logging, Bps, EngineConfig, FillEvent, OrderIntent, OrderState, Price,
    ReconciliationConfig,
};
use mm_gateway::{with_retry, Gateway, RetryConfig};
use mm_risk::{BlockReason, MarkPriceSource, RiskDecision, RiskLimits, RiskMonitor};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, PersistenceError};
use crate::metrics;
use crate::persistence::{EngineSnapshot, SnapshotStore, SnapshotWriter, ENGINE_SNAPSHOT};
use crate::position::{PositionTracker, ReconciliationReport};
use crate::registry::{EventOutcome, OrderRegistry};
use crate::router::{CancelResult, OrderResult, OrderRouter, RouteResult};

/// 주문 제출 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 라우터가 주문을 제출함
    Placed(OrderResult),
    /// 리스크 사전 검사에서 차단됨 (게이트웨이에 도달하지 않음)
    Blocked { order_id: String, reason: BlockReason },
}

impl FillReport {
    fn empty(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            applied: 0,
            duplicates: 0,
            discarded: 0,
            state: None,
        }
    }
}

impl SubmitOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, SubmitOutcome::Placed(_))
    }

    pub fn order_result(&self) -> Option<&OrderResult> {
        match self {
            SubmitOutcome::Placed(result) => Some(result),
            SubmitOutcome::Blocked { .. } => None,
        }
    }
}

/// 체결 처리 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReport {
    pub order_id: String,
    /// 새로 적용된 체결 수
    pub applied: usize,
    /// 이미 적용되어 무시된 체결 수
    pub duplicates: usize,
    /// 상태 기계가 거부한 체결 수
    pub discarded: usize,
    /// 처리 후 주문 상태
    pub state: Option<OrderState>,
}

/// 복구 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub orders: usize,
    pub active_orders: usize,
    pub positions: usize,
}

/// 실행 엔진.
pub struct ExecutionEngine {
    gateway: Arc<dyn Gateway>,
    router: OrderRouter,
    registry: Arc<OrderRegistry>,
    tracker: Arc<PositionTracker>,
    risk: Arc<RiskMonitor>,
    /// 체결 반영(읽기)과 스냅샷(쓰기)을 배제합니다
    apply_gate: RwLock<()>,
    writer: Mutex<Option<SnapshotWriter>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("gateway", &self.gateway.name())
            .field("orders", &self.registry.len())
            .field("frozen", &self.risk.is_frozen())
            .finish()
    }
}

impl ExecutionEngine {
    /// 새 실행 엔진을 생성합니다.
    pub fn new(
        gateway: Arc<dyn Gateway>,
        limits: RiskLimits,
        retry: RetryConfig,
        tolerances: ReconciliationConfig,
    ) -> Self {
        let registry = Arc::new(OrderRegistry::new());
        let tracker = Arc::new(PositionTracker::with_tolerances(tolerances));
        let prices: Arc<dyn MarkPriceSource> = tracker.clone();
        let risk = Arc::new(RiskMonitor::new(limits, prices));
        let router = OrderRouter::new(Arc::clone(&gateway), Arc::clone(&registry), retry);

        info!(gateway = gateway.name(), "실행 엔진 초기화");

        Self {
            gateway,
            router,
            registry,
            tracker,
            risk,
            apply_gate: RwLock::new(()),
            writer: Mutex::new(None),
        }
    }

    /// 엔진 설정으로 생성합니다.
    pub fn from_config(gateway: Arc<dyn Gateway>, config: &EngineConfig) -> Self {
        Self::new(
            gateway,
            RiskLimits::from(&config.risk),
            RetryConfig::from(&config.router),
            config.reconciliation.clone(),
        )
    }

    /// 설정에 따라 엔진을 기동합니다.
    ///
    /// 순서: 설정 검증, 로깅 초기화, 스냅샷 복구, writer 연결, 주기적 스냅샷.
    /// 이미 전역 subscriber가 있으면 로깅 초기화는 건너뜁니다.
    pub async fn bootstrap(
        gateway: Arc<dyn Gateway>,
        config: &EngineConfig,
    ) -> Result<(Arc<Self>, RecoveryReport), EngineError> {
        config.validate()?;
        if !try_init_logging(&config.logging)? {
            debug!("전역 로깅이 이미 설정되어 있어 초기화 생략");
        }

        let store = SnapshotStore::new(config.persistence.snapshot_dir.clone());
        let engine = Self::from_config(gateway, config);
        let report = engine.recover(&store)?;
        let engine = Arc::new(engine.with_snapshot_writer(SnapshotWriter::spawn(store)));

        if config.persistence.snapshot_interval_ms > 0 {
            let interval = Duration::from_millis(config.persistence.snapshot_interval_ms);
            // 엔진이 해제되면 태스크도 끝나므로 핸들을 보관하지 않는다
            let _ = engine.spawn_periodic_snapshots(interval);
        }

        info!(
            snapshot_dir = %config.persistence.snapshot_dir.display(),
            interval_ms = config.persistence.snapshot_interval_ms,
            "실행 엔진 기동"
        );
        Ok((engine, report))
    }

    /// 상태 변경 시 스냅샷을 보낼 writer를 연결합니다.
    pub fn with_snapshot_writer(mut self, writer: SnapshotWriter) -> Self {
        *self.writer.get_mut() = Some(writer);
        self
    }

    pub fn router(&self) -> &OrderRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<OrderRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    pub fn risk(&self) -> &Arc<RiskMonitor> {
        &self.risk
    }

    // ==================== 주문 ====================

    /// 주문 의도를 검증하고 리스크 검사를 거쳐 제출합니다.
    ///
    /// 이미 레지스트리에 있는 키는 리스크 검사 없이 라우터의 캐시된 결과를
    /// 받습니다.
    pub async fn submit(&self, intent: &OrderIntent) -> Result<SubmitOutcome, EngineError> {
        intent.validate()?;

        if !self.registry.contains(&intent.order_id) {
            let decision =
                self.risk
                    .evaluate(&intent.symbol, intent.side, intent.quantity, intent.price);
            if let RiskDecision::Blocked(reason) = decision {
                info!(
                    order_id = %intent.order_id,
                    symbol = %intent.symbol,
                    reason = %reason,
                    "리스크 검사로 주문 차단"
                );
                return Ok(SubmitOutcome::Blocked {
                    order_id: intent.order_id.clone(),
                    reason,
                });
            }
        }

        let result = self.router.place(intent).await;
        self.request_snapshot();
        Ok(SubmitOutcome::Placed(result?))
    }

    /// 체결을 조회하여 레지스트리, 포지션, 리스크 모니터에 반영합니다.
    ///
    /// 응답을 받지 못해 `Pending`으로 남은 주문은 먼저 거래소 조회로
    /// 해소합니다. 해소되지 않으면 에러를 반환하고 다음 호출에서 다시
    /// 시도합니다.
    pub async fn process_fills(&self, order_id: &str) -> Result<FillReport, EngineError> {
        if self.registry.state(order_id) == Some(OrderState::Pending) {
            let state = self.router.resolve_pending(order_id).await?;
            self.request_snapshot();
            if state.is_terminal() {
                let mut report = FillReport::empty(order_id);
                report.state = Some(state);
                return Ok(report);
            }
        }

        let fills = self.router.poll_fills(order_id).await?;
        let report = self.apply_fills(order_id, &fills)?;

        self.router.release_if_terminal(order_id);
        if report.applied > 0 {
            self.request_snapshot();
        }
        debug!(
            order_id,
            applied = report.applied,
            duplicates = report.duplicates,
            discarded = report.discarded,
            "체결 처리 완료"
        );
        Ok(report)
    }

    /// 체결을 레지스트리, 트래커, 리스크 모니터에 차례로 반영합니다.
    ///
    /// 스냅샷이 한 체결의 일부만 담지 않도록 게이트 읽기 잠금 아래서 실행합니다.
    fn apply_fills(&self, order_id: &str, fills: &[FillEvent]) -> Result<FillReport, EngineError> {
        let _gate = self.apply_gate.read();
        let mut report = FillReport::empty(order_id);

        for fill in fills {
            match self.registry.apply_fill(fill) {
                Ok(EventOutcome::DuplicateFill) => report.duplicates += 1,
                Ok(EventOutcome::Transitioned { to, .. }) => {
                    self.tracker
                        .on_fill(&fill.symbol, fill.side, fill.quantity, fill.price)?;
                    self.risk.on_fill(&fill.symbol, fill.side, fill.quantity);
                    report.applied += 1;

                    match to {
                        OrderState::Filled => {
                            metrics::record_order_filled(&fill.symbol, fill.side);
                            if let Some(record) = self.registry.get(order_id) {
                                let latency = (Utc::now() - record.created_at)
                                    .to_std()
                                    .unwrap_or(Duration::ZERO);
                                metrics::record_fill_latency(&fill.symbol, latency);
                            }
                        }
                        OrderState::PartiallyFilled => {
                            metrics::record_order_partially_filled(&fill.symbol, fill.side);
                        }
                        _ => {}
                    }
                }
                Err(_) => report.discarded += 1,
            }
        }

        report.state = self.registry.state(order_id);
        Ok(report)
    }

    /// 주문을 취소합니다.
    pub async fn cancel(&self, order_id: &str) -> Result<CancelResult, EngineError> {
        let result = self.router.cancel(order_id).await;
        self.request_snapshot();
        Ok(result?)
    }

    /// 최종 상태가 아닌 모든 주문을 동시에 취소합니다 (동결 후 킬 스위치).
    ///
    /// `Pending` 주문도 포함하며, 라우터가 거래소 조회로 먼저 해소합니다.
    pub async fn cancel_all_active(&self) -> Vec<(String, RouteResult<CancelResult>)> {
        let working: Vec<String> = self
            .registry
            .active()
            .into_iter()
            .map(|r| r.order_id)
            .collect();

        if working.is_empty() {
            return Vec::new();
        }
        warn!(orders = working.len(), "활성 주문 전체 취소");

        let results = join_all(working.iter().map(|id| self.router.cancel(id))).await;
        self.request_snapshot();
        working.into_iter().zip(results).collect()
    }

    // ==================== 시장 데이터 / 리스크 ====================

    /// 마크 가격을 갱신합니다.
    pub fn on_mark_price(&self, symbol: &str, price: Price) -> Result<(), EngineError> {
        self.tracker.update_mark_price(symbol, price)?;
        Ok(())
    }

    /// 순 엣지를 관찰합니다. 이번 호출로 동결되었으면 true.
    pub fn on_edge_update(&self, symbol: &str, net_bps: Bps) -> bool {
        self.risk.on_edge_update(symbol, net_bps)
    }

    /// 리스크 모니터의 포지션 스냅샷을 트래커 기준으로 다시 맞춥니다.
    ///
    /// 운영자 리셋이나 복구 후에 사용합니다.
    pub fn sync_risk_positions(&self) {
        for (symbol, qty) in self.tracker.signed_quantities() {
            self.risk.sync_position(&symbol, qty);
        }
    }

    /// 거래소 포지션과 대사합니다. 불일치는 보고만 합니다.
    pub async fn reconcile(&self, symbol: &str) -> Result<ReconciliationReport, EngineError> {
        let gateway: &dyn Gateway = self.gateway.as_ref();
        let outcome = with_retry(self.router.retry_config(), "get_position", |_| {
            gateway.get_position(symbol)
        })
        .await;
        let venue = outcome.result?;
        Ok(self
            .tracker
            .reconcile_position(symbol, venue.quantity, venue.avg_entry_price))
    }

    // ==================== 스냅샷 ====================

    /// 레지스트리와 포지션을 같은 시점에 담은 스냅샷.
    ///
    /// 진행 중인 체결 반영이 끝날 때까지 기다립니다.
    pub fn snapshot(&self) -> EngineSnapshot {
        let _gate = self.apply_gate.write();
        EngineSnapshot::new(self.registry.persist(), self.tracker.persist())
    }

    /// writer가 연결되어 있으면 스냅샷을 비동기로 요청합니다.
    fn request_snapshot(&self) {
        let writer = self.writer.lock();
        if let Some(writer) = writer.as_ref() {
            writer.submit(ENGINE_SNAPSHOT, &self.snapshot());
        }
    }

    /// 스냅샷을 즉시 동기적으로 저장합니다.
    pub fn persist_to(&self, store: &SnapshotStore) -> Result<(), EngineError> {
        store.save(ENGINE_SNAPSHOT, &self.snapshot())?;
        Ok(())
    }

    /// 저장된 스냅샷에서 상태를 복구합니다. 주문을 재제출하지 않습니다.
    ///
    /// 주문을 제출하기 전에 호출해야 합니다.
    pub fn recover(&self, store: &SnapshotStore) -> Result<RecoveryReport, EngineError> {
        let (orders, positions) = match store.load::<EngineSnapshot>(ENGINE_SNAPSHOT)? {
            Some(snapshot) => {
                snapshot.check_version()?;
                (
                    self.registry.restore(snapshot.registry)?,
                    self.tracker.restore(snapshot.positions)?,
                )
            }
            None => (0, 0),
        };
        self.sync_risk_positions();

        let report = RecoveryReport {
            orders,
            active_orders: self.registry.active().len(),
            positions,
        };
        info!(
            orders = report.orders,
            active_orders = report.active_orders,
            positions = report.positions,
            dir = %store.dir().display(),
            "실행 엔진 상태 복구"
        );
        Ok(report)
    }

    /// 주기적으로 스냅샷을 요청하는 태스크를 시작합니다.
    ///
    /// 엔진이 해제되면 태스크도 종료됩니다.
    pub fn spawn_periodic_snapshots(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.upgrade() {
                    Some(engine) => engine.request_snapshot(),
                    None => break,
                }
            }
        })
    }

    /// 마지막 스냅샷을 요청하고 writer가 모두 쓸 때까지 기다립니다.
    ///
    /// 이후 상태 변경은 더 이상 저장되지 않습니다.
    pub async fn shutdown(&self) -> Result<(), PersistenceError> {
        self.request_snapshot();
        let writer = self.writer.lock().take();
        match writer {
            Some(writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }
}
