//! 주문 실행 및 포지션 관리.
//!
//! 이 crate는 다음을 제공합니다:
//! - 멱등 주문 라우터 (재시도, 시도당 타임아웃, 주문별 마감 시간)
//! - 주문 상태 기계 레지스트리와 이벤트 이력
//! - 체결 기반 포지션 추적, 손익 계산, 거래소 대사
//! - 원자적 스냅샷 저장과 크래시 복구
//! - 리스크 검사부터 체결 반영까지 묶는 실행 엔진
//!
//! # 예제
//!
//! ```rust,ignore
//! use mm_execution::{ExecutionEngine, SubmitOutcome};
//!
//! let (engine, _recovered) = ExecutionEngine::bootstrap(Arc::new(gateway), &config).await?;
//! engine.on_mark_price("BTCUSDT", dec!(50000))?;
//!
//! let intent = OrderIntent::limit_buy("q-1", "BTCUSDT", dec!(0.01), dec!(49990));
//! if let SubmitOutcome::Placed(result) = engine.submit(&intent).await? {
//!     engine.process_fills(&result.order_id).await?;
//! }
//! ```

pub mod engine;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod position;
pub mod registry;
pub mod router;

// 주요 타입 재내보내기
pub use engine::{ExecutionEngine, FillReport, RecoveryReport, SubmitOutcome};
pub use error::{EngineError, PersistenceError, PositionError, RouteError, StateTransitionError};
pub use self::metrics::{build_prometheus_recorder, install_prometheus_recorder};
pub use persistence::{
    EngineSnapshot, SnapshotStore, SnapshotWriter, ENGINE_SNAPSHOT, ENGINE_SNAPSHOT_VERSION,
};
pub use position::{PositionSnapshot, PositionTracker, ReconciliationReport};
pub use registry::{
    EventOutcome, HistoryEntry, OrderRegistry, OrderStateRecord, RegistrySnapshot,
    REGISTRY_SNAPSHOT_VERSION,
};
pub use router::{
    CancelResult, OrderResult, OrderRouter, RouteResult, RouteStats, UNKNOWN_AT_VENUE,
};
