//! 실행 코어 에러 타입.

use mm_core::{
    ArithmeticOverflow, EngineConfigError, LoggingError, OrderState, Quantity, ValidationError,
};
use mm_gateway::GatewayError;
use rust_decimal::Decimal;
use std::path::PathBuf;
use thiserror::Error;

/// 주문 상태 기계 에러.
///
/// 무결성 위반으로 취급되며, 해당 이벤트는 기록에 반영되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateTransitionError {
    #[error("Order not found: {0}")]
    UnknownOrder(String),

    #[error("Order already exists: {0}")]
    DuplicateOrder(String),

    #[error("Order {order_id} is in final state {state}, rejected event {event}")]
    Terminal {
        order_id: String,
        state: OrderState,
        event: &'static str,
    },

    #[error("Illegal transition for {order_id}: {from} --{event}-->")]
    Illegal {
        order_id: String,
        from: OrderState,
        event: &'static str,
    },

    #[error("Overfill on {order_id}: remaining {remaining}, fill {attempted}")]
    Overfill {
        order_id: String,
        remaining: Quantity,
        attempted: Quantity,
    },

    #[error("Fill quantity mismatch on {order_id}: {event} of {quantity} with remaining {remaining}")]
    QuantityMismatch {
        order_id: String,
        event: &'static str,
        quantity: Quantity,
        remaining: Quantity,
    },

    #[error("Fill for {order_id} has non-positive quantity or price")]
    InvalidFill { order_id: String },
}

/// 라우터 에러.
///
/// 라우터는 결과를 캐시하므로 복제 가능해야 합니다.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Order {order_id} rejected by venue: {reason}")]
    Rejected { order_id: String, reason: String },

    #[error("Order {order_id} timed out after {attempts} attempts: {message}")]
    Timeout {
        order_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Order {order_id} cannot be canceled in state {state}")]
    InvalidState { order_id: String, state: OrderState },

    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    #[error("State machine error: {0}")]
    Registry(#[from] StateTransitionError),
}

impl RouteError {
    /// 메트릭/로그용 짧은 이름.
    pub fn label(&self) -> &'static str {
        match self {
            RouteError::Validation(_) => "validation",
            RouteError::Rejected { .. } => "rejected",
            RouteError::Timeout { .. } => "timeout",
            RouteError::NotFound(_) => "not_found",
            RouteError::InvalidState { .. } => "invalid_state",
            RouteError::Gateway(e) => e.label(),
            RouteError::Registry(_) => "registry",
        }
    }
}

/// 포지션 트래커 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error(transparent)]
    Overflow(#[from] ArithmeticOverflow),
}

/// 스냅샷 저장/복구 에러.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Unsupported {kind} snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        kind: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("Snapshot writer closed")]
    WriterClosed,
}

/// 실행 엔진 에러.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] EngineConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}
