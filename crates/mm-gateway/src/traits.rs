//! 게이트웨이 trait 정의.

use async_trait::async_trait;
use mm_core::{FillEvent, OrderIntent, Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::GatewayError;

/// 게이트웨이 작업을 위한 Result 타입.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// 거래소가 보고하는 주문 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// 주문 제출 응답.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    /// 거래소 주문 ID
    pub exchange_order_id: String,
    /// 주문 상태
    pub status: VenueOrderStatus,
    /// 응답 시점 체결 수량
    pub filled_qty: Quantity,
    /// 거부 사유 (`status == Rejected`일 때)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}

impl PlaceOrderResponse {
    /// 접수된 주문 응답.
    pub fn accepted(exchange_order_id: impl Into<String>) -> Self {
        Self {
            exchange_order_id: exchange_order_id.into(),
            status: VenueOrderStatus::New,
            filled_qty: Decimal::ZERO,
            reject_reason: None,
        }
    }

    /// 거부된 주문 응답.
    pub fn rejected(exchange_order_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            exchange_order_id: exchange_order_id.into(),
            status: VenueOrderStatus::Rejected,
            filled_qty: Decimal::ZERO,
            reject_reason: Some(reason.into()),
        }
    }
}

/// 거래소 측 주문 상태 조회 결과.
///
/// 제출 응답이 유실된 주문을 해소할 때 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueOrderReport {
    pub exchange_order_id: String,
    pub status: VenueOrderStatus,
    /// 누적 체결 수량
    pub filled_qty: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}

impl From<VenueOrderReport> for PlaceOrderResponse {
    fn from(report: VenueOrderReport) -> Self {
        Self {
            exchange_order_id: report.exchange_order_id,
            status: report.status,
            filled_qty: report.filled_qty,
            reject_reason: report.reject_reason,
        }
    }
}

/// 주문 취소 응답.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub status: VenueOrderStatus,
}

/// 거래소가 보고하는 포지션 (대사용).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub symbol: String,
    /// 부호 있는 수량
    pub quantity: Quantity,
    /// 평균 진입가 (플랫이면 None)
    pub avg_entry_price: Option<Price>,
}

/// 거래소 게이트웨이 인터페이스.
///
/// 연결, 인증, 시세 수신은 구현체의 책임입니다. 에러는 반드시
/// 일시적 네트워크 오류와 최종 거부로 분류되어야 합니다.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// 게이트웨이 이름 반환.
    fn name(&self) -> &str;

    /// 주문 제출. `intent.order_id`는 클라이언트 주문 ID로 전달됩니다.
    async fn place_order(&self, intent: &OrderIntent) -> GatewayResult<PlaceOrderResponse>;

    /// 주문 취소.
    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelOrderResponse>;

    /// 클라이언트 주문 ID로 거래소 측 주문 상태 조회.
    ///
    /// 거래소가 주문을 받은 적이 없으면 `OrderNotFound`.
    async fn query_order(&self, order_id: &str) -> GatewayResult<VenueOrderReport>;

    /// 주문의 체결 목록 조회. 이미 보고된 체결이 다시 포함될 수 있습니다.
    async fn poll_fills(&self, order_id: &str) -> GatewayResult<Vec<FillEvent>>;

    /// 심볼의 거래소 측 포지션 조회.
    async fn get_position(&self, symbol: &str) -> GatewayResult<VenuePosition>;
}
