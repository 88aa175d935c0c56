//! 주문 타입.
//!
//! 이 모듈은 실행 코어의 주문 관련 타입을 정의합니다:
//! - `Side` - 주문 방향 (매수/매도)
//! - `OrderIntent` - 전략이 제출하는 불변 주문 의도
//! - `CancelRequest` - 취소 요청
//! - `OrderState` - 주문 생명주기 상태
//! - `OrderEvent` - 상태 전이를 일으키는 이벤트

use crate::error::ValidationError;
use crate::types::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// 포지션 수량 부호 (매수 +1, 매도 -1).
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// 수량에 방향 부호를 적용합니다.
    pub fn signed(&self, qty: Quantity) -> Quantity {
        qty * self.sign()
    }

    /// 메트릭 레이블용 소문자 이름.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 의도.
///
/// 호출자가 부여한 `order_id`가 멱등성 키이며, 제출 후에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// 멱등성 키
    pub order_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 수량
    pub quantity: Quantity,
    /// 지정가 (시장가 주문이면 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

impl OrderIntent {
    /// 새 주문 의도를 생성합니다.
    pub fn new(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
        }
    }

    /// 지정가 매수 의도를 생성합니다.
    pub fn limit_buy(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        Self::new(order_id, symbol, Side::Buy, quantity).with_price(price)
    }

    /// 지정가 매도 의도를 생성합니다.
    pub fn limit_sell(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        Self::new(order_id, symbol, Side::Sell, quantity).with_price(price)
    }

    /// 지정가를 설정합니다.
    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    /// 부호가 적용된 수량.
    pub fn signed_quantity(&self) -> Quantity {
        self.side.signed(self.quantity)
    }

    /// 주문 의도가 올바른 형식인지 검증합니다.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.trim().is_empty() {
            return Err(ValidationError::EmptyOrderId);
        }
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(self.quantity));
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice(price));
            }
        }
        Ok(())
    }
}

/// 주문 취소 요청.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// 취소할 주문의 멱등성 키
    pub order_id: String,
    /// 취소 사유
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelRequest {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 주문 생명주기 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// 생성됨, 거래소 확인 대기
    Pending,
    /// 거래소 확인됨
    New,
    /// 부분 체결됨
    PartiallyFilled,
    /// 완전 체결됨
    Filled,
    /// 취소됨
    Canceled,
    /// 거부됨
    Rejected,
}

impl OrderState {
    /// 최종 상태인지 확인합니다. 최종 상태에서는 어떤 전이도 허용되지 않습니다.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected
        )
    }

    /// 활성 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// 체결 또는 취소 이벤트를 받을 수 있는 상태인지 확인합니다.
    pub fn is_working(&self) -> bool {
        matches!(self, OrderState::New | OrderState::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderState::Pending => write!(f, "PENDING"),
            OrderState::New => write!(f, "NEW"),
            OrderState::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderState::Filled => write!(f, "FILLED"),
            OrderState::Canceled => write!(f, "CANCELED"),
            OrderState::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// 주문 상태 전이 이벤트.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// 거래소 접수 확인
    Ack { exchange_order_id: String },
    /// 거래소 거부
    Reject { reason: String },
    /// 부분 체결
    PartialFill {
        quantity: Quantity,
        price: Price,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill_id: Option<String>,
    },
    /// 잔량 전부 체결
    FullFill {
        quantity: Quantity,
        price: Price,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill_id: Option<String>,
    },
    /// 취소 확인
    CancelAck,
}

impl OrderEvent {
    /// 로그/에러 메시지용 이벤트 이름.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderEvent::Ack { .. } => "ack",
            OrderEvent::Reject { .. } => "reject",
            OrderEvent::PartialFill { .. } => "partial_fill",
            OrderEvent::FullFill { .. } => "full_fill",
            OrderEvent::CancelAck => "cancel_ack",
        }
    }

    /// 이벤트가 유도하는 목표 상태.
    pub fn target_state(&self) -> OrderState {
        match self {
            OrderEvent::Ack { .. } => OrderState::New,
            OrderEvent::Reject { .. } => OrderState::Rejected,
            OrderEvent::PartialFill { .. } => OrderState::PartiallyFilled,
            OrderEvent::FullFill { .. } => OrderState::Filled,
            OrderEvent::CancelAck => OrderState::Canceled,
        }
    }

    /// 체결 이벤트의 (수량, 가격, 체결 ID).
    pub fn fill_parts(&self) -> Option<(Quantity, Price, Option<&str>)> {
        match self {
            OrderEvent::PartialFill {
                quantity,
                price,
                fill_id,
            }
            | OrderEvent::FullFill {
                quantity,
                price,
                fill_id,
            } => Some((*quantity, *price, fill_id.as_deref())),
            _ => None,
        }
    }
}

/// `from` 상태에서 `event`가 허용되는지 확인합니다.
///
/// Pending → New | Rejected,
/// New → PartiallyFilled | Filled | Canceled,
/// PartiallyFilled → PartiallyFilled | Filled | Canceled.
pub fn is_legal_transition(from: OrderState, event: &OrderEvent) -> bool {
    match (from, event) {
        (OrderState::Pending, OrderEvent::Ack { .. }) => true,
        (OrderState::Pending, OrderEvent::Reject { .. }) => true,
        (OrderState::New | OrderState::PartiallyFilled, OrderEvent::PartialFill { .. }) => true,
        (OrderState::New | OrderState::PartiallyFilled, OrderEvent::FullFill { .. }) => true,
        (OrderState::New | OrderState::PartiallyFilled, OrderEvent::CancelAck) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.signed(dec!(0.5)), dec!(0.5));
        assert_eq!(Side::Sell.signed(dec!(0.5)), dec!(-0.5));
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_intent_validation() {
        let ok = OrderIntent::limit_buy("o-1", "BTCUSDT", dec!(0.01), dec!(50000));
        assert!(ok.validate().is_ok());

        let no_id = OrderIntent::new(" ", "BTCUSDT", Side::Buy, dec!(1));
        assert_eq!(no_id.validate(), Err(ValidationError::EmptyOrderId));

        let no_symbol = OrderIntent::new("o-2", "", Side::Buy, dec!(1));
        assert_eq!(no_symbol.validate(), Err(ValidationError::EmptySymbol));

        let zero_qty = OrderIntent::new("o-3", "BTCUSDT", Side::Sell, dec!(0));
        assert_eq!(
            zero_qty.validate(),
            Err(ValidationError::NonPositiveQuantity(dec!(0)))
        );

        let bad_price = OrderIntent::limit_sell("o-4", "BTCUSDT", dec!(1), dec!(-1));
        assert_eq!(
            bad_price.validate(),
            Err(ValidationError::NonPositivePrice(dec!(-1)))
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Canceled.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
        assert!(OrderState::Pending.is_active());
        assert!(OrderState::PartiallyFilled.is_working());
        assert!(!OrderState::Pending.is_working());
    }

    #[test]
    fn test_transition_table() {
        let ack = OrderEvent::Ack {
            exchange_order_id: "X-1".to_string(),
        };
        let fill = OrderEvent::PartialFill {
            quantity: dec!(1),
            price: dec!(100),
            fill_id: None,
        };

        assert!(is_legal_transition(OrderState::Pending, &ack));
        assert!(!is_legal_transition(OrderState::Pending, &fill));
        assert!(!is_legal_transition(OrderState::Pending, &OrderEvent::CancelAck));
        assert!(is_legal_transition(OrderState::New, &fill));
        assert!(is_legal_transition(OrderState::PartiallyFilled, &fill));
        assert!(!is_legal_transition(OrderState::New, &ack));

        for terminal in [OrderState::Filled, OrderState::Canceled, OrderState::Rejected] {
            assert!(!is_legal_transition(terminal, &ack));
            assert!(!is_legal_transition(terminal, &fill));
            assert!(!is_legal_transition(terminal, &OrderEvent::CancelAck));
        }
    }

    #[test]
    fn test_event_serde_tagged() {
        let event = OrderEvent::Reject {
            reason: "InsufficientMargin".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"reject\""));
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
