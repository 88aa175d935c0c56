//! 체결 이벤트.

use crate::domain::Side;
use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 거래소가 보고한 단일 체결.
///
/// `fill_id`는 거래소가 부여하며 중복 적용 방지에 사용됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    /// 주문 멱등성 키
    pub order_id: String,
    /// 거래소 체결 ID
    pub fill_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 체결 수량
    pub quantity: Quantity,
    /// 체결 가격
    pub price: Price,
    /// 체결 시각
    pub timestamp: DateTime<Utc>,
}

impl FillEvent {
    /// 새 체결 이벤트를 생성합니다.
    pub fn new(
        order_id: impl Into<String>,
        fill_id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
        price: Price,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            fill_id: fill_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price,
            timestamp: Utc::now(),
        }
    }

    /// 체결 시각을 설정합니다.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 체결 명목 가치.
    pub fn notional(&self) -> rust_decimal::Decimal {
        self.quantity * self.price
    }
}
