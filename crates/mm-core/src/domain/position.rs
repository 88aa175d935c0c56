//! 심볼별 부호 있는 포지션 회계.
//!
//! 이 모듈은 포지션 관련 타입을 정의합니다:
//! - `Position` - 심볼별 순포지션 (양수 = 롱, 음수 = 숏)
//! - `PositionChange` - 체결이 포지션에 준 변화 유형
//! - `FillImpact` - 체결 적용 결과

use crate::domain::Side;
use crate::error::ArithmeticOverflow;
use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 체결이 포지션에 준 변화 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionChange {
    /// 플랫에서 신규 진입
    Opened,
    /// 같은 방향으로 증가
    Increased,
    /// 반대 방향 체결로 일부 청산
    Reduced,
    /// 정확히 전량 청산
    Closed,
    /// 전량 청산 후 반대 방향으로 신규 진입
    Flipped,
}

/// 체결 적용 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillImpact {
    /// 변화 유형
    pub change: PositionChange,
    /// 이번 체결로 실현된 손익
    pub realized_pnl: Decimal,
    /// 청산된 수량
    pub closed_qty: Quantity,
}

/// 심볼의 순포지션.
///
/// `avg_entry_price`는 `quantity == 0`이면 항상 `None`입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 거래 심볼
    pub symbol: String,
    /// 부호 있는 수량 (양수 = 롱, 음수 = 숏)
    pub quantity: Quantity,
    /// 거래량 가중 평균 진입가
    pub avg_entry_price: Option<Price>,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 마지막 마크 가격
    pub last_mark_price: Option<Price>,
    /// 누적 매수 수량
    pub total_buy_qty: Quantity,
    /// 누적 매도 수량
    pub total_sell_qty: Quantity,
    /// 누적 매수 명목 금액
    pub total_buy_notional: Decimal,
    /// 누적 매도 명목 금액
    pub total_sell_notional: Decimal,
    /// 마지막 업데이트 타임스탬프
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// 플랫 포지션을 생성합니다.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_entry_price: None,
            realized_pnl: Decimal::ZERO,
            last_mark_price: None,
            total_buy_qty: Decimal::ZERO,
            total_sell_qty: Decimal::ZERO,
            total_buy_notional: Decimal::ZERO,
            total_sell_notional: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// 포지션 방향. 플랫이면 None.
    pub fn side(&self) -> Option<Side> {
        if self.is_long() {
            Some(Side::Buy)
        } else if self.is_short() {
            Some(Side::Sell)
        } else {
            None
        }
    }

    /// 미실현 손익.
    ///
    /// 롱은 `(mark - avg) * qty`, 숏은 부호가 반대입니다. 수량이 부호를
    /// 가지므로 두 경우 모두 같은 식으로 계산됩니다.
    pub fn unrealized_pnl(&self) -> Decimal {
        match (self.avg_entry_price, self.last_mark_price) {
            (Some(avg), Some(mark)) => (mark - avg) * self.quantity,
            _ => Decimal::ZERO,
        }
    }

    /// 실현 + 미실현 손익.
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl()
    }

    /// 주어진 가격 기준 절대 명목 가치.
    pub fn notional_at(&self, price: Price) -> Decimal {
        (self.quantity * price).abs()
    }

    /// 마크 가격을 갱신합니다.
    pub fn mark(&mut self, price: Price) {
        self.last_mark_price = Some(price);
        self.updated_at = Utc::now();
    }

    /// 체결을 적용합니다.
    ///
    /// 같은 방향이면 VWAP로 평균 진입가를 갱신하고, 반대 방향이면 먼저
    /// 청산하여 손익을 실현한 뒤 남은 수량으로 체결가에 반대 포지션을 엽니다.
    /// 계산이 넘치면 포지션은 변경되지 않습니다.
    pub fn apply_fill(
        &mut self,
        side: Side,
        qty: Quantity,
        price: Price,
    ) -> Result<FillImpact, ArithmeticOverflow> {
        let fill_notional = qty
            .checked_mul(price)
            .ok_or(ArithmeticOverflow("fill notional"))?;
        let (bought, bought_notional, sold, sold_notional) = match side {
            Side::Buy => (
                checked(self.total_buy_qty.checked_add(qty), "total buy quantity")?,
                checked(
                    self.total_buy_notional.checked_add(fill_notional),
                    "total buy notional",
                )?,
                self.total_sell_qty,
                self.total_sell_notional,
            ),
            Side::Sell => (
                self.total_buy_qty,
                self.total_buy_notional,
                checked(self.total_sell_qty.checked_add(qty), "total sell quantity")?,
                checked(
                    self.total_sell_notional.checked_add(fill_notional),
                    "total sell notional",
                )?,
            ),
        };
        let (quantity, avg_entry_price, impact) = self.project(side, qty, price)?;
        let realized_pnl = checked(
            self.realized_pnl.checked_add(impact.realized_pnl),
            "realized pnl",
        )?;

        self.total_buy_qty = bought;
        self.total_buy_notional = bought_notional;
        self.total_sell_qty = sold;
        self.total_sell_notional = sold_notional;
        self.quantity = quantity;
        self.avg_entry_price = avg_entry_price;
        self.realized_pnl = realized_pnl;
        self.updated_at = Utc::now();
        Ok(impact)
    }

    /// 체결 후 (수량, 평균 진입가, 영향)을 계산한다.
    fn project(
        &self,
        side: Side,
        qty: Quantity,
        price: Price,
    ) -> Result<(Quantity, Option<Price>, FillImpact), ArithmeticOverflow> {
        let signed = side.signed(qty);
        let avg = match self.avg_entry_price {
            Some(avg) if !self.is_flat() => avg,
            _ => {
                let impact = FillImpact {
                    change: PositionChange::Opened,
                    realized_pnl: Decimal::ZERO,
                    closed_qty: Decimal::ZERO,
                };
                return Ok((signed, Some(price), impact));
            }
        };

        let open_qty = self.quantity.abs();
        if self.quantity.is_sign_positive() == signed.is_sign_positive() {
            let new_qty = checked(open_qty.checked_add(qty), "position quantity")?;
            let new_avg = open_qty
                .checked_mul(avg)
                .zip(qty.checked_mul(price))
                .and_then(|(held, added)| held.checked_add(added))
                .and_then(|total| total.checked_div(new_qty));
            let impact = FillImpact {
                change: PositionChange::Increased,
                realized_pnl: Decimal::ZERO,
                closed_qty: Decimal::ZERO,
            };
            return Ok((
                side.signed(new_qty),
                Some(checked(new_avg, "average entry price")?),
                impact,
            ));
        }

        let closed_qty = qty.min(open_qty);
        let per_unit = checked(price.checked_sub(avg), "realized pnl")?;
        let mut realized = checked(closed_qty.checked_mul(per_unit), "realized pnl")?;
        if self.is_short() {
            realized = -realized;
        }

        let (quantity, avg_entry_price, change) = if qty < open_qty {
            (self.quantity + signed, Some(avg), PositionChange::Reduced)
        } else if qty == open_qty {
            (Decimal::ZERO, None, PositionChange::Closed)
        } else {
            (side.signed(qty - open_qty), Some(price), PositionChange::Flipped)
        };

        Ok((
            quantity,
            avg_entry_price,
            FillImpact {
                change,
                realized_pnl: realized,
                closed_qty,
            },
        ))
    }
}

fn checked(value: Option<Decimal>, what: &'static str) -> Result<Decimal, ArithmeticOverflow> {
    value.ok_or(ArithmeticOverflow(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_vwap_on_same_direction() {
        let mut pos = Position::flat("BTCUSDT");
        let first = pos.apply_fill(Side::Buy, dec!(0.01), dec!(50000)).unwrap();
        let second = pos.apply_fill(Side::Buy, dec!(0.01), dec!(50100)).unwrap();

        assert_eq!(first.change, PositionChange::Opened);
        assert_eq!(second.change, PositionChange::Increased);
        assert_eq!(pos.quantity, dec!(0.02));
        assert_eq!(pos.avg_entry_price, Some(dec!(50050)));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_flip_long_to_short() {
        let mut pos = Position::flat("BTCUSDT");
        pos.apply_fill(Side::Buy, dec!(0.01), dec!(50000)).unwrap();
        let impact = pos.apply_fill(Side::Sell, dec!(0.02), dec!(50100)).unwrap();

        assert_eq!(impact.change, PositionChange::Flipped);
        assert_eq!(impact.realized_pnl, dec!(1.0));
        assert_eq!(impact.closed_qty, dec!(0.01));
        assert_eq!(pos.realized_pnl, dec!(1.0));
        assert_eq!(pos.quantity, dec!(-0.01));
        assert_eq!(pos.avg_entry_price, Some(dec!(50100)));
        assert_eq!(pos.side(), Some(Side::Sell));
    }

    #[test]
    fn test_short_reduce_and_close() {
        let mut pos = Position::flat("ETHUSDT");
        pos.apply_fill(Side::Sell, dec!(2), dec!(3000)).unwrap();

        let reduce = pos.apply_fill(Side::Buy, dec!(0.5), dec!(2900)).unwrap();
        assert_eq!(reduce.change, PositionChange::Reduced);
        assert_eq!(reduce.realized_pnl, dec!(50));
        assert_eq!(pos.quantity, dec!(-1.5));
        assert_eq!(pos.avg_entry_price, Some(dec!(3000)));

        let close = pos.apply_fill(Side::Buy, dec!(1.5), dec!(3100)).unwrap();
        assert_eq!(close.change, PositionChange::Closed);
        assert_eq!(close.realized_pnl, dec!(-150));
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, None);
        assert_eq!(pos.realized_pnl, dec!(-100));
    }

    #[test]
    fn test_unrealized_pnl_sign() {
        let mut long = Position::flat("BTCUSDT");
        long.apply_fill(Side::Buy, dec!(0.1), dec!(50000)).unwrap();
        long.mark(dec!(51000));
        assert_eq!(long.unrealized_pnl(), dec!(100));

        let mut short = Position::flat("BTCUSDT");
        short.apply_fill(Side::Sell, dec!(0.1), dec!(50000)).unwrap();
        short.mark(dec!(51000));
        assert_eq!(short.unrealized_pnl(), dec!(-100));
        assert_eq!(short.notional_at(dec!(51000)), dec!(5100));
    }

    #[test]
    fn test_overflow_leaves_position_untouched() {
        let mut pos = Position::flat("BTCUSDT");
        pos.apply_fill(Side::Buy, dec!(1), dec!(50000)).unwrap();
        let before = pos.clone();

        let err = pos.apply_fill(Side::Buy, Decimal::MAX, dec!(2)).unwrap_err();
        assert_eq!(err, ArithmeticOverflow("fill notional"));
        assert_eq!(pos, before);
    }

    #[test]
    fn test_flat_has_no_unrealized() {
        let mut pos = Position::flat("BTCUSDT");
        pos.mark(dec!(50000));
        assert_eq!(pos.unrealized_pnl(), Decimal::ZERO);
        assert_eq!(pos.side(), None);
    }

    proptest! {
        #[test]
        fn prop_fill_accounting_is_conserved(
            fills in prop::collection::vec((any::<bool>(), 1i64..2_000, 10_000i64..1_000_000), 1..40),
            mark in 10_000i64..1_000_000,
        ) {
            let mut pos = Position::flat("BTCUSDT");
            let mut net_cash = Decimal::ZERO;
            let mut net_qty = Decimal::ZERO;

            for (is_buy, q, p) in fills {
                let side = if is_buy { Side::Buy } else { Side::Sell };
                let qty = Decimal::new(q, 3);
                let price = Decimal::new(p, 1);
                pos.apply_fill(side, qty, price).unwrap();
                net_qty += side.signed(qty);
                net_cash -= side.signed(qty) * price;

                prop_assert_eq!(pos.quantity, net_qty);
                prop_assert_eq!(pos.avg_entry_price.is_none(), pos.quantity.is_zero());
            }

            prop_assert_eq!(pos.total_buy_qty - pos.total_sell_qty, pos.quantity);

            let mark = Decimal::new(mark, 1);
            pos.mark(mark);
            let cash_pnl = net_cash + net_qty * mark;
            prop_assert!((pos.total_pnl() - cash_pnl).abs() < dec!(0.00000001));
        }
    }
}
