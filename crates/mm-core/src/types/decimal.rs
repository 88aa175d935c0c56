//! 정밀한 금융 계산을 위한 Decimal 유틸리티.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 주문 수량을 위한 타입.
pub type Quantity = Decimal;

/// 베이시스 포인트 (1bp = 0.01%).
pub type Bps = Decimal;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 메트릭 노출용 f64로 변환합니다. 표현할 수 없으면 0.0.
    fn as_f64(&self) -> f64;

    /// 허용 오차 이내로 다른 값과 같은지 확인합니다.
    fn approx_eq(&self, other: Decimal, tolerance: Decimal) -> bool;
}

impl DecimalExt for Decimal {
    fn as_f64(&self) -> f64 {
        self.to_f64().unwrap_or(0.0)
    }

    fn approx_eq(&self, other: Decimal, tolerance: Decimal) -> bool {
        (*self - other).abs() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_approx_eq() {
        assert!(dec!(1.0000005).approx_eq(dec!(1.0), dec!(0.000001)));
        assert!(!dec!(1.00001).approx_eq(dec!(1.0), dec!(0.000001)));
        assert!(dec!(-0.5).approx_eq(dec!(-0.5), Decimal::ZERO));
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(dec!(50050).as_f64(), 50050.0);
        assert_eq!(dec!(-0.25).as_f64(), -0.25);
    }
}
