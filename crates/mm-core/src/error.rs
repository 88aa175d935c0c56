//! 실행 코어의 공통 에러 타입.
//!
//! 개별 크레이트는 자신의 에러 enum을 정의하고, 여기서는 크레이트 경계를
//! 넘나드는 에러 분류와 주문 검증 에러만 정의합니다.

use crate::types::{Price, Quantity};
use thiserror::Error;

/// 에러 분류.
///
/// 라우터의 재시도 여부는 이 분류로만 결정됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// 잘못된 요청 (재시도하지 않음)
    Validation,
    /// 타임아웃/연결 실패 (정책 한도 내에서 재시도)
    Transient,
    /// 거래소 거부 (최종, 재시도하지 않음)
    Rejection,
}

impl ErrorClass {
    /// 재시도 대상인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Validation => write!(f, "validation"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Rejection => write!(f, "rejection"),
        }
    }
}

/// 주문 의도 검증 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 멱등성 키 누락
    #[error("주문 ID(멱등성 키)가 비어 있습니다")]
    EmptyOrderId,

    /// 심볼 누락
    #[error("심볼이 비어 있습니다")]
    EmptySymbol,

    /// 수량이 0 이하
    #[error("잘못된 수량: {0}")]
    NonPositiveQuantity(Quantity),

    /// 가격이 0 이하
    #[error("잘못된 가격: {0}")]
    NonPositivePrice(Price),
}

/// Decimal 연산 오버플로우. 계산 중이던 값의 이름을 담는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("decimal overflow while computing {0}")]
pub struct ArithmeticOverflow(pub &'static str);

impl ValidationError {
    /// 항상 `ErrorClass::Validation`.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(!ErrorClass::Rejection.is_retryable());
    }

    #[test]
    fn test_validation_error_class() {
        let err = ValidationError::EmptySymbol;
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(err.to_string().contains("심볼"));
    }
}
