//! 게이트웨이 에러 타입.

use mm_core::ErrorClass;
use thiserror::Error;

/// 게이트웨이 관련 에러.
///
/// 라우터는 `class()`만 보고 재시도 여부를 결정합니다.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 연결 실패
    #[error("Connection error: {0}")]
    Connection(String),

    /// 거래소가 주문을 거부함
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// 잘못된 요청
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 같은 클라이언트 주문 ID가 이미 거래소에 있음
    #[error("Duplicate client order id: {0}")]
    DuplicateOrder(String),
}

impl GatewayError {
    /// 에러 분류.
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Timeout(_) | GatewayError::Connection(_) => ErrorClass::Transient,
            GatewayError::Rejected(_) => ErrorClass::Rejection,
            GatewayError::InvalidRequest(_)
            | GatewayError::OrderNotFound(_)
            | GatewayError::DuplicateOrder(_) => ErrorClass::Validation,
        }
    }

    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// 거래소 거부인지 확인.
    pub fn is_rejection(&self) -> bool {
        self.class() == ErrorClass::Rejection
    }

    /// 메트릭 레이블용 짧은 이름.
    pub fn label(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Connection(_) => "connection",
            GatewayError::Rejected(_) => "rejected",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::OrderNotFound(_) => "not_found",
            GatewayError::DuplicateOrder(_) => "duplicate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GatewayError::Timeout("t".into()).is_retryable());
        assert!(GatewayError::Connection("c".into()).is_retryable());

        let rejected = GatewayError::Rejected("InsufficientMargin".into());
        assert!(!rejected.is_retryable());
        assert!(rejected.is_rejection());
        assert_eq!(rejected.class(), ErrorClass::Rejection);

        let invalid = GatewayError::InvalidRequest("qty".into());
        assert_eq!(invalid.class(), ErrorClass::Validation);
        assert!(!invalid.is_rejection());

        let duplicate = GatewayError::DuplicateOrder("q-1".into());
        assert!(!duplicate.is_retryable());
        assert_eq!(duplicate.label(), "duplicate");
    }
}
