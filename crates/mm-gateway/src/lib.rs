//! 거래소 게이트웨이 인터페이스.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - Gateway trait: 주문/취소/체결 조회 기본 연산
//! - GatewayError: 일시적 네트워크 오류와 최종 거부의 명시적 분류
//! - 재시도 정책: 지수 백오프, 시도당 타임아웃, 전체 마감 시간
//! - 시뮬레이션 게이트웨이 (테스트 및 모의투자용)

pub mod error;
pub mod retry;
pub mod simulated;
pub mod traits;

pub use error::*;
pub use retry::{with_retry, Backoff, RetryConfig, RetryOutcome, RetryStats};
pub use simulated::{SimulatedConfig, SimulatedGateway};
pub use traits::*;
