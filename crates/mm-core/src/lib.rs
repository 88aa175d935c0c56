//! # MM Core
//!
//! 마켓메이킹 실행 코어의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 실행 코어 전반에서 사용되는 기본 타입을 제공합니다:
//! - 주문 의도, 취소 요청, 체결 이벤트
//! - 주문 상태 및 상태 전이 이벤트
//! - 부호 있는 포지션 회계
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
