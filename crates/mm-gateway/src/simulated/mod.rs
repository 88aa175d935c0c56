//! 테스트 및 모의투자를 위한 시뮬레이션 게이트웨이.
//!
//! 이 모듈은 실제 거래소 대신 주입할 수 있는 게이트웨이입니다:
//! - 설정된 확률로 주문 거부 (`InsufficientMargin`)
//! - 무작위 부분 체결 후 잔량 체결
//! - 시드 고정 시 결정적 동작
//! - 테스트용 스크립트 장애 주입
//!
//! # 예제
//!
//! ```ignore
//! use mm_gateway::simulated::{SimulatedConfig, SimulatedGateway};
//!
//! let config = SimulatedConfig::default()
//!     .with_rejection_rate(0.0)
//!     .with_seed(42);
//! let gateway = SimulatedGateway::new(config);
//!
//! gateway.push_place_fault(GatewayError::Timeout("injected".into())).await;
//! ```

mod gateway;

pub use gateway::{SimulatedConfig, SimulatedGateway};
