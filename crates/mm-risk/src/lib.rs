//! 사전 리스크 관리.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 심볼별 재고 명목 한도와 전체 명목 한도에 대한 주문 사전 검증
//! - 엣지(bp) 저하 시 자동 거래 동결 (fail-closed)
//! - 운영자 리셋과 누적 감사 카운터
//!
//! # 예제
//!
//! ```rust,ignore
//! use mm_risk::{RiskLimits, RiskMonitor};
//!
//! let monitor = RiskMonitor::new(RiskLimits::default(), tracker.clone());
//!
//! if monitor.check_before_order("BTCUSDT", Side::Buy, dec!(0.1), Some(dec!(50000))) {
//!     // 주문 진행
//! }
//! monitor.on_edge_update("BTCUSDT", dec!(1.2));
//! ```

pub mod config;
pub mod monitor;

// 주요 타입 재내보내기
pub use config::{ConfigValidationError, RiskLimits};
pub use monitor::{
    BlockReason, FreezeRecord, MarkPriceSource, RiskCounters, RiskDecision, RiskMonitor,
};
