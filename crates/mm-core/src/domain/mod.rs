//! 주문 실행 및 포지션 회계를 위한 도메인 모델.

mod fill;
mod order;
mod position;

pub use fill::*;
pub use order::*;
pub use position::*;
