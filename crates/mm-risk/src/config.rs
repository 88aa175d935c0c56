//! 리스크 한도 설정.
//!
//! 한도는 모니터 생성 시 주입되며 인스턴스 수명 동안 변경되지 않습니다.
//! 한도를 바꾸려면 새 모니터를 생성해야 합니다.

use mm_core::{Bps, RiskLimitsConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 사전 리스크 한도 (통화 단위).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// 심볼별 최대 재고 명목 금액 (기본값: 10,000)
    #[serde(default = "default_max_inventory_per_symbol")]
    pub max_inventory_per_symbol: Decimal,

    /// 모든 심볼의 절대 명목 금액 합계 상한 (기본값: 50,000)
    #[serde(default = "default_max_total_notional")]
    pub max_total_notional: Decimal,

    /// 순 엣지 하한 (bp, 기본값: 1.5)
    /// 이 값보다 엄격히 낮으면 거래가 동결됩니다
    #[serde(default = "default_edge_freeze_floor_bps")]
    pub edge_freeze_floor_bps: Bps,
}

// 기본값 함수들
fn default_max_inventory_per_symbol() -> Decimal {
    Decimal::from(10_000)
}

fn default_max_total_notional() -> Decimal {
    Decimal::from(50_000)
}

fn default_edge_freeze_floor_bps() -> Bps {
    Decimal::new(15, 1)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_inventory_per_symbol: default_max_inventory_per_symbol(),
            max_total_notional: default_max_total_notional(),
            edge_freeze_floor_bps: default_edge_freeze_floor_bps(),
        }
    }
}

impl From<&RiskLimitsConfig> for RiskLimits {
    fn from(config: &RiskLimitsConfig) -> Self {
        Self {
            max_inventory_per_symbol: config.max_inventory_per_symbol,
            max_total_notional: config.max_total_notional,
            edge_freeze_floor_bps: config.edge_freeze_floor_bps,
        }
    }
}

impl RiskLimits {
    /// 명시적 한도로 생성합니다.
    pub fn new(
        max_inventory_per_symbol: Decimal,
        max_total_notional: Decimal,
        edge_freeze_floor_bps: Bps,
    ) -> Self {
        Self {
            max_inventory_per_symbol,
            max_total_notional,
            edge_freeze_floor_bps,
        }
    }

    /// 보수적인 한도를 생성합니다 (낮은 한도, 높은 엣지 하한).
    pub fn conservative() -> Self {
        Self {
            max_inventory_per_symbol: Decimal::from(2_000),
            max_total_notional: Decimal::from(10_000),
            edge_freeze_floor_bps: Decimal::from(3),
        }
    }

    /// 공격적인 한도를 생성합니다 (높은 한도, 낮은 엣지 하한).
    pub fn aggressive() -> Self {
        Self {
            max_inventory_per_symbol: Decimal::from(50_000),
            max_total_notional: Decimal::from(200_000),
            edge_freeze_floor_bps: Decimal::new(5, 1),
        }
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_inventory_per_symbol <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_inventory_per_symbol must be greater than 0".into(),
            ));
        }

        if self.max_total_notional <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_total_notional must be greater than 0".into(),
            ));
        }

        if self.max_total_notional < self.max_inventory_per_symbol {
            return Err(ConfigValidationError::InvalidValue(
                "max_total_notional must not be below max_inventory_per_symbol".into(),
            ));
        }

        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_limits() {
        let limits = RiskLimits::default();

        assert_eq!(limits.max_inventory_per_symbol, dec!(10000));
        assert_eq!(limits.max_total_notional, dec!(50000));
        assert_eq!(limits.edge_freeze_floor_bps, dec!(1.5));
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RiskLimits::conservative().validate().is_ok());
        assert!(RiskLimits::aggressive().validate().is_ok());
        assert!(
            RiskLimits::conservative().max_inventory_per_symbol
                < RiskLimits::aggressive().max_inventory_per_symbol
        );
    }

    #[test]
    fn test_validation_failures() {
        let zero = RiskLimits::new(dec!(0), dec!(100), dec!(1));
        assert!(zero.validate().is_err());

        let inverted = RiskLimits::new(dec!(1000), dec!(500), dec!(1));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_from_engine_config() {
        let section = RiskLimitsConfig {
            max_inventory_per_symbol: dec!(20000),
            ..RiskLimitsConfig::default()
        };
        let limits = RiskLimits::from(&section);
        assert_eq!(limits.max_inventory_per_symbol, dec!(20000));
        assert_eq!(limits.edge_freeze_floor_bps, dec!(1.5));
    }
}
