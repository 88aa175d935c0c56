//! 설정 관리.
//!
//! 실행 코어 설정을 TOML 파일과 `MM__` 접두사 환경 변수에서 로드합니다.
//! 예: `MM__ROUTER__MAX_ATTEMPTS=5`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::logging::LogFormat;

/// 설정 로드/검증 에러.
#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl EngineConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// 실행 코어 전체 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 주문 라우터 재시도/타임아웃 설정
    #[serde(default)]
    pub router: RouterConfig,
    /// 사전 리스크 한도
    #[serde(default)]
    pub risk: RiskLimitsConfig,
    /// 포지션 대사 허용 오차
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// 스냅샷 저장 설정
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// 시뮬레이션 게이트웨이 설정
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    #[serde(default)]
    pub format: LogFormat,
    /// span 진입/종료 이벤트 기록 여부
    #[serde(default)]
    pub span_events: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            span_events: false,
        }
    }
}

/// 주문 라우터 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouterConfig {
    /// 최대 시도 횟수 (첫 시도 포함)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 첫 재시도 대기 시간 (밀리초)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 지수 백오프 배수
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// 단일 대기 시간 상한 (밀리초)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 누적 대기 시간 상한 (밀리초)
    #[serde(default = "default_max_total_delay_ms")]
    pub max_total_delay_ms: u64,
    /// 시도당 하드 타임아웃 (밀리초)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// 주문당 전체 마감 시간 (밀리초)
    #[serde(default = "default_order_deadline_ms")]
    pub order_deadline_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_max_total_delay_ms() -> u64 {
    5_000
}
fn default_attempt_timeout_ms() -> u64 {
    5_000
}
fn default_order_deadline_ms() -> u64 {
    15_000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_total_delay_ms: default_max_total_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            order_deadline_ms: default_order_deadline_ms(),
        }
    }
}

/// 사전 리스크 한도 설정 (통화 단위).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RiskLimitsConfig {
    /// 심볼별 최대 재고 명목 금액
    #[serde(default = "default_max_inventory_per_symbol")]
    pub max_inventory_per_symbol: Decimal,
    /// 전체 명목 금액 상한
    #[serde(default = "default_max_total_notional")]
    pub max_total_notional: Decimal,
    /// 이 값 미만의 순 엣지(bp)에서 거래 동결
    #[serde(default = "default_edge_freeze_floor_bps")]
    pub edge_freeze_floor_bps: Decimal,
}

fn default_max_inventory_per_symbol() -> Decimal {
    Decimal::from(10_000)
}
fn default_max_total_notional() -> Decimal {
    Decimal::from(50_000)
}
fn default_edge_freeze_floor_bps() -> Decimal {
    Decimal::new(15, 1)
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_inventory_per_symbol: default_max_inventory_per_symbol(),
            max_total_notional: default_max_total_notional(),
            edge_freeze_floor_bps: default_edge_freeze_floor_bps(),
        }
    }
}

/// 포지션 대사 허용 오차.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_qty_tolerance")]
    pub qty_tolerance: Decimal,
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
}

fn default_qty_tolerance() -> Decimal {
    Decimal::new(1, 6)
}
fn default_price_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            qty_tolerance: default_qty_tolerance(),
            price_tolerance: default_price_tolerance(),
        }
    }
}

/// 스냅샷 저장 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// 스냅샷 디렉토리
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// 주기적 스냅샷 간격 (밀리초, 0이면 비활성)
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./state")
}
fn default_snapshot_interval_ms() -> u64 {
    1_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
        }
    }
}

/// 시뮬레이션 게이트웨이 설정.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// 주문 거부 확률 (0.0 ~ 1.0)
    #[serde(default = "default_rejection_rate")]
    pub rejection_rate: f64,
    /// 부분 체결 확률 (0.0 ~ 1.0)
    #[serde(default = "default_partial_fill_probability")]
    pub partial_fill_probability: f64,
    /// 응답 지연 (밀리초)
    #[serde(default)]
    pub latency_ms: u64,
    /// 난수 시드 (없으면 엔트로피 사용)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_rejection_rate() -> f64 {
    0.05
}
fn default_partial_fill_probability() -> f64 {
    0.5
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rejection_rate: default_rejection_rate(),
            partial_fill_probability: default_partial_fill_probability(),
            latency_ms: 0,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드하고 검증합니다.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("MM")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, EngineConfigError> {
        Self::load(Some(Path::new("config/engine.toml")))
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        let router = &self.router;
        if router.max_attempts == 0 {
            return Err(EngineConfigError::invalid("router.max_attempts", "must be >= 1"));
        }
        if router.multiplier < 1.0 {
            return Err(EngineConfigError::invalid(
                "router.multiplier",
                format!("must be >= 1.0, got {}", router.multiplier),
            ));
        }
        if router.base_delay_ms > router.max_delay_ms {
            return Err(EngineConfigError::invalid(
                "router.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }
        if router.attempt_timeout_ms == 0 || router.order_deadline_ms == 0 {
            return Err(EngineConfigError::invalid(
                "router.attempt_timeout_ms",
                "timeouts must be positive",
            ));
        }

        let risk = &self.risk;
        if risk.max_inventory_per_symbol <= Decimal::ZERO {
            return Err(EngineConfigError::invalid(
                "risk.max_inventory_per_symbol",
                "must be positive",
            ));
        }
        if risk.max_total_notional <= Decimal::ZERO {
            return Err(EngineConfigError::invalid(
                "risk.max_total_notional",
                "must be positive",
            ));
        }

        let recon = &self.reconciliation;
        if recon.qty_tolerance < Decimal::ZERO || recon.price_tolerance < Decimal::ZERO {
            return Err(EngineConfigError::invalid(
                "reconciliation",
                "tolerances must not be negative",
            ));
        }

        let sim = &self.simulation;
        for (field, value) in [
            ("simulation.rejection_rate", sim.rejection_rate),
            ("simulation.partial_fill_probability", sim.partial_fill_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineConfigError::invalid(
                    field,
                    format!("must be within [0, 1], got {}", value),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.max_attempts, 3);
        assert_eq!(config.risk.edge_freeze_floor_bps, dec!(1.5));
        assert_eq!(config.reconciliation.qty_tolerance, dec!(0.000001));
    }

    #[test]
    fn test_load_from_toml_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[router]
max_attempts = 5
base_delay_ms = 50

[risk]
max_inventory_per_symbol = "20000"
edge_freeze_floor_bps = "2.5"

[simulation]
rejection_rate = 0.0
seed = 7
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.router.max_attempts, 5);
        assert_eq!(config.router.base_delay_ms, 50);
        assert_eq!(config.router.max_delay_ms, 2_000);
        assert_eq!(config.risk.max_inventory_per_symbol, dec!(20000));
        assert_eq!(config.risk.edge_freeze_floor_bps, dec!(2.5));
        assert_eq!(config.risk.max_total_notional, dec!(50000));
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.router.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(EngineConfigError::Invalid { field: "router.max_attempts", .. })
        ));

        let mut config = EngineConfig::default();
        config.router.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.risk.max_total_notional = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.simulation.rejection_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
