//! tracing을 사용한 로깅 인프라.
//!
//! 실행 코어의 모든 상태 변화는 구조화된 필드(`order_id`, `symbol`, `side`)와
//! 함께 기록됩니다. 출력 형식은 설정의 `logging.format`으로 고릅니다.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::ParseError,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 여러 줄 형식 (개발용)
    #[default]
    Pretty,
    /// 로그 집계용 JSON 한 줄 형식 (운영용)
    Json,
    /// 간결한 한 줄 형식
    Compact,
}

/// 로깅 초기화 에러.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),
}

/// 로그 필터를 만듭니다. `RUST_LOG`가 있으면 설정 레벨보다 우선합니다.
pub fn log_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// 설정된 형식의 출력 layer.
///
/// JSON 형식은 주문 span 필드를 이벤트마다 함께 기록합니다.
fn output_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => fmt::layer().pretty().with_span_events(span_events).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_span_events(span_events)
            .boxed(),
    }
}

/// 전역 subscriber를 설치합니다.
///
/// 새로 설치했으면 true, 이미 다른 subscriber가 있으면 false.
/// 필터가 잘못되었으면 에러를 반환합니다.
pub fn try_init_logging(config: &LoggingConfig) -> Result<bool, LoggingError> {
    let filter = log_filter(config)?;
    let installed = tracing_subscriber::registry()
        .with(output_layer::<Registry>(config))
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            format = ?config.format,
            level = %config.level,
            span_events = config.span_events,
            "로깅 초기화 완료"
        );
    }
    Ok(installed)
}

/// 주문 컨텍스트 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! order_span {
    ($name:expr, $order_id:expr) => {
        tracing::info_span!($name, order_id = %$order_id)
    };
    ($name:expr, $order_id:expr, $symbol:expr) => {
        tracing::info_span!($name, order_id = %$order_id, symbol = %$symbol)
    };
    ($name:expr, $order_id:expr, $symbol:expr, $side:expr) => {
        tracing::info_span!(
            $name,
            order_id = %$order_id,
            symbol = %$symbol,
            side = %$side
        )
    };
}
