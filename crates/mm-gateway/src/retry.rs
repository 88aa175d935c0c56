//! 재시도 정책.
//!
//! 재시도는 명시적인 상태로 표현됩니다: 시도 횟수, 다음 대기 시간 계산,
//! 그리고 `tokio::time::sleep`. 정책 자체는 단순한 설정 값입니다.
//!
//! 일시적 오류(`ErrorClass::Transient`)만 재시도하며, 각 시도에는 하드
//! 타임아웃이, 전체 호출에는 마감 시간이 적용됩니다.

use std::future::Future;
use std::time::Duration;

use mm_core::RouterConfig;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{GatewayError, GatewayResult};

/// 재시도 설정.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 대기 시간
    pub base_delay: Duration,
    /// 지수 배수
    pub multiplier: f64,
    /// 단일 대기 시간 상한
    pub max_delay: Duration,
    /// 누적 대기 시간 상한
    pub max_total_delay: Duration,
    /// 시도당 하드 타임아웃
    pub attempt_timeout: Duration,
    /// 호출 전체 마감 시간
    pub deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for RetryConfig {
    fn from(config: &RouterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_total_delay: Duration::from_millis(config.max_total_delay_ms),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            deadline: Duration::from_millis(config.order_deadline_ms),
        }
    }
}

impl RetryConfig {
    /// 재시도 없는 설정 (한 번만 시도).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// `failures`번째 실패 후의 대기 시간 (1부터 시작).
    ///
    /// `base * multiplier^(failures - 1)`를 `max_delay`로 자릅니다.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !raw.is_finite() || raw >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(raw.max(0.0))
        }
    }
}

/// 백오프 상태.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
    total_delay: Duration,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
            total_delay: Duration::ZERO,
        }
    }

    /// 실패를 기록하고 다음 대기 시간을 반환합니다.
    ///
    /// 시도 횟수나 누적 대기 예산이 소진되면 None.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.config.max_attempts {
            return None;
        }
        let delay = self.config.delay_for(self.failures);
        if self.total_delay + delay > self.config.max_total_delay {
            return None;
        }
        self.total_delay += delay;
        Some(delay)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn total_delay(&self) -> Duration {
        self.total_delay
    }
}

/// 재시도 통계.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryStats {
    /// 실제 수행한 시도 횟수
    pub attempts: u32,
    /// 시도별 지연 시간
    pub attempt_latencies: Vec<Duration>,
    /// 누적 백오프 대기 시간
    pub total_delay: Duration,
    /// 전체 마감 시간 초과로 중단되었는지 여부
    pub deadline_exceeded: bool,
}

impl RetryStats {
    /// 재시도 횟수 (시도 횟수 - 1).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// 시도 지연 시간의 합.
    pub fn total_latency(&self) -> Duration {
        self.attempt_latencies.iter().sum()
    }
}

/// 재시도 실행 결과.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: GatewayResult<T>,
    pub stats: RetryStats,
}

/// 일시적 오류에 대해 정책에 따라 재시도합니다.
///
/// `operation`은 시도 번호(1부터)를 받아 한 번의 게이트웨이 호출을 수행합니다.
/// 일시적이지 않은 오류는 즉시 반환됩니다.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let deadline = Instant::now() + config.deadline;
    let mut backoff = Backoff::new(config.clone());
    let mut stats = RetryStats::default();

    loop {
        let attempt = stats.attempts + 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            stats.deadline_exceeded = true;
            return RetryOutcome {
                result: Err(GatewayError::Timeout(format!(
                    "{} deadline exceeded after {} attempts",
                    operation, stats.attempts
                ))),
                stats,
            };
        }

        let budget = config.attempt_timeout.min(remaining);
        let started = Instant::now();
        let result = match tokio::time::timeout(budget, f(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!(
                "{} attempt {} exceeded {:?}",
                operation, attempt, budget
            ))),
        };
        stats.attempts = attempt;
        stats.attempt_latencies.push(started.elapsed());

        let error = match result {
            Ok(value) => {
                debug!(operation, attempt, "게이트웨이 호출 성공");
                return RetryOutcome {
                    result: Ok(value),
                    stats,
                };
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => {
                debug!(operation, attempt, error = %e, "재시도 불가 오류");
                return RetryOutcome {
                    result: Err(e),
                    stats,
                };
            }
        };

        match backoff.next_delay() {
            Some(delay) if Instant::now() + delay < deadline => {
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "일시적 오류, 재시도 대기"
                );
                stats.total_delay += delay;
                tokio::time::sleep(delay).await;
            }
            Some(_) => {
                stats.deadline_exceeded = true;
                warn!(operation, attempt, error = %error, "마감 시간 내 재시도 불가, 중단");
                return RetryOutcome {
                    result: Err(error),
                    stats,
                };
            }
            None => {
                warn!(operation, attempt, error = %error, "재시도 한도 소진");
                return RetryOutcome {
                    result: Err(error),
                    stats,
                };
            }
        }
    }
}
