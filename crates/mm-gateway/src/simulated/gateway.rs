//! 시뮬레이션 게이트웨이 구현.

use async_trait::async_trait;
use mm_core::{FillEvent, OrderIntent, Position, Price, Quantity, SimulationConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::traits::{
    CancelOrderResponse, Gateway, GatewayResult, PlaceOrderResponse, VenueOrderReport,
    VenueOrderStatus, VenuePosition,
};
use crate::GatewayError;

/// 거래소 주문 ID 시작 번호.
const FIRST_EXCHANGE_ID: u64 = 1_000_000;

/// 시뮬레이션 게이트웨이 설정.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// 주문 거부 확률 (0.0 ~ 1.0)
    pub rejection_rate: f64,
    /// 거부 사유
    pub reject_reason: String,
    /// 부분 체결 확률 (0.0 ~ 1.0)
    pub partial_fill_probability: f64,
    /// 부분 체결 비율 범위 (퍼센트, 양 끝 포함)
    pub partial_fill_pct: (u32, u32),
    /// 호출당 응답 지연
    pub latency: Duration,
    /// 난수 시드
    pub seed: Option<u64>,
    /// 조회 시 계획된 체결을 공개할지 여부
    pub auto_fill: bool,
    /// 시장가 주문에 사용할 심볼별 기준 가격
    pub reference_prices: HashMap<String, Price>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            rejection_rate: 0.05,
            reject_reason: "InsufficientMargin".to_string(),
            partial_fill_probability: 0.5,
            partial_fill_pct: (50, 90),
            latency: Duration::ZERO,
            seed: None,
            auto_fill: true,
            reference_prices: HashMap::new(),
        }
    }
}

impl From<&SimulationConfig> for SimulatedConfig {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            rejection_rate: config.rejection_rate,
            partial_fill_probability: config.partial_fill_probability,
            latency: Duration::from_millis(config.latency_ms),
            seed: config.seed,
            ..Default::default()
        }
    }
}

impl SimulatedConfig {
    /// 거부 확률을 설정합니다.
    pub fn with_rejection_rate(mut self, rate: f64) -> Self {
        self.rejection_rate = rate;
        self
    }

    /// 부분 체결 확률을 설정합니다.
    pub fn with_partial_fill_probability(mut self, probability: f64) -> Self {
        self.partial_fill_probability = probability;
        self
    }

    /// 응답 지연을 설정합니다.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 난수 시드를 고정합니다.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 자동 체결 여부를 설정합니다.
    pub fn with_auto_fill(mut self, auto_fill: bool) -> Self {
        self.auto_fill = auto_fill;
        self
    }

    /// 시장가 주문용 기준 가격을 추가합니다.
    pub fn with_reference_price(mut self, symbol: impl Into<String>, price: Price) -> Self {
        self.reference_prices.insert(symbol.into(), price);
        self
    }
}

#[derive(Debug)]
struct SimOrder {
    intent: OrderIntent,
    exchange_order_id: String,
    status: VenueOrderStatus,
    /// 아직 공개되지 않은 체결 (수량, 가격)
    planned: VecDeque<(Quantity, Price)>,
    /// 공개된 체결
    revealed: Vec<FillEvent>,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    next_exchange_id: u64,
    orders: HashMap<String, SimOrder>,
    place_faults: VecDeque<GatewayError>,
    /// 주문은 접수하되 응답 대신 반환할 에러
    lost_place_responses: VecDeque<GatewayError>,
    cancel_faults: VecDeque<GatewayError>,
    poll_faults: VecDeque<GatewayError>,
    query_faults: VecDeque<GatewayError>,
    place_calls: u32,
    cancel_calls: u32,
    poll_calls: u32,
    query_calls: u32,
}

/// 시뮬레이션 게이트웨이.
///
/// 체결은 제출 시점에 계획되고 `poll_fills` 호출마다 하나씩 공개됩니다.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    config: SimulatedConfig,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedGateway {
    /// 새 시뮬레이션 게이트웨이를 생성합니다.
    pub fn new(config: SimulatedConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            state: Arc::new(RwLock::new(SimState {
                rng,
                next_exchange_id: FIRST_EXCHANGE_ID,
                orders: HashMap::new(),
                place_faults: VecDeque::new(),
                lost_place_responses: VecDeque::new(),
                cancel_faults: VecDeque::new(),
                poll_faults: VecDeque::new(),
                query_faults: VecDeque::new(),
                place_calls: 0,
                cancel_calls: 0,
                poll_calls: 0,
                query_calls: 0,
            })),
        }
    }

    /// 거부와 부분 체결이 없는 결정적 게이트웨이.
    pub fn deterministic() -> Self {
        Self::new(
            SimulatedConfig::default()
                .with_rejection_rate(0.0)
                .with_partial_fill_probability(0.0)
                .with_seed(0),
        )
    }

    // ==================== 장애 주입 ====================

    /// 다음 `place_order` 호출이 반환할 에러를 추가합니다.
    pub async fn push_place_fault(&self, error: GatewayError) {
        self.state.write().await.place_faults.push_back(error);
    }

    /// 다음 `place_order` 호출은 주문을 접수한 뒤 응답 대신 이 에러를 반환합니다.
    pub async fn push_lost_place_response(&self, error: GatewayError) {
        self.state.write().await.lost_place_responses.push_back(error);
    }

    /// 다음 `query_order` 호출이 반환할 에러를 추가합니다.
    pub async fn push_query_fault(&self, error: GatewayError) {
        self.state.write().await.query_faults.push_back(error);
    }

    /// 다음 `cancel_order` 호출이 반환할 에러를 추가합니다.
    pub async fn push_cancel_fault(&self, error: GatewayError) {
        self.state.write().await.cancel_faults.push_back(error);
    }

    /// 다음 `poll_fills` 호출이 반환할 에러를 추가합니다.
    pub async fn push_poll_fault(&self, error: GatewayError) {
        self.state.write().await.poll_faults.push_back(error);
    }

    // ==================== 조회 ====================

    pub async fn place_calls(&self) -> u32 {
        self.state.read().await.place_calls
    }

    pub async fn cancel_calls(&self) -> u32 {
        self.state.read().await.cancel_calls
    }

    pub async fn poll_calls(&self) -> u32 {
        self.state.read().await.poll_calls
    }

    pub async fn query_calls(&self) -> u32 {
        self.state.read().await.query_calls
    }

    /// 거래소 측 주문 상태.
    pub async fn order_status(&self, order_id: &str) -> Option<VenueOrderStatus> {
        self.state
            .read()
            .await
            .orders
            .get(order_id)
            .map(|order| order.status)
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn plan_fills(&self, rng: &mut StdRng, qty: Quantity, price: Price) -> VecDeque<(Quantity, Price)> {
        let mut plan = VecDeque::new();
        if rng.gen::<f64>() < self.config.partial_fill_probability {
            let (lo, hi) = self.config.partial_fill_pct;
            let pct = rng.gen_range(lo.min(hi)..=hi.max(lo));
            let first = (qty * Decimal::from(pct) / Decimal::ONE_HUNDRED).round_dp(8);
            if first > Decimal::ZERO && first < qty {
                plan.push_back((first, price));
                plan.push_back((qty - first, price));
                return plan;
            }
        }
        plan.push_back((qty, price));
        plan
    }
}

#[async_trait]
impl Gateway for SimulatedGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn place_order(&self, intent: &OrderIntent) -> GatewayResult<PlaceOrderResponse> {
        self.simulate_latency().await;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.place_calls += 1;

        if let Some(fault) = state.place_faults.pop_front() {
            debug!(order_id = %intent.order_id, error = %fault, "주입된 제출 장애");
            return Err(fault);
        }
        if state.orders.contains_key(&intent.order_id) {
            return Err(GatewayError::DuplicateOrder(intent.order_id.clone()));
        }
        if intent.quantity <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest(format!(
                "quantity must be positive: {}",
                intent.quantity
            )));
        }
        let price = intent
            .price
            .or_else(|| self.config.reference_prices.get(&intent.symbol).copied())
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!(
                    "no price for market order on {}",
                    intent.symbol
                ))
            })?;

        let exchange_order_id = format!("SIM-{}", state.next_exchange_id);
        state.next_exchange_id += 1;

        let rejected = state.rng.gen::<f64>() < self.config.rejection_rate;
        let (status, planned) = if rejected {
            (VenueOrderStatus::Rejected, VecDeque::new())
        } else {
            let plan = self.plan_fills(&mut state.rng, intent.quantity, price);
            (VenueOrderStatus::New, plan)
        };

        state.orders.insert(
            intent.order_id.clone(),
            SimOrder {
                intent: intent.clone(),
                exchange_order_id: exchange_order_id.clone(),
                status,
                planned,
                revealed: Vec::new(),
            },
        );

        if let Some(lost) = state.lost_place_responses.pop_front() {
            debug!(order_id = %intent.order_id, error = %lost, "주문 접수 후 응답 유실");
            return Err(lost);
        }

        if rejected {
            Ok(PlaceOrderResponse::rejected(
                exchange_order_id,
                self.config.reject_reason.clone(),
            ))
        } else {
            Ok(PlaceOrderResponse::accepted(exchange_order_id))
        }
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<CancelOrderResponse> {
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        state.cancel_calls += 1;

        if let Some(fault) = state.cancel_faults.pop_front() {
            return Err(fault);
        }
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        match order.status {
            VenueOrderStatus::Filled => Err(GatewayError::InvalidRequest(format!(
                "order already filled: {}",
                order.exchange_order_id
            ))),
            VenueOrderStatus::Rejected => Err(GatewayError::InvalidRequest(format!(
                "order was rejected: {}",
                order.exchange_order_id
            ))),
            VenueOrderStatus::Canceled => Ok(CancelOrderResponse {
                status: VenueOrderStatus::Canceled,
            }),
            VenueOrderStatus::New | VenueOrderStatus::PartiallyFilled => {
                order.status = VenueOrderStatus::Canceled;
                order.planned.clear();
                Ok(CancelOrderResponse {
                    status: VenueOrderStatus::Canceled,
                })
            }
        }
    }

    async fn query_order(&self, order_id: &str) -> GatewayResult<VenueOrderReport> {
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        state.query_calls += 1;

        if let Some(fault) = state.query_faults.pop_front() {
            return Err(fault);
        }
        let order = state
            .orders
            .get(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        Ok(VenueOrderReport {
            exchange_order_id: order.exchange_order_id.clone(),
            status: order.status,
            filled_qty: order.revealed.iter().map(|fill| fill.quantity).sum(),
            reject_reason: (order.status == VenueOrderStatus::Rejected)
                .then(|| self.config.reject_reason.clone()),
        })
    }

    async fn poll_fills(&self, order_id: &str) -> GatewayResult<Vec<FillEvent>> {
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        state.poll_calls += 1;

        if let Some(fault) = state.poll_faults.pop_front() {
            return Err(fault);
        }
        let auto_fill = self.config.auto_fill;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        let working = matches!(
            order.status,
            VenueOrderStatus::New | VenueOrderStatus::PartiallyFilled
        );
        if auto_fill && working {
            if let Some((qty, price)) = order.planned.pop_front() {
                let fill = FillEvent::new(
                    order_id,
                    format!("FILL-{}", Uuid::new_v4()),
                    order.intent.symbol.clone(),
                    order.intent.side,
                    qty,
                    price,
                );
                order.revealed.push(fill);
                order.status = if order.planned.is_empty() {
                    VenueOrderStatus::Filled
                } else {
                    VenueOrderStatus::PartiallyFilled
                };
            }
        }

        Ok(order.revealed.clone())
    }

    async fn get_position(&self, symbol: &str) -> GatewayResult<VenuePosition> {
        let state = self.state.read().await;

        let mut fills: Vec<&FillEvent> = state
            .orders
            .values()
            .flat_map(|order| order.revealed.iter())
            .filter(|fill| fill.symbol == symbol)
            .collect();
        fills.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.fill_id.cmp(&b.fill_id))
        });

        let mut position = Position::flat(symbol);
        for fill in fills {
            position
                .apply_fill(fill.side, fill.quantity, fill.price)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        }

        Ok(VenuePosition {
            symbol: symbol.to_string(),
            quantity: position.quantity,
            avg_entry_price: position.avg_entry_price,
        })
    }
}
