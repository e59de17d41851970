use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::{AgentId, LiquidationRecord, Population, Position, PositionId};
use crate::market::MarketState;

/// Borrow positions below this health factor are eligible for liquidation.
pub const LIQUIDATION_THRESHOLD: f64 = 1.05;
pub const MAX_CASCADE_ROUNDS: u32 = 10;
/// Per-round price impact never exceeds this fraction.
pub const MAX_MARKET_IMPACT: f64 = 0.10;
/// Impact denominator: this multiple of average asset liquidity.
pub const IMPACT_LIQUIDITY_MULTIPLE: f64 = 10.0;

/// Health factor of `position` against the live market.
pub fn health_factor(position: &Position, market: &MarketState) -> f64 {
    position.health_factor(market.price(position.asset))
}

// ═══════════════════════════════════════════════════════════════════════
// Detector
// ═══════════════════════════════════════════════════════════════════════

/// A borrow position found under the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub agent: AgentId,
    pub position: PositionId,
    pub health_factor: f64,
    pub collateral_value: f64,
    pub debt_value: f64,
}

/// Every open borrow position with health factor below
/// [`LIQUIDATION_THRESHOLD`], in agent then position-id order.
pub fn detect(population: &Population, market: &MarketState) -> Vec<Breach> {
    let mut breaches = Vec::new();
    for agent in &population.agents {
        for position in agent.borrow_positions() {
            let price = market.price(position.asset);
            let hf = position.health_factor(price);
            if hf < LIQUIDATION_THRESHOLD {
                breaches.push(Breach {
                    agent: agent.id,
                    position: position.id,
                    health_factor: hf,
                    collateral_value: position.collateral_value(price),
                    debt_value: position.debt_value(),
                });
            }
        }
    }
    breaches
}

/// Immutable record of one liquidated position. Round 0 is a liquidator
/// agent's action; cascade rounds start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub step: u64,
    pub agent: AgentId,
    pub position: PositionId,
    pub health_factor: f64,
    pub collateral_value: f64,
    pub debt_value: f64,
    pub cascade_round: u32,
    pub liquidator: Option<AgentId>,
}

// ═══════════════════════════════════════════════════════════════════════
// Cascade resolver
// ═══════════════════════════════════════════════════════════════════════

/// min(collateral liquidated / (10 × average liquidity), 0.10). Zero or
/// negative liquidity contributes no impact.
pub fn market_impact(total_liquidated: f64, average_liquidity: f64) -> f64 {
    if average_liquidity <= 0.0 || total_liquidated <= 0.0 {
        return 0.0;
    }
    (total_liquidated / (average_liquidity * IMPACT_LIQUIDITY_MULTIPLE)).min(MAX_MARKET_IMPACT)
}

/// Composite cascade score in [0, 1]:
/// 0.4 × depth (rounds / 5) + 0.4 × losses / market value + 0.2 × contagion
/// (round-2 count / round-1 count), each factor capped at 1.
pub fn systemic_risk_score(rounds: &[CascadeRound], total_losses: f64, total_market_value: f64) -> f64 {
    let first = match rounds.first() {
        Some(r) => r,
        None => return 0.0,
    };

    let depth_factor = (rounds.len() as f64 / 5.0).min(1.0);
    let loss_factor = if total_market_value > 0.0 {
        (total_losses / total_market_value).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let contagion_factor = match rounds.get(1) {
        Some(second) if first.liquidations > 0 => {
            (second.liquidations as f64 / first.liquidations as f64).min(1.0)
        }
        _ => 0.0,
    };

    depth_factor * 0.4 + loss_factor * 0.4 + contagion_factor * 0.2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeState {
    Idle,
    ResolvingRound(u32),
    Converged,
    RoundCapReached,
}

impl CascadeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CascadeState::Converged | CascadeState::RoundCapReached)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeRound {
    pub round: u32,
    pub liquidations: usize,
    pub losses: f64,
    pub market_impact: f64,
    pub cumulative_losses: f64,
}

/// Outcome of one resolved cascade. `capped` is set when the round cap cut
/// the cascade short instead of it converging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub step: u64,
    pub rounds: u32,
    pub total_liquidations: usize,
    pub total_losses: f64,
    pub cascade_depth: u32,
    pub systemic_risk: f64,
    pub capped: bool,
    pub final_state: CascadeState,
    pub details: Vec<CascadeRound>,
}

impl CascadeReport {
    pub fn empty(step: u64) -> Self {
        CascadeReport {
            step,
            rounds: 0,
            total_liquidations: 0,
            total_losses: 0.0,
            cascade_depth: 0,
            systemic_risk: 0.0,
            capped: false,
            final_state: CascadeState::Idle,
            details: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub max_rounds: u32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        CascadeConfig {
            max_rounds: MAX_CASCADE_ROUNDS,
        }
    }
}

#[derive(Debug)]
pub struct CascadeResolver {
    pub config: CascadeConfig,
    state: CascadeState,
}

impl CascadeResolver {
    pub fn new(config: CascadeConfig) -> Self {
        CascadeResolver {
            config,
            state: CascadeState::Idle,
        }
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    /// Resolve a cascade seeded by `initial`. Each round liquidates its set,
    /// moves every price by the round's impact, then rescans agents not yet
    /// liquidated in this cascade. Stops on an empty rescan or at the round
    /// cap, whichever comes first.
    pub fn resolve(
        &mut self,
        step: u64,
        initial: Vec<Breach>,
        population: &mut Population,
        market: &mut MarketState,
        events: &mut Vec<LiquidationEvent>,
    ) -> CascadeReport {
        self.state = CascadeState::Idle;
        if initial.is_empty() {
            return CascadeReport::empty(step);
        }

        let max_rounds = self.config.max_rounds.max(1);
        let mut liquidated_agents: BTreeSet<AgentId> = BTreeSet::new();
        let mut details: Vec<CascadeRound> = Vec::new();
        let mut cumulative_losses = 0.0;
        let mut current = initial;
        let mut round = 0u32;

        loop {
            round += 1;
            self.state = CascadeState::ResolvingRound(round);

            // Impact is measured against the pool as it stood before this
            // round's debt settlements.
            let average_liquidity = market.average_liquidity();
            let mut count = 0usize;
            let mut losses = 0.0;
            for breach in &current {
                if let Some(seized) = liquidate_position(step, round, breach, population, market, events) {
                    count += 1;
                    losses += seized;
                    liquidated_agents.insert(breach.agent);
                }
            }

            let impact = market_impact(losses, average_liquidity);
            market.apply_price_impact(impact);
            cumulative_losses += losses;
            details.push(CascadeRound {
                round,
                liquidations: count,
                losses,
                market_impact: impact,
                cumulative_losses,
            });

            let next: Vec<Breach> = detect(population, market)
                .into_iter()
                .filter(|b| !liquidated_agents.contains(&b.agent))
                .collect();

            if next.is_empty() {
                self.state = CascadeState::Converged;
                break;
            }
            if round >= max_rounds {
                self.state = CascadeState::RoundCapReached;
                warn!(
                    step,
                    rounds = round,
                    pending = next.len(),
                    "cascade hit the round cap before converging"
                );
                break;
            }
            current = next;
        }

        market.recompute_utilization();

        let total_market_value = population.total_market_value();
        let systemic_risk = systemic_risk_score(&details, cumulative_losses, total_market_value);
        if round > 1 {
            warn!(step, rounds = round, losses = cumulative_losses, "multi-round liquidation cascade");
        }

        CascadeReport {
            step,
            rounds: round,
            total_liquidations: details.iter().map(|r| r.liquidations).sum(),
            total_losses: cumulative_losses,
            cascade_depth: round,
            systemic_risk,
            capped: self.state == CascadeState::RoundCapReached,
            final_state: self.state,
            details,
        }
    }
}

/// Remove one breaching position: the owner forfeits the collateral, the
/// debt goes back to the pool. Returns the collateral value seized, or
/// `None` if the position is already gone.
fn liquidate_position(
    step: u64,
    round: u32,
    breach: &Breach,
    population: &mut Population,
    market: &mut MarketState,
    events: &mut Vec<LiquidationEvent>,
) -> Option<f64> {
    let position = population.remove_position(breach.agent, breach.position)?;
    let price = market.price(position.asset);
    let seized = position.collateral_value(price);
    let debt = position.debt_value();

    market.settle_debt(position.asset, position.amount);
    market.liquidations_24h += 1;

    if let Some(owner) = population.get_mut(breach.agent) {
        owner.pnl_history.push(debt - position.collateral);
        owner.liquidation_history.push(LiquidationRecord {
            step,
            position: position.id,
            liquidator: None,
            collateral_lost: seized,
        });
    }

    events.push(LiquidationEvent {
        step,
        agent: breach.agent,
        position: position.id,
        health_factor: position.health_factor(price),
        collateral_value: seized,
        debt_value: debt,
        cascade_round: round,
        liquidator: None,
    });

    Some(seized)
}
