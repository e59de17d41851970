use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentId, Archetype, Population, PositionId, LIQUIDATOR_MIN_PROFIT};
use crate::liquidation::{self, Breach};
use crate::market::{Asset, MarketState};

/// Agents holding less than this are skipped by the decision phase.
pub const MIN_ACTIVE_BALANCE: f64 = 100.0;
/// Liquidations must clear this multiple of the gas price.
pub const GAS_PROFIT_MULTIPLE: f64 = 10.0;
/// Default-policy borrows never exceed this leverage.
pub const MAX_DEFAULT_LEVERAGE: f64 = 2.0;
/// Liquidation bonus paid on seized collateral.
pub const LIQUIDATION_BONUS: f64 = 0.05;

/// An intended action. Amounts are in asset units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Supply {
        agent: AgentId,
        asset: Asset,
        amount: f64,
    },
    Borrow {
        agent: AgentId,
        asset: Asset,
        amount: f64,
        leverage: f64,
    },
    Liquidate {
        liquidator: AgentId,
        target: AgentId,
        position: PositionId,
    },
    ProvideLiquidity {
        agent: AgentId,
        asset: Asset,
        amount: f64,
    },
    Arbitrage {
        agent: AgentId,
        asset: Asset,
        amount: f64,
    },
}

impl Action {
    pub fn actor(&self) -> AgentId {
        match self {
            Action::Supply { agent, .. }
            | Action::Borrow { agent, .. }
            | Action::ProvideLiquidity { agent, .. }
            | Action::Arbitrage { agent, .. } => *agent,
            Action::Liquidate { liquidator, .. } => *liquidator,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Supply { .. } => "supply",
            Action::Borrow { .. } => "borrow",
            Action::Liquidate { .. } => "liquidate",
            Action::ProvideLiquidity { .. } => "provide_liquidity",
            Action::Arbitrage { .. } => "arbitrage",
        }
    }
}

/// Read-only view a policy decides against. `breaches` is the set of
/// borrow positions under the liquidation threshold at decision time.
#[derive(Clone, Copy)]
pub struct DecisionContext<'a> {
    pub market: &'a MarketState,
    pub breaches: &'a [Breach],
}

/// A pure strategy: at most one action per call.
pub type Policy = fn(&Agent, &DecisionContext<'_>, &mut StdRng) -> Option<Action>;

/// Archetype → strategy table. Protocol treasuries and institutions trade
/// like retail.
pub fn policy_for(archetype: Archetype) -> Policy {
    match archetype {
        Archetype::Arbitrageur => arbitrageur,
        Archetype::Liquidator => liquidator,
        Archetype::YieldFarmer => yield_farmer,
        Archetype::Whale => whale,
        Archetype::MarketMaker => market_maker,
        Archetype::Retail | Archetype::Protocol | Archetype::Institutional => default_policy,
    }
}

/// Evaluate one agent, honouring the minimum-balance skip.
pub fn decide(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    if agent.wallet_balance < MIN_ACTIVE_BALANCE {
        return None;
    }
    policy_for(agent.archetype)(agent, ctx, rng)
}

/// Per-agent RNG derived from the step's decision seed, so evaluation order
/// (and thread scheduling) cannot change what an agent draws.
pub fn agent_rng(decision_seed: u64, agent: AgentId) -> StdRng {
    StdRng::seed_from_u64(decision_seed ^ splitmix64(agent.0 as u64))
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Decision phase for the whole population. Actions come back in agent
/// index order whether or not evaluation ran in parallel.
pub fn decide_all(
    population: &Population,
    market: &MarketState,
    decision_seed: u64,
    parallel: bool,
) -> Vec<Action> {
    let breaches = liquidation::detect(population, market);
    let ctx = DecisionContext {
        market,
        breaches: &breaches,
    };
    let evaluate = |agent: &Agent| {
        let mut rng = agent_rng(decision_seed, agent.id);
        decide(agent, &ctx, &mut rng)
    };

    if parallel {
        population
            .agents
            .par_iter()
            .map(evaluate)
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    } else {
        population.agents.iter().filter_map(evaluate).collect()
    }
}

/// Share of opening positions that are borrows.
pub const OPENING_BORROW_SHARE: f64 = 0.4;

/// The position an agent already holds when the run starts: one supply or
/// borrow sized like a default-policy trade, with no reaction gate.
/// Liquidators hold none so their capital stays free for repayments.
pub fn opening_position(agent: &Agent, market: &MarketState, rng: &mut StdRng) -> Option<Action> {
    if agent.archetype == Archetype::Liquidator || agent.wallet_balance < MIN_ACTIVE_BALANCE {
        return None;
    }
    let asset = random_asset(rng);
    let notional = agent.wallet_balance * agent.risk_appetite * 0.1;
    let amount = units(notional, market.price(asset))?;

    if rng.gen::<f64>() < OPENING_BORROW_SHARE {
        Some(Action::Borrow {
            agent: agent.id,
            asset,
            amount,
            leverage: agent.leverage_preference.min(MAX_DEFAULT_LEVERAGE),
        })
    } else {
        Some(Action::Supply {
            agent: agent.id,
            asset,
            amount,
        })
    }
}

/// Opening positions for the whole population, in agent index order.
pub fn opening_book(population: &Population, market: &MarketState, seed: u64) -> Vec<Action> {
    population
        .agents
        .iter()
        .filter_map(|agent| opening_position(agent, market, &mut agent_rng(seed, agent.id)))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Strategies
// ═══════════════════════════════════════════════════════════════════════

fn random_asset(rng: &mut StdRng) -> Asset {
    *Asset::ALL.choose(rng).unwrap_or(&Asset::Eth)
}

/// Notional → asset units at the current price; `None` for a dead market.
fn units(notional: f64, price: f64) -> Option<f64> {
    if price > 0.0 && notional > 0.0 {
        Some(notional / price)
    } else {
        None
    }
}

pub fn arbitrageur(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    if rng.gen::<f64>() >= agent.reaction_speed * 0.1 {
        return None;
    }
    let asset = random_asset(rng);
    let price = ctx.market.price(asset);
    let notional = (agent.wallet_balance * 0.5).min(ctx.market.liquidity_of(asset) * price * 0.01);
    let amount = units(notional, price)?;
    Some(Action::Arbitrage {
        agent: agent.id,
        asset,
        amount,
    })
}

/// Profit a liquidator expects from seizing `collateral_value` at its
/// `min_profit` rate.
pub fn expected_liquidation_profit(collateral_value: f64, min_profit: f64) -> f64 {
    collateral_value * min_profit
}

/// Take the breach held by another agent with the highest expected profit,
/// provided it beats the gas bar and the debt fits the wallet. Ties keep
/// the first found.
pub fn liquidator(agent: &Agent, ctx: &DecisionContext<'_>, _rng: &mut StdRng) -> Option<Action> {
    let min_profit = agent.strategy.min_profit.unwrap_or(LIQUIDATOR_MIN_PROFIT);
    let gas_bar = GAS_PROFIT_MULTIPLE * ctx.market.gas_price;

    let mut best: Option<(f64, AgentId, PositionId)> = None;
    for breach in ctx.breaches {
        if breach.agent == agent.id || breach.debt_value > agent.wallet_balance {
            continue;
        }
        let profit = expected_liquidation_profit(breach.collateral_value, min_profit);
        if profit <= gas_bar {
            continue;
        }
        if best.map_or(true, |(p, _, _)| profit > p) {
            best = Some((profit, breach.agent, breach.position));
        }
    }

    best.map(|(_, target, position)| Action::Liquidate {
        liquidator: agent.id,
        target,
        position,
    })
}

/// Supply rate model: 2% base plus 15% at full utilization.
pub fn supply_apy(utilization: f64) -> f64 {
    0.02 + utilization * 0.15
}

pub fn yield_farmer(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    if rng.gen::<f64>() >= agent.reaction_speed * 0.2 {
        return None;
    }
    let mut best = Asset::ALL[0];
    let mut best_apy = supply_apy(ctx.market.utilization(best));
    for asset in Asset::ALL.iter().skip(1) {
        let apy = supply_apy(ctx.market.utilization(*asset));
        if apy > best_apy {
            best = *asset;
            best_apy = apy;
        }
    }
    let notional = agent.wallet_balance * agent.risk_appetite * 0.3;
    let amount = units(notional, ctx.market.price(best))?;
    Some(Action::Supply {
        agent: agent.id,
        asset: best,
        amount,
    })
}

pub fn whale(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    if rng.gen::<f64>() >= agent.reaction_speed * 0.05 {
        return None;
    }
    let asset = random_asset(rng);
    let price = ctx.market.price(asset);
    let cap = ctx.market.liquidity_of(asset) * price * 0.05;
    let notional = (agent.wallet_balance * agent.risk_appetite * 0.1).min(cap);
    let amount = units(notional, price)?;

    if rng.gen_bool(0.5) {
        Some(Action::Supply {
            agent: agent.id,
            asset,
            amount,
        })
    } else {
        Some(Action::Borrow {
            agent: agent.id,
            asset,
            amount,
            leverage: agent.leverage_preference,
        })
    }
}

pub fn market_maker(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    let asset = random_asset(rng);
    if rng.gen::<f64>() >= agent.reaction_speed * 0.3 {
        return None;
    }
    let amount = units(agent.wallet_balance * 0.2, ctx.market.price(asset))?;
    Some(Action::ProvideLiquidity {
        agent: agent.id,
        asset,
        amount,
    })
}

/// Retail-style behaviour: occasional small trades, 60/40 supply/borrow.
pub fn default_policy(agent: &Agent, ctx: &DecisionContext<'_>, rng: &mut StdRng) -> Option<Action> {
    if rng.gen::<f64>() >= agent.reaction_speed * 0.1 {
        return None;
    }
    let asset = random_asset(rng);
    let notional = agent.wallet_balance * agent.risk_appetite * 0.1;
    let amount = units(notional, ctx.market.price(asset))?;

    if rng.gen::<f64>() < 0.6 {
        Some(Action::Supply {
            agent: agent.id,
            asset,
            amount,
        })
    } else {
        Some(Action::Borrow {
            agent: agent.id,
            asset,
            amount,
            leverage: agent.leverage_preference.min(MAX_DEFAULT_LEVERAGE),
        })
    }
}
