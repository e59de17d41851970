use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::agents::{AgentId, LiquidationRecord, Population, Position, PositionId, PositionKind};
use crate::liquidation::LiquidationEvent;
use crate::market::{Asset, MarketState};
use crate::policy::{Action, LIQUIDATION_BONUS};

/// Why an intended action was dropped. Rejection is routine, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InsufficientBalance,
    InsufficientLiquidity,
    NonPositiveAmount,
    UnknownAgent,
    /// Liquidation target already closed, or no longer a borrow
    TargetGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActionOutcome {
    /// `pnl` is the modeled profit credited to the acting agent
    Applied { pnl: f64 },
    Rejected(RejectReason),
}

impl ActionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ActionOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Collateral posted per unit of leveraged borrow notional
    pub collateral_factor: f64,
    pub liquidation_bonus: f64,
    /// Arbitrage profit rate drawn uniformly from this range
    pub arbitrage_profit: (f64, f64),
    /// Fee earned on provided liquidity when the agent quotes no spread
    pub default_spread: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            collateral_factor: 1.5,
            liquidation_bonus: LIQUIDATION_BONUS,
            arbitrage_profit: (0.01, 0.03),
            default_spread: 0.003,
        }
    }
}

/// Applies collected actions one at a time, in the order given. The only
/// writer of wallets, positions and market totals during the action phase.
#[derive(Debug)]
pub struct Executor {
    pub config: ExecutorConfig,
    pub applied: u64,
    pub rejected: u64,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Executor {
            config,
            applied: 0,
            rejected: 0,
        }
    }

    /// Apply every action in order; returns one outcome per action.
    pub fn execute_all<R: Rng + ?Sized>(
        &mut self,
        step: u64,
        actions: &[Action],
        population: &mut Population,
        market: &mut MarketState,
        rng: &mut R,
        events: &mut Vec<LiquidationEvent>,
    ) -> Vec<ActionOutcome> {
        actions
            .iter()
            .map(|action| self.execute(step, action, population, market, rng, events))
            .collect()
    }

    pub fn execute<R: Rng + ?Sized>(
        &mut self,
        step: u64,
        action: &Action,
        population: &mut Population,
        market: &mut MarketState,
        rng: &mut R,
        events: &mut Vec<LiquidationEvent>,
    ) -> ActionOutcome {
        let outcome = match action {
            Action::Supply { agent, asset, amount } => {
                self.supply(step, *agent, *asset, *amount, population, market)
            }
            Action::Borrow {
                agent,
                asset,
                amount,
                leverage,
            } => self.borrow(step, *agent, *asset, *amount, *leverage, population, market),
            Action::Liquidate {
                liquidator,
                target,
                position,
            } => self.liquidate(step, *liquidator, *target, *position, population, market, events),
            Action::ProvideLiquidity { agent, asset, amount } => {
                self.provide_liquidity(step, *agent, *asset, *amount, population, market)
            }
            Action::Arbitrage { agent, asset, amount } => {
                self.arbitrage(*agent, *asset, *amount, population, market, rng)
            }
        };

        match outcome {
            ActionOutcome::Applied { .. } => self.applied += 1,
            ActionOutcome::Rejected(_) => self.rejected += 1,
        }
        outcome
    }

    fn supply(
        &self,
        step: u64,
        agent: AgentId,
        asset: Asset,
        amount: f64,
        population: &mut Population,
        market: &mut MarketState,
    ) -> ActionOutcome {
        if !(amount > 0.0) {
            return ActionOutcome::Rejected(RejectReason::NonPositiveAmount);
        }
        let price = market.price(asset);
        let notional = amount * price;
        let Some(owner) = population.get_mut(agent) else {
            return ActionOutcome::Rejected(RejectReason::UnknownAgent);
        };
        if owner.wallet_balance < notional {
            return ActionOutcome::Rejected(RejectReason::InsufficientBalance);
        }

        owner.wallet_balance -= notional;
        *market.total_supply.entry(asset).or_insert(0.0) += amount;
        *market.liquidity.entry(asset).or_insert(0.0) += amount;

        population.open_position(agent, new_position(PositionKind::Supply, asset, amount, price, step));
        ActionOutcome::Applied { pnl: 0.0 }
    }

    /// Collateral required is `amount × price × collateral_factor / leverage`;
    /// the wallet is credited the borrowed notional net of that collateral.
    #[allow(clippy::too_many_arguments)]
    fn borrow(
        &self,
        step: u64,
        agent: AgentId,
        asset: Asset,
        amount: f64,
        leverage: f64,
        population: &mut Population,
        market: &mut MarketState,
    ) -> ActionOutcome {
        if !(amount > 0.0) {
            return ActionOutcome::Rejected(RejectReason::NonPositiveAmount);
        }
        if market.liquidity_of(asset) < amount {
            return ActionOutcome::Rejected(RejectReason::InsufficientLiquidity);
        }
        let price = market.price(asset);
        let leverage = leverage.max(1.0);
        let notional = amount * price;
        let collateral = notional * self.config.collateral_factor / leverage;

        let Some(owner) = population.get_mut(agent) else {
            return ActionOutcome::Rejected(RejectReason::UnknownAgent);
        };
        if owner.wallet_balance < collateral {
            return ActionOutcome::Rejected(RejectReason::InsufficientBalance);
        }

        owner.wallet_balance += notional - collateral;
        if let Some(liquidity) = market.liquidity.get_mut(&asset) {
            *liquidity -= amount;
        }
        *market.total_borrowed.entry(asset).or_insert(0.0) += amount;

        let mut position = new_position(PositionKind::Borrow, asset, amount, price, step);
        position.collateral = collateral;
        position.collateral_factor = self.config.collateral_factor;
        position.leverage = leverage;
        population.open_position(agent, position);
        ActionOutcome::Applied { pnl: 0.0 }
    }

    /// The liquidator repays the target's debt and receives the seized
    /// collateral plus the bonus.
    #[allow(clippy::too_many_arguments)]
    fn liquidate(
        &self,
        step: u64,
        liquidator: AgentId,
        target: AgentId,
        position_id: PositionId,
        population: &mut Population,
        market: &mut MarketState,
        events: &mut Vec<LiquidationEvent>,
    ) -> ActionOutcome {
        let debt = match population
            .get(target)
            .and_then(|a| a.positions.get(&position_id))
        {
            Some(p) if p.is_borrow() => p.debt_value(),
            _ => return ActionOutcome::Rejected(RejectReason::TargetGone),
        };
        match population.get(liquidator) {
            None => return ActionOutcome::Rejected(RejectReason::UnknownAgent),
            Some(l) if l.wallet_balance < debt => {
                return ActionOutcome::Rejected(RejectReason::InsufficientBalance)
            }
            Some(_) => {}
        }

        let Some(position) = population.remove_position(target, position_id) else {
            return ActionOutcome::Rejected(RejectReason::TargetGone);
        };
        let price = market.price(position.asset);
        let seized = position.collateral_value(price);
        let payout = seized * (1.0 + self.config.liquidation_bonus);
        let profit = payout - debt;

        if let Some(l) = population.get_mut(liquidator) {
            l.wallet_balance += profit;
            l.pnl_history.push(profit);
        }
        if let Some(owner) = population.get_mut(target) {
            owner.pnl_history.push(debt - position.collateral);
            owner.liquidation_history.push(LiquidationRecord {
                step,
                position: position.id,
                liquidator: Some(liquidator),
                collateral_lost: seized,
            });
        }

        market.settle_debt(position.asset, position.amount);
        market.liquidations_24h += 1;

        events.push(LiquidationEvent {
            step,
            agent: target,
            position: position.id,
            health_factor: position.health_factor(price),
            collateral_value: seized,
            debt_value: debt,
            cascade_round: 0,
            liquidator: Some(liquidator),
        });

        ActionOutcome::Applied { pnl: profit }
    }

    /// Liquidity moves from the wallet into the pool; the provider earns
    /// its quoted spread on the notional.
    fn provide_liquidity(
        &self,
        step: u64,
        agent: AgentId,
        asset: Asset,
        amount: f64,
        population: &mut Population,
        market: &mut MarketState,
    ) -> ActionOutcome {
        if !(amount > 0.0) {
            return ActionOutcome::Rejected(RejectReason::NonPositiveAmount);
        }
        let price = market.price(asset);
        let notional = amount * price;
        let Some(owner) = population.get_mut(agent) else {
            return ActionOutcome::Rejected(RejectReason::UnknownAgent);
        };
        if owner.wallet_balance < notional {
            return ActionOutcome::Rejected(RejectReason::InsufficientBalance);
        }

        let fee = notional * owner.strategy.spread.unwrap_or(self.config.default_spread);
        owner.wallet_balance += fee - notional;
        owner.pnl_history.push(fee);

        *market.liquidity.entry(asset).or_insert(0.0) += amount;
        market.volume_24h += notional;

        population.open_position(agent, new_position(PositionKind::Liquidity, asset, amount, price, step));
        ActionOutcome::Applied { pnl: fee }
    }

    /// Capital is not locked; the agent books a profit rate drawn from the
    /// run RNG on the traded notional.
    fn arbitrage<R: Rng + ?Sized>(
        &self,
        agent: AgentId,
        asset: Asset,
        amount: f64,
        population: &mut Population,
        market: &mut MarketState,
        rng: &mut R,
    ) -> ActionOutcome {
        if !(amount > 0.0) {
            return ActionOutcome::Rejected(RejectReason::NonPositiveAmount);
        }
        let notional = amount * market.price(asset);
        let Some(owner) = population.get_mut(agent) else {
            return ActionOutcome::Rejected(RejectReason::UnknownAgent);
        };
        if owner.wallet_balance < notional {
            return ActionOutcome::Rejected(RejectReason::InsufficientBalance);
        }

        let (low, high) = self.config.arbitrage_profit;
        let rate = if high > low { rng.gen_range(low..high) } else { low };
        let profit = notional * rate;
        owner.wallet_balance += profit;
        owner.pnl_history.push(profit);
        market.volume_24h += notional;

        ActionOutcome::Applied { pnl: profit }
    }
}

fn new_position(kind: PositionKind, asset: Asset, amount: f64, price: f64, step: u64) -> Position {
    Position {
        id: PositionId(0),
        kind,
        asset,
        amount,
        entry_price: price,
        collateral: 0.0,
        collateral_factor: 0.0,
        leverage: 1.0,
        opened_at_step: step,
        unrealized_pnl: 0.0,
        current_value: amount * price,
    }
}
