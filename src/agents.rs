use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::market::{Asset, MarketState};

// ═══════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════

/// Agent identity. Doubles as the agent's index in [`Population::agents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub usize);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos_{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Archetypes and calibration
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Whale,
    Arbitrageur,
    Liquidator,
    YieldFarmer,
    Retail,
    Protocol,
    MarketMaker,
    Institutional,
}

impl Archetype {
    pub const ALL: [Archetype; 8] = [
        Archetype::Whale,
        Archetype::Arbitrageur,
        Archetype::Liquidator,
        Archetype::YieldFarmer,
        Archetype::Retail,
        Archetype::Protocol,
        Archetype::MarketMaker,
        Archetype::Institutional,
    ];

    /// Archetype used to pad the population up to the requested size.
    pub const DEFAULT: Archetype = Archetype::Retail;

    pub fn name(&self) -> &'static str {
        match self {
            Self::Whale => "whale",
            Self::Arbitrageur => "arbitrageur",
            Self::Liquidator => "liquidator",
            Self::YieldFarmer => "yield_farmer",
            Self::Retail => "retail",
            Self::Protocol => "protocol",
            Self::MarketMaker => "market_maker",
            Self::Institutional => "institutional",
        }
    }

    /// Uniform draw ranges for this archetype.
    pub fn profile(&self) -> ArchetypeProfile {
        let p = |balance, risk_appetite, leverage, reaction_speed| ArchetypeProfile {
            balance,
            risk_appetite,
            leverage,
            reaction_speed,
        };
        match self {
            Self::Whale => p((1e6, 1e8), (0.3, 0.6), (1.0, 2.0), (0.5, 0.8)),
            Self::Arbitrageur => p((1e5, 1e6), (0.6, 0.9), (2.0, 5.0), (0.9, 1.0)),
            Self::Liquidator => p((1e5, 5e6), (0.4, 0.7), (1.0, 1.0), (1.0, 1.0)),
            Self::YieldFarmer => p((1e4, 5e5), (0.5, 0.8), (1.5, 3.0), (0.3, 0.7)),
            Self::Retail => p((1e3, 1e5), (0.2, 0.9), (1.0, 2.0), (0.1, 0.5)),
            Self::Protocol => p((1e6, 1e8), (0.1, 0.3), (1.0, 1.0), (0.2, 0.4)),
            Self::MarketMaker => p((5e5, 1e7), (0.3, 0.5), (1.0, 1.5), (0.8, 1.0)),
            Self::Institutional => p((1e7, 1e9), (0.2, 0.4), (1.0, 1.5), (0.3, 0.6)),
        }
    }
}

/// `(low, high)` uniform ranges; a degenerate range yields `low`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchetypeProfile {
    pub balance: (f64, f64),
    pub risk_appetite: (f64, f64),
    pub leverage: (f64, f64),
    pub reaction_speed: (f64, f64),
}

fn draw<R: Rng + ?Sized>(rng: &mut R, (low, high): (f64, f64)) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

/// Archetype-specific knobs beyond the common four.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Liquidator: expected profit rate on seized collateral
    pub min_profit: Option<f64>,
    /// Market maker: quoted spread
    pub spread: Option<f64>,
}

pub const LIQUIDATOR_MIN_PROFIT: f64 = 0.05;

/// Fixed archetype proportions. Slots left after `floor(size × p)` per
/// archetype are padded with [`Archetype::DEFAULT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeDistribution {
    pub weights: Vec<(Archetype, f64)>,
}

impl Default for ArchetypeDistribution {
    fn default() -> Self {
        ArchetypeDistribution {
            weights: vec![
                (Archetype::Whale, 0.01),
                (Archetype::Arbitrageur, 0.05),
                (Archetype::Liquidator, 0.02),
                (Archetype::YieldFarmer, 0.30),
                (Archetype::Retail, 0.55),
                (Archetype::Protocol, 0.02),
                (Archetype::MarketMaker, 0.03),
                (Archetype::Institutional, 0.02),
            ],
        }
    }
}

impl ArchetypeDistribution {
    pub fn validate(&self) -> Result<()> {
        let mut total = 0.0;
        for (archetype, p) in &self.weights {
            if !p.is_finite() || *p < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "proportion for {} must be finite and non-negative, got {}",
                    archetype.name(),
                    p
                )));
            }
            total += p;
        }
        if total > 1.0 + 1e-9 {
            return Err(SimError::InvalidConfig(format!(
                "archetype proportions sum to {:.4}, must be <= 1",
                total
            )));
        }
        Ok(())
    }

    /// Per-archetype agent counts for a population of `size`, in table order,
    /// with the padding folded into the default archetype's slot at the end.
    pub fn counts(&self, size: usize) -> Vec<(Archetype, usize)> {
        let mut counts: Vec<(Archetype, usize)> = self
            .weights
            .iter()
            .map(|(a, p)| (*a, (size as f64 * p).floor() as usize))
            .collect();
        let allocated: usize = counts.iter().map(|(_, n)| n).sum();
        if allocated < size {
            counts.push((Archetype::DEFAULT, size - allocated));
        }
        counts
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Positions
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    Supply,
    Borrow,
    Liquidity,
}

impl PositionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Supply => "supply",
            Self::Borrow => "borrow",
            Self::Liquidity => "liquidity",
        }
    }
}

/// An open position. Borrow collateral is held in `asset`; debt is fixed
/// at its entry notional. Health factor is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub kind: PositionKind,
    pub asset: Asset,
    /// Asset units
    pub amount: f64,
    pub entry_price: f64,
    /// Borrow only: collateral posted, valued at entry
    pub collateral: f64,
    /// Borrow only: nominal health factor at opening
    pub collateral_factor: f64,
    pub leverage: f64,
    pub opened_at_step: u64,
    pub unrealized_pnl: f64,
    pub current_value: f64,
}

impl Position {
    pub fn is_borrow(&self) -> bool {
        self.kind == PositionKind::Borrow
    }

    /// Current value of posted collateral.
    pub fn collateral_value(&self, price: f64) -> f64 {
        if self.entry_price > 0.0 {
            self.collateral * price / self.entry_price
        } else {
            self.collateral
        }
    }

    pub fn debt_value(&self) -> f64 {
        if self.is_borrow() {
            self.amount * self.entry_price
        } else {
            0.0
        }
    }

    /// collateral value / debt value; infinite for non-borrow or zero debt.
    pub fn health_factor(&self, price: f64) -> f64 {
        if !self.is_borrow() {
            return f64::INFINITY;
        }
        let debt = self.debt_value();
        if debt <= 0.0 {
            return f64::INFINITY;
        }
        self.collateral_value(price) / debt
    }

    /// Value committed out of the wallet when the position was opened.
    pub fn book_value(&self) -> f64 {
        match self.kind {
            PositionKind::Supply | PositionKind::Liquidity => self.amount * self.entry_price,
            PositionKind::Borrow => self.collateral,
        }
    }

    /// Gross borrowed proceeds credited to the wallet at opening.
    pub fn borrowed_proceeds(&self) -> f64 {
        self.debt_value()
    }

    /// Refresh the derived marks against `price`.
    pub fn mark(&mut self, price: f64) {
        match self.kind {
            PositionKind::Supply => {
                self.unrealized_pnl = (price - self.entry_price) * self.amount;
                self.current_value = self.amount * price;
            }
            PositionKind::Borrow => {
                let value = self.collateral_value(price);
                self.unrealized_pnl = value - self.collateral;
                self.current_value = value;
            }
            PositionKind::Liquidity => {
                self.unrealized_pnl = 0.0;
                self.current_value = self.amount * price;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Agents
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRecord {
    pub step: u64,
    pub position: PositionId,
    pub liquidator: Option<AgentId>,
    pub collateral_lost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub archetype: Archetype,
    pub wallet_balance: f64,
    pub risk_appetite: f64,
    pub leverage_preference: f64,
    /// Scales every policy's probability of acting
    pub reaction_speed: f64,
    pub positions: BTreeMap<PositionId, Position>,
    pub pnl_history: Vec<f64>,
    pub liquidation_history: Vec<LiquidationRecord>,
    pub strategy: StrategyParams,
}

impl Agent {
    /// Draw a freshly calibrated agent of `archetype`.
    pub fn calibrated<R: Rng + ?Sized>(id: AgentId, archetype: Archetype, rng: &mut R) -> Self {
        let profile = archetype.profile();
        let wallet_balance = draw(rng, profile.balance);
        let risk_appetite = draw(rng, profile.risk_appetite);
        let leverage_preference = draw(rng, profile.leverage);
        let reaction_speed = draw(rng, profile.reaction_speed);

        let strategy = match archetype {
            Archetype::Liquidator => StrategyParams {
                min_profit: Some(LIQUIDATOR_MIN_PROFIT),
                ..StrategyParams::default()
            },
            Archetype::MarketMaker => StrategyParams {
                spread: Some(draw(rng, (0.001, 0.005))),
                ..StrategyParams::default()
            },
            _ => StrategyParams::default(),
        };

        Agent {
            id,
            archetype,
            wallet_balance,
            risk_appetite,
            leverage_preference,
            reaction_speed,
            positions: BTreeMap::new(),
            pnl_history: Vec::new(),
            liquidation_history: Vec::new(),
            strategy,
        }
    }

    pub fn has_positions(&self) -> bool {
        !self.positions.is_empty()
    }

    pub fn borrow_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_borrow())
    }

    /// Realized plus unrealized PnL.
    pub fn total_pnl(&self) -> f64 {
        let realized: f64 = self.pnl_history.iter().sum();
        let unrealized: f64 = self.positions.values().map(|p| p.unrealized_pnl).sum();
        realized + unrealized
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Population
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Population {
    pub agents: Vec<Agent>,
    next_position_id: u64,
}

impl Population {
    /// Deterministic population for `seed`.
    pub fn initialize(
        size: usize,
        distribution: &ArchetypeDistribution,
        seed: u64,
    ) -> Result<Population> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::initialize_with_rng(size, distribution, &mut rng)
    }

    /// Build `size` agents drawing calibration from `rng`. Agents are laid
    /// out archetype by archetype in distribution order, then padding.
    pub fn initialize_with_rng<R: Rng + ?Sized>(
        size: usize,
        distribution: &ArchetypeDistribution,
        rng: &mut R,
    ) -> Result<Population> {
        if size == 0 {
            return Err(SimError::Population {
                requested: size,
                reason: "population size must be positive".into(),
            });
        }
        distribution.validate().map_err(|e| SimError::Population {
            requested: size,
            reason: e.to_string(),
        })?;

        let counts = distribution.counts(size);
        let total: usize = counts.iter().map(|(_, n)| n).sum();
        if total != size {
            return Err(SimError::Population {
                requested: size,
                reason: format!("distribution allocates {} agents", total),
            });
        }

        let mut agents = Vec::with_capacity(size);
        for (archetype, count) in counts {
            for _ in 0..count {
                let id = AgentId(agents.len());
                agents.push(Agent::calibrated(id, archetype, rng));
            }
        }

        Ok(Population {
            agents,
            next_position_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id.0)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id.0)
    }

    pub fn count_of(&self, archetype: Archetype) -> usize {
        self.agents.iter().filter(|a| a.archetype == archetype).count()
    }

    /// Fraction of agents with at least one open position.
    pub fn holder_fraction(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        let holders = self.agents.iter().filter(|a| a.has_positions()).count();
        holders as f64 / self.agents.len() as f64
    }

    pub fn open_position_count(&self) -> usize {
        self.agents.iter().map(|a| a.positions.len()).sum()
    }

    /// Allocate the next position id and attach the position to `owner`.
    pub fn open_position(&mut self, owner: AgentId, mut position: Position) -> Option<PositionId> {
        let id = PositionId(self.next_position_id);
        let agent = self.agents.get_mut(owner.0)?;
        self.next_position_id += 1;
        position.id = id;
        agent.positions.insert(id, position);
        Some(id)
    }

    pub fn remove_position(&mut self, owner: AgentId, id: PositionId) -> Option<Position> {
        self.agents.get_mut(owner.0)?.positions.remove(&id)
    }

    /// Refresh every position's unrealized PnL and mark value.
    pub fn mark_positions(&mut self, market: &MarketState) {
        for agent in &mut self.agents {
            for position in agent.positions.values_mut() {
                position.mark(market.price(position.asset));
            }
        }
    }

    /// Σ(wallet + collateral of open borrow positions), the denominator of
    /// the cascade loss factor.
    pub fn total_market_value(&self) -> f64 {
        self.agents
            .iter()
            .map(|a| a.wallet_balance + a.borrow_positions().map(|p| p.collateral).sum::<f64>())
            .sum()
    }

    /// Σ wallets + Σ position book values − Σ borrowed proceeds. Supply,
    /// borrow and liquidity bookkeeping leave it unchanged; only modeled
    /// profit and loss moves it.
    pub fn ledger_value(&self) -> f64 {
        self.agents
            .iter()
            .map(|a| {
                a.wallet_balance
                    + a.positions
                        .values()
                        .map(|p| p.book_value() - p.borrowed_proceeds())
                        .sum::<f64>()
            })
            .sum()
    }
}
