use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Utilization is never reported above this, even when borrows exceed supply.
pub const MAX_UTILIZATION: f64 = 0.95;
/// Gas-price proxy with an idle network (gwei).
pub const BASE_GAS_PRICE: f64 = 50.0;
/// Prices are floored here so GBM steps and impacts never reach zero.
const PRICE_FLOOR: f64 = 1e-9;

// ═══════════════════════════════════════════════════════════════════════
// Assets
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Asset {
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "USDC")]
    Usdc,
    #[serde(rename = "USDT")]
    Usdt,
}

impl Asset {
    /// Canonical order; every per-asset iteration in the engine follows it.
    pub const ALL: [Asset; 4] = [Asset::Eth, Asset::Btc, Asset::Usdc, Asset::Usdt];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eth => "ETH",
            Self::Btc => "BTC",
            Self::Usdc => "USDC",
            Self::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Market state
// ═══════════════════════════════════════════════════════════════════════

/// Live market for one scenario run. Only the executor, the scenario
/// applier and the cascade resolver write to it; policies get `&MarketState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub prices: BTreeMap<Asset, f64>,
    /// Annualized volatility
    pub volatility: BTreeMap<Asset, f64>,
    /// Available (unborrowed) liquidity in asset units
    pub liquidity: BTreeMap<Asset, f64>,
    pub total_supply: BTreeMap<Asset, f64>,
    pub total_borrowed: BTreeMap<Asset, f64>,
    pub utilization_rate: BTreeMap<Asset, f64>,
    pub liquidations_24h: u64,
    pub volume_24h: f64,
    pub gas_price: f64,
}

impl Default for MarketState {
    fn default() -> Self {
        Self::initial()
    }
}

impl MarketState {
    /// Starting market every scenario is shocked from.
    pub fn initial() -> Self {
        let table: [(Asset, f64, f64, f64, f64, f64); 4] = [
            // asset, price, vol, liquidity, supply, borrowed
            (Asset::Eth, 2_000.0, 0.03, 1e8, 1e7, 5e6),
            (Asset::Btc, 40_000.0, 0.025, 5e7, 1e6, 5e5),
            (Asset::Usdc, 1.0, 0.001, 1e9, 1e9, 5e8),
            (Asset::Usdt, 1.0, 0.001, 1e9, 1e9, 5e8),
        ];

        let mut state = MarketState {
            prices: BTreeMap::new(),
            volatility: BTreeMap::new(),
            liquidity: BTreeMap::new(),
            total_supply: BTreeMap::new(),
            total_borrowed: BTreeMap::new(),
            utilization_rate: BTreeMap::new(),
            liquidations_24h: 0,
            volume_24h: 0.0,
            gas_price: BASE_GAS_PRICE,
        };
        for (asset, price, vol, liquidity, supply, borrowed) in table {
            state.prices.insert(asset, price);
            state.volatility.insert(asset, vol);
            state.liquidity.insert(asset, liquidity);
            state.total_supply.insert(asset, supply);
            state.total_borrowed.insert(asset, borrowed);
            state.utilization_rate.insert(asset, 0.5);
        }
        state
    }

    pub fn price(&self, asset: Asset) -> f64 {
        self.prices.get(&asset).copied().unwrap_or(0.0)
    }

    pub fn liquidity_of(&self, asset: Asset) -> f64 {
        self.liquidity.get(&asset).copied().unwrap_or(0.0)
    }

    pub fn utilization(&self, asset: Asset) -> f64 {
        self.utilization_rate.get(&asset).copied().unwrap_or(0.0)
    }

    pub fn assets(&self) -> impl Iterator<Item = Asset> + '_ {
        self.prices.keys().copied()
    }

    /// Multiply every price by `factor`.
    pub fn scale_prices(&mut self, factor: f64) {
        for price in self.prices.values_mut() {
            *price = (*price * factor).max(PRICE_FLOOR);
        }
    }

    pub fn scale_volatility(&mut self, factor: f64) {
        for vol in self.volatility.values_mut() {
            *vol *= factor;
        }
    }

    pub fn scale_liquidity(&mut self, factor: f64) {
        for liq in self.liquidity.values_mut() {
            *liq *= factor;
        }
    }

    /// One discrete GBM step for `asset`: `S *= 1 + drift·dt + σ·dW`.
    pub fn gbm_step(&mut self, asset: Asset, drift: f64, dt: f64, dw: f64) {
        let vol = self.volatility.get(&asset).copied().unwrap_or(0.0);
        if let Some(price) = self.prices.get_mut(&asset) {
            *price = (*price * (1.0 + drift * dt + vol * dw)).max(PRICE_FLOOR);
        }
    }

    /// borrowed / supplied, clamped to [`MAX_UTILIZATION`]. Zero supply → 0.
    pub fn recompute_utilization(&mut self) {
        for asset in Asset::ALL {
            let supplied = self.total_supply.get(&asset).copied().unwrap_or(0.0);
            let borrowed = self.total_borrowed.get(&asset).copied().unwrap_or(0.0);
            let utilization = if supplied > 0.0 {
                (borrowed / supplied).clamp(0.0, MAX_UTILIZATION)
            } else {
                0.0
            };
            self.utilization_rate.insert(asset, utilization);
        }
    }

    /// Congestion proxy: base × (1 + 2 × fraction of agents holding positions).
    pub fn update_gas_price(&mut self, holder_fraction: f64) {
        self.gas_price = BASE_GAS_PRICE * (1.0 + holder_fraction.clamp(0.0, 1.0) * 2.0);
    }

    /// Debt of `amount` units repaid or written off: borrowed shrinks and the
    /// units return to the pool.
    pub fn settle_debt(&mut self, asset: Asset, amount: f64) {
        if let Some(borrowed) = self.total_borrowed.get_mut(&asset) {
            *borrowed = (*borrowed - amount).max(0.0);
        }
        *self.liquidity.entry(asset).or_insert(0.0) += amount;
    }

    /// Cascade price impact: every price *= (1 − impact).
    pub fn apply_price_impact(&mut self, impact: f64) {
        self.scale_prices(1.0 - impact);
    }

    pub fn average_liquidity(&self) -> f64 {
        if self.liquidity.is_empty() {
            return 0.0;
        }
        self.liquidity.values().sum::<f64>() / self.liquidity.len() as f64
    }

    /// Independently-owned deep copy for the per-step history.
    pub fn snapshot(&self) -> MarketState {
        self.clone()
    }
}
