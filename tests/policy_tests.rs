use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use cascade_sim::agents::*;
use cascade_sim::liquidation::Breach;
use cascade_sim::market::{Asset, MarketState};
use cascade_sim::policy::*;

fn agent(archetype: Archetype) -> Agent {
    let mut rng = StdRng::seed_from_u64(0);
    Agent::calibrated(AgentId(0), archetype, &mut rng)
}

fn breach(owner: usize, position: u64, collateral_value: f64, debt_value: f64) -> Breach {
    Breach {
        agent: AgentId(owner),
        position: PositionId(position),
        health_factor: collateral_value / debt_value,
        collateral_value,
        debt_value,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Common gates
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_low_balance_agents_skipped() {
    let market = MarketState::initial();
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    for archetype in Archetype::ALL {
        let mut a = agent(archetype);
        a.wallet_balance = MIN_ACTIVE_BALANCE - 1.0;
        a.reaction_speed = 1.0;
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert!(decide(&a, &ctx, &mut rng).is_none());
        }
    }
}

#[test]
fn test_zero_reaction_speed_never_acts() {
    let market = MarketState::initial();
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut a = agent(Archetype::Retail);
    a.reaction_speed = 0.0;
    for seed in 0..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        assert!(decide(&a, &ctx, &mut rng).is_none());
    }
}

#[test]
fn test_agent_rng_stable() {
    use rand::Rng;
    let x: u64 = agent_rng(5, AgentId(3)).gen();
    let y: u64 = agent_rng(5, AgentId(3)).gen();
    let z: u64 = agent_rng(5, AgentId(4)).gen();
    assert_eq!(x, y);
    assert_ne!(x, z);
}

// ═══════════════════════════════════════════════════════════════════════
// Liquidator
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_liquidator_picks_most_profitable() {
    let market = MarketState::initial(); // gas 50 -> bar 500
    let mut liq = agent(Archetype::Liquidator);
    liq.wallet_balance = 1e6;

    let breaches = vec![
        breach(1, 10, 20_000.0, 19_200.0),  // expected 1_000
        breach(2, 11, 100_000.0, 96_000.0), // expected 5_000
        breach(0, 12, 500_000.0, 480_000.0), // own position
    ];
    let ctx = DecisionContext {
        market: &market,
        breaches: &breaches,
    };
    let mut rng = StdRng::seed_from_u64(1);
    let action = liquidator(&liq, &ctx, &mut rng).unwrap();
    assert_eq!(
        action,
        Action::Liquidate {
            liquidator: AgentId(0),
            target: AgentId(2),
            position: PositionId(11),
        }
    );
}

#[test]
fn test_liquidator_ignores_dust_and_unaffordable() {
    let market = MarketState::initial(); // gas 50 -> bar 500
    let mut liq = agent(Archetype::Liquidator);
    liq.wallet_balance = 50_000.0;

    let breaches = vec![
        breach(1, 1, 9_000.0, 9_500.0),    // expected 450, under the gas bar
        breach(2, 2, 100_000.0, 96_000.0), // debt above wallet
    ];
    let ctx = DecisionContext {
        market: &market,
        breaches: &breaches,
    };
    let mut rng = StdRng::seed_from_u64(1);
    assert!(liquidator(&liq, &ctx, &mut rng).is_none());
}

#[test]
fn test_liquidator_takes_underwater_positions() {
    let market = MarketState::initial();
    let mut liq = agent(Archetype::Liquidator);
    liq.wallet_balance = 50_000.0;

    // health factor 0.7: repaying the debt loses money, but the expected
    // profit on 28_000 of collateral still clears the gas bar
    let breaches = vec![breach(3, 3, 28_000.0, 40_000.0)];
    let ctx = DecisionContext {
        market: &market,
        breaches: &breaches,
    };
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(
        liquidator(&liq, &ctx, &mut rng),
        Some(Action::Liquidate {
            liquidator: AgentId(0),
            target: AgentId(3),
            position: PositionId(3),
        })
    );
}

#[test]
fn test_liquidator_gas_bar_scales_with_gas_price() {
    let mut market = MarketState::initial();
    let mut liq = agent(Archetype::Liquidator);
    liq.wallet_balance = 1e6;
    let breaches = vec![breach(1, 1, 15_000.0, 15_000.0)]; // expected 750
    let mut rng = StdRng::seed_from_u64(1);

    let ctx = DecisionContext {
        market: &market,
        breaches: &breaches,
    };
    assert!(liquidator(&liq, &ctx, &mut rng).is_some());

    market.update_gas_price(1.0); // 150 -> bar 1_500
    let ctx = DecisionContext {
        market: &market,
        breaches: &breaches,
    };
    assert!(liquidator(&liq, &ctx, &mut rng).is_none());
}

#[test]
fn test_expected_liquidation_profit() {
    assert_relative_eq!(
        expected_liquidation_profit(20_000.0, LIQUIDATOR_MIN_PROFIT),
        1_000.0,
        max_relative = 1e-12
    );
}

// ═══════════════════════════════════════════════════════════════════════
// Other strategies
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_supply_apy_curve() {
    assert_relative_eq!(supply_apy(0.0), 0.02);
    assert_relative_eq!(supply_apy(0.5), 0.095);
}

#[test]
fn test_yield_farmer_prefers_highest_apy() {
    let mut market = MarketState::initial();
    market.utilization_rate.insert(Asset::Eth, 0.2);
    market.utilization_rate.insert(Asset::Btc, 0.9);
    market.utilization_rate.insert(Asset::Usdc, 0.5);
    market.utilization_rate.insert(Asset::Usdt, 0.5);
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };

    let mut a = agent(Archetype::YieldFarmer);
    a.reaction_speed = 1.0;
    let mut acted = 0;
    for seed in 0..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        if let Some(action) = yield_farmer(&a, &ctx, &mut rng) {
            acted += 1;
            match action {
                Action::Supply { asset, amount, .. } => {
                    assert_eq!(asset, Asset::Btc);
                    let notional = a.wallet_balance * a.risk_appetite * 0.3;
                    assert_relative_eq!(amount * 40_000.0, notional, max_relative = 1e-12);
                }
                other => panic!("unexpected action {:?}", other),
            }
        }
    }
    assert!(acted > 0);
}

#[test]
fn test_yield_farmer_tie_goes_to_first_asset() {
    let market = MarketState::initial(); // every asset at 0.5
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut a = agent(Archetype::YieldFarmer);
    a.reaction_speed = 1.0;
    for seed in 0..100 {
        let mut rng = StdRng::seed_from_u64(seed);
        if let Some(Action::Supply { asset, .. }) = yield_farmer(&a, &ctx, &mut rng) {
            assert_eq!(asset, Asset::Eth);
        }
    }
}

#[test]
fn test_whale_order_capped_by_liquidity() {
    let mut market = MarketState::initial();
    market.scale_liquidity(1e-6);
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut w = agent(Archetype::Whale);
    w.wallet_balance = 1e12;
    w.risk_appetite = 1.0;
    w.reaction_speed = 1.0;

    let mut acted = 0;
    for seed in 0..500 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (asset, amount) = match whale(&w, &ctx, &mut rng) {
            Some(Action::Supply { asset, amount, .. }) => (asset, amount),
            Some(Action::Borrow { asset, amount, .. }) => (asset, amount),
            Some(other) => panic!("unexpected action {:?}", other),
            None => continue,
        };
        acted += 1;
        assert!(amount <= market.liquidity_of(asset) * 0.05 * (1.0 + 1e-9));
    }
    assert!(acted > 0);
}

#[test]
fn test_default_policy_leverage_capped() {
    let market = MarketState::initial();
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut a = agent(Archetype::Institutional);
    a.leverage_preference = 5.0;
    a.reaction_speed = 1.0;

    let mut borrows = 0;
    for seed in 0..500 {
        let mut rng = StdRng::seed_from_u64(seed);
        if let Some(Action::Borrow { leverage, .. }) = decide(&a, &ctx, &mut rng) {
            borrows += 1;
            assert_relative_eq!(leverage, MAX_DEFAULT_LEVERAGE);
        }
    }
    assert!(borrows > 0);
}

#[test]
fn test_market_maker_provides_liquidity() {
    let market = MarketState::initial();
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut mm = agent(Archetype::MarketMaker);
    mm.reaction_speed = 1.0;
    let mut acted = 0;
    for seed in 0..100 {
        let mut rng = StdRng::seed_from_u64(seed);
        match market_maker(&mm, &ctx, &mut rng) {
            Some(Action::ProvideLiquidity { asset, amount, .. }) => {
                acted += 1;
                assert_relative_eq!(
                    amount * market.price(asset),
                    mm.wallet_balance * 0.2,
                    max_relative = 1e-12
                );
            }
            Some(other) => panic!("unexpected action {:?}", other),
            None => {}
        }
    }
    assert!(acted > 0);
}

#[test]
fn test_arbitrage_sized_by_wallet() {
    let market = MarketState::initial();
    let ctx = DecisionContext {
        market: &market,
        breaches: &[],
    };
    let mut arb = agent(Archetype::Arbitrageur);
    arb.reaction_speed = 1.0;
    arb.wallet_balance = 10_000.0;
    for seed in 0..300 {
        let mut rng = StdRng::seed_from_u64(seed);
        if let Some(Action::Arbitrage { asset, amount, .. }) = arbitrageur(&arb, &ctx, &mut rng) {
            assert_relative_eq!(amount * market.price(asset), 5_000.0, max_relative = 1e-12);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Population-wide decision phase
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_parallel_decisions_match_sequential() {
    let pop = Population::initialize(2000, &ArchetypeDistribution::default(), 11).unwrap();
    let market = MarketState::initial();
    for seed in [1u64, 2, 3] {
        let seq = decide_all(&pop, &market, seed, false);
        let par = decide_all(&pop, &market, seed, true);
        assert!(!seq.is_empty());
        assert_eq!(seq, par);
    }
}

#[test]
fn test_actions_in_agent_order() {
    let pop = Population::initialize(2000, &ArchetypeDistribution::default(), 11).unwrap();
    let market = MarketState::initial();
    let actions = decide_all(&pop, &market, 77, false);
    let actors: Vec<AgentId> = actions.iter().map(|a| a.actor()).collect();
    let mut sorted = actors.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(actors, sorted, "one action per agent, in index order");
}

// ═══════════════════════════════════════════════════════════════════════
// Opening book
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_opening_book_one_position_per_agent() {
    let pop = Population::initialize(1000, &ArchetypeDistribution::default(), 5).unwrap();
    let market = MarketState::initial();
    let book = opening_book(&pop, &market, 9);

    let actors: Vec<AgentId> = book.iter().map(|a| a.actor()).collect();
    let mut sorted = actors.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(actors, sorted);
    assert_eq!(book.len(), 1000 - pop.count_of(Archetype::Liquidator));

    let borrows = book.iter().filter(|a| matches!(a, Action::Borrow { .. })).count();
    assert!(borrows > 250 && borrows < 550, "{} borrows", borrows);
    for action in &book {
        assert!(pop.get(action.actor()).unwrap().archetype != Archetype::Liquidator);
        if let Action::Borrow { leverage, .. } = action {
            assert!(*leverage <= MAX_DEFAULT_LEVERAGE);
        }
    }
    assert_eq!(book, opening_book(&pop, &market, 9));
}

#[test]
fn test_opening_position_sized_by_wallet() {
    let market = MarketState::initial();
    let a = agent(Archetype::Retail);
    let mut rng = StdRng::seed_from_u64(4);
    let (asset, amount) = match opening_position(&a, &market, &mut rng).unwrap() {
        Action::Supply { asset, amount, .. } | Action::Borrow { asset, amount, .. } => (asset, amount),
        other => panic!("unexpected action {:?}", other),
    };
    assert_relative_eq!(
        amount * market.price(asset),
        a.wallet_balance * a.risk_appetite * 0.1,
        max_relative = 1e-12
    );

    let mut poor = agent(Archetype::Whale);
    poor.wallet_balance = 10.0;
    assert!(opening_position(&poor, &market, &mut rng).is_none());
}
