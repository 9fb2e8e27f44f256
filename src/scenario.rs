//! TOML scenarios replayed against a protocol instance.
//!
//! A scenario names its accounts, seeds them with collateral and OPL, and then
//! lists steps. Amounts are decimal token strings ("2000", "0.5"). Steps that
//! revert are recorded in the report and the replay continues.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::primitives::utils::{format_ether, parse_ether};
use alloy::primitives::{keccak256, Address, U256};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use oneu_chain::{FixedPriceFeed, OracleStatus, PriceFeed};
use oneu_core::u256_math::{compute_nominal_cr, WAD};
use oneu_core::{Hints, Protocol, ProtocolParams, RedemptionRequest, TroveAdjustment};

/// Trials used when sampling an approximate insert hint.
const HINT_TRIALS: usize = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Starting collateral price in ONEU
    pub initial_price: String,
    /// Unix timestamp of deployment
    #[serde(default = "default_start_time")]
    pub start_time: u64,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_start_time() -> u64 {
    1_700_000_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSpec {
    pub name: String,
    #[serde(default = "zero_amount")]
    pub collateral: String,
    #[serde(default = "zero_amount")]
    pub opl: String,
    /// Account refuses incoming collateral
    #[serde(default)]
    pub non_payable: bool,
}

fn zero_amount() -> String {
    "0".to_string()
}

/// One user or environment action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    OpenTrove {
        account: String,
        collateral: String,
        debt: String,
        #[serde(default)]
        max_fee: Option<String>,
    },
    AddColl {
        account: String,
        amount: String,
    },
    WithdrawColl {
        account: String,
        amount: String,
    },
    Borrow {
        account: String,
        amount: String,
        #[serde(default)]
        max_fee: Option<String>,
    },
    Repay {
        account: String,
        amount: String,
    },
    CloseTrove {
        account: String,
    },
    ProvideToSp {
        account: String,
        amount: String,
    },
    WithdrawFromSp {
        account: String,
        amount: String,
    },
    GainToTrove {
        account: String,
    },
    Stake {
        account: String,
        amount: String,
    },
    Unstake {
        account: String,
        amount: String,
    },
    TransferOneu {
        from: String,
        to: String,
        amount: String,
    },
    SetPrice {
        price: String,
    },
    /// Force the feed status; anything but `working` freezes the price
    SetOracleStatus {
        status: OracleStatus,
    },
    AdvanceTime {
        secs: u64,
    },
    Liquidate {
        liquidator: String,
        borrower: String,
    },
    LiquidateTroves {
        liquidator: String,
        count: usize,
    },
    BatchLiquidate {
        liquidator: String,
        borrowers: Vec<String>,
    },
    Redeem {
        account: String,
        amount: String,
        #[serde(default)]
        max_fee: Option<String>,
        #[serde(default)]
        max_iterations: usize,
    },
    ClaimCollateral {
        account: String,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Self::OpenTrove { .. } => "open_trove",
            Self::AddColl { .. } => "add_coll",
            Self::WithdrawColl { .. } => "withdraw_coll",
            Self::Borrow { .. } => "borrow",
            Self::Repay { .. } => "repay",
            Self::CloseTrove { .. } => "close_trove",
            Self::ProvideToSp { .. } => "provide_to_sp",
            Self::WithdrawFromSp { .. } => "withdraw_from_sp",
            Self::GainToTrove { .. } => "gain_to_trove",
            Self::Stake { .. } => "stake",
            Self::Unstake { .. } => "unstake",
            Self::TransferOneu { .. } => "transfer_oneu",
            Self::SetPrice { .. } => "set_price",
            Self::SetOracleStatus { .. } => "set_oracle_status",
            Self::AdvanceTime { .. } => "advance_time",
            Self::Liquidate { .. } => "liquidate",
            Self::LiquidateTroves { .. } => "liquidate_troves",
            Self::BatchLiquidate { .. } => "batch_liquidate",
            Self::Redeem { .. } => "redeem",
            Self::ClaimCollateral { .. } => "claim_collateral",
        }
    }
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Account address derived from its scenario name.
pub fn account_address(name: &str) -> Address {
    Address::from_slice(&keccak256(name.as_bytes())[12..])
}

fn amount(value: &str) -> Result<U256> {
    parse_ether(value).with_context(|| format!("invalid amount {value:?}"))
}

fn max_fee(value: &Option<String>) -> Result<U256> {
    match value {
        Some(v) => amount(v),
        None => Ok(WAD),
    }
}

#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub outcome: Value,
}

#[derive(Debug, Serialize)]
pub struct TroveReport {
    pub account: String,
    pub status: oneu_core::TroveStatus,
    pub debt: String,
    pub coll: String,
    pub icr: String,
}

#[derive(Debug, Serialize)]
pub struct AccountReport {
    pub name: String,
    pub address: Address,
    pub collateral: String,
    pub oneu: String,
    pub opl: String,
    pub sp_deposit: String,
    pub sp_collateral_gain: String,
    pub sp_opl_gain: String,
    pub staked: String,
    pub claimable_surplus: String,
}

#[derive(Debug, Serialize)]
pub struct SystemReport {
    pub price: String,
    pub oracle_status: OracleStatus,
    pub tcr: String,
    pub recovery_mode: bool,
    pub total_collateral: String,
    pub total_debt: String,
    pub oneu_supply: String,
    pub base_rate: String,
    pub stability_pool_deposits: String,
    pub stability_pool_collateral: String,
    pub total_staked: String,
    pub opl_issued: String,
    pub total_stakes: String,
    pub total_stakes_snapshot: String,
    pub total_collateral_snapshot: String,
    pub active_troves: usize,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: String,
    pub steps: Vec<StepRecord>,
    pub failed_steps: usize,
    pub system: SystemReport,
    pub troves: Vec<TroveReport>,
    pub accounts: Vec<AccountReport>,
}

/// Protocol instance plus the scenario's named accounts.
pub struct Simulation {
    protocol: Protocol<FixedPriceFeed>,
    accounts: BTreeMap<String, Address>,
}

impl Simulation {
    pub fn new(params: ProtocolParams, scenario: &Scenario) -> Result<Self> {
        let price = amount(&scenario.initial_price)?;
        let feed = FixedPriceFeed::new(price).context("invalid initial price")?;

        let mut protocol = Protocol::new(params, feed, scenario.start_time);
        let mut accounts = BTreeMap::new();
        for spec in &scenario.accounts {
            let address = account_address(&spec.name);
            if accounts.insert(spec.name.clone(), address).is_some() {
                bail!("duplicate account {}", spec.name);
            }
            protocol.fund_collateral(address, amount(&spec.collateral)?);
            protocol = protocol.with_opl(address, amount(&spec.opl)?);
            protocol.set_non_payable(address, spec.non_payable);
        }

        info!(
            scenario = %scenario.name,
            accounts = accounts.len(),
            price = %format_ether(price),
            "Simulation deployed"
        );
        Ok(Self { protocol, accounts })
    }

    pub fn protocol(&self) -> &Protocol<FixedPriceFeed> {
        &self.protocol
    }

    fn resolve(&self, name: &str) -> Result<Address> {
        self.accounts
            .get(name)
            .copied()
            .with_context(|| format!("unknown account {name:?}"))
    }

    /// Replay every step, recording failures instead of stopping.
    pub fn run(&mut self, scenario: &Scenario) -> Report {
        let mut records = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            let record = match self.apply(index, step) {
                Ok(outcome) => StepRecord {
                    index,
                    action: step.action(),
                    ok: true,
                    error: None,
                    outcome,
                },
                Err(e) => {
                    warn!(index, action = step.action(), error = %e, "Step failed");
                    StepRecord {
                        index,
                        action: step.action(),
                        ok: false,
                        error: Some(format!("{e:#}")),
                        outcome: Value::Null,
                    }
                }
            };
            records.push(record);
        }
        self.report(scenario, records)
    }

    fn apply(&mut self, index: usize, step: &Step) -> Result<Value> {
        let outcome = match step {
            Step::OpenTrove {
                account,
                collateral,
                debt,
                max_fee: fee,
            } => {
                let who = self.resolve(account)?;
                let (coll, debt) = (amount(collateral)?, amount(debt)?);
                let hints = self.open_hints(coll, debt, index);
                let update = self.protocol.open_trove(who, max_fee(fee)?, coll, debt, hints)?;
                serde_json::to_value(update)?
            }
            Step::AddColl { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.add_coll(who, amount(a)?, Hints::none())?)?
            }
            Step::WithdrawColl { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.withdraw_coll(who, amount(a)?, Hints::none())?)?
            }
            Step::Borrow {
                account,
                amount: a,
                max_fee: fee,
            } => {
                let who = self.resolve(account)?;
                let adjustment = TroveAdjustment::borrow(amount(a)?, max_fee(fee)?);
                serde_json::to_value(self.protocol.adjust_trove(who, adjustment, Hints::none())?)?
            }
            Step::Repay { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.repay_debt(who, amount(a)?, Hints::none())?)?
            }
            Step::CloseTrove { account } => {
                let who = self.resolve(account)?;
                let returned = self.protocol.close_trove(who)?;
                serde_json::json!({ "collateral_returned": format_ether(returned) })
            }
            Step::ProvideToSp { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.provide_to_sp(who, amount(a)?)?)?
            }
            Step::WithdrawFromSp { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.withdraw_from_sp(who, amount(a)?)?)?
            }
            Step::GainToTrove { account } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.withdraw_collateral_gain_to_trove(who, Hints::none())?)?
            }
            Step::Stake { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.stake(who, amount(a)?)?)?
            }
            Step::Unstake { account, amount: a } => {
                let who = self.resolve(account)?;
                serde_json::to_value(self.protocol.unstake(who, amount(a)?)?)?
            }
            Step::TransferOneu { from, to, amount: a } => {
                let (from, to) = (self.resolve(from)?, self.resolve(to)?);
                self.protocol.transfer_oneu(from, to, amount(a)?)?;
                Value::Null
            }
            Step::SetPrice { price } => {
                let price = amount(price)?;
                self.protocol.price_feed_mut().set_price(price);
                info!(price = %format_ether(price), "Price moved");
                Value::Null
            }
            Step::SetOracleStatus { status } => {
                self.protocol.price_feed_mut().set_status(*status);
                info!(?status, "Oracle status forced");
                Value::Null
            }
            Step::AdvanceTime { secs } => {
                self.protocol.advance_time(*secs);
                Value::Null
            }
            Step::Liquidate { liquidator, borrower } => {
                let (liquidator, borrower) = (self.resolve(liquidator)?, self.resolve(borrower)?);
                serde_json::to_value(self.protocol.liquidate(liquidator, borrower)?)?
            }
            Step::LiquidateTroves { liquidator, count } => {
                let liquidator = self.resolve(liquidator)?;
                serde_json::to_value(self.protocol.liquidate_troves(liquidator, *count)?)?
            }
            Step::BatchLiquidate { liquidator, borrowers } => {
                let liquidator = self.resolve(liquidator)?;
                let borrowers = borrowers
                    .iter()
                    .map(|name| self.resolve(name))
                    .collect::<Result<Vec<_>>>()?;
                serde_json::to_value(self.protocol.batch_liquidate_troves(liquidator, &borrowers)?)?
            }
            Step::Redeem {
                account,
                amount: a,
                max_fee: fee,
                max_iterations,
            } => {
                let who = self.resolve(account)?;
                let request = self.redemption_request(amount(a)?, max_fee(fee)?, *max_iterations);
                serde_json::to_value(self.protocol.redeem_collateral(who, request)?)?
            }
            Step::ClaimCollateral { account } => {
                let who = self.resolve(account)?;
                let claimed = self.protocol.claim_collateral(who)?;
                serde_json::json!({ "claimed": format_ether(claimed) })
            }
        };
        Ok(outcome)
    }

    /// Insert position for a new trove, seeded from an approximate hint.
    fn open_hints(&self, coll: U256, debt: U256, seed: usize) -> Hints {
        let p = &self.protocol;
        let fee = p.borrowing_fee_with_decay(debt);
        let composite = p.params().composite_debt(debt + fee);
        let nicr = compute_nominal_cr(coll, composite);
        let approx = p.approx_hint(nicr, HINT_TRIALS, U256::from(seed as u64));
        p.find_insert_position(nicr, Hints::new(approx.hint, approx.hint))
    }

    fn redemption_request(&self, amount: U256, max_fee: U256, max_iterations: usize) -> RedemptionRequest {
        let p = &self.protocol;
        let found = p.get_redemption_hints(amount, p.price(), max_iterations);
        let hints = match found.partial_nicr {
            Some(nicr) => p.find_insert_position(nicr, Hints::none()),
            None => Hints::none(),
        };
        RedemptionRequest {
            amount: found.truncated_amount,
            first_hint: found.first_hint,
            hints,
            partial_hint_nicr: found.partial_nicr,
            max_iterations,
            max_fee_percentage: max_fee,
        }
    }

    fn report(&self, scenario: &Scenario, steps: Vec<StepRecord>) -> Report {
        let p = &self.protocol;
        let price = p.price();
        let state = p.state();

        let system = SystemReport {
            price: format_ether(price),
            oracle_status: p.price_feed().status(),
            tcr: format_ratio(p.tcr(price)),
            recovery_mode: p.check_recovery_mode(price),
            total_collateral: format_ether(p.entire_system_coll()),
            total_debt: format_ether(p.entire_system_debt()),
            oneu_supply: format_ether(state.oneu.total_supply()),
            base_rate: format_ether(p.base_rate()),
            stability_pool_deposits: format_ether(state.stability_pool.total_deposits()),
            stability_pool_collateral: format_ether(state.stability_pool.coll()),
            total_staked: format_ether(state.staking.total_staked()),
            opl_issued: format_ether(state.issuance.total_issued()),
            total_stakes: format_ether(state.troves.total_stakes()),
            total_stakes_snapshot: format_ether(state.troves.total_stakes_snapshot()),
            total_collateral_snapshot: format_ether(state.troves.total_collateral_snapshot()),
            active_troves: state.sorted.len(),
        };

        let troves = self
            .accounts
            .iter()
            .filter_map(|(name, address)| {
                let trove = p.trove(address)?;
                let (debt, coll, _) = p.entire_debt_and_coll(address);
                Some(TroveReport {
                    account: name.clone(),
                    status: trove.status,
                    debt: format_ether(debt),
                    coll: format_ether(coll),
                    icr: format_ratio(p.current_icr(address, price)),
                })
            })
            .collect();

        let accounts = self
            .accounts
            .iter()
            .map(|(name, address)| AccountReport {
                name: name.clone(),
                address: *address,
                collateral: format_ether(p.collateral_balance(address)),
                oneu: format_ether(p.oneu_balance(address)),
                opl: format_ether(p.opl_balance(address)),
                sp_deposit: format_ether(p.compounded_deposit(address)),
                sp_collateral_gain: format_ether(p.depositor_collateral_gain(address)),
                sp_opl_gain: format_ether(p.depositor_opl_gain(address)),
                staked: format_ether(p.staked(address)),
                claimable_surplus: format_ether(p.surplus_collateral(address)),
            })
            .collect();

        Report {
            scenario: scenario.name.clone(),
            failed_steps: steps.iter().filter(|s| !s.ok).count(),
            steps,
            system,
            troves,
            accounts,
        }
    }
}

/// Ratios render as decimals; an empty system reports "max".
fn format_ratio(ratio: U256) -> String {
    if ratio == U256::MAX {
        "max".to_string()
    } else {
        format_ether(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oneu_core::ProtocolConfig;

    const SCENARIO: &str = r#"
name = "drop"
initial_price = "200"

[[accounts]]
name = "alice"
collateral = "100"

[[accounts]]
name = "bob"
collateral = "100"

[[accounts]]
name = "keeper"

[[steps]]
action = "open_trove"
account = "alice"
collateral = "20"
debt = "2000"

[[steps]]
action = "open_trove"
account = "bob"
collateral = "80"
debt = "4000"

[[steps]]
action = "provide_to_sp"
account = "bob"
amount = "3000"

[[steps]]
action = "set_price"
price = "120"

[[steps]]
action = "liquidate"
liquidator = "keeper"
borrower = "alice"

[[steps]]
action = "liquidate"
liquidator = "keeper"
borrower = "bob"
"#;

    fn params() -> ProtocolParams {
        ProtocolConfig::testing().resolve().unwrap()
    }

    #[test]
    fn test_parse_tagged_steps() {
        let scenario = Scenario::from_toml(SCENARIO).unwrap();
        assert_eq!(scenario.accounts.len(), 3);
        assert_eq!(scenario.steps.len(), 6);
        assert_eq!(scenario.steps[3].action(), "set_price");
        assert_eq!(scenario.start_time, default_start_time());
    }

    #[test]
    fn test_replay_continues_after_failure() {
        let scenario = Scenario::from_toml(SCENARIO).unwrap();
        let mut sim = Simulation::new(params(), &scenario).unwrap();
        let report = sim.run(&scenario);

        // Alice falls below MCR at 120 and is offset; bob is still healthy
        assert!(report.steps[4].ok);
        assert!(!report.steps[5].ok);
        assert_eq!(report.failed_steps, 1);
        assert_eq!(report.system.active_troves, 1);

        let keeper = account_address("keeper");
        assert!(sim.protocol().oneu_balance(&keeper) > U256::ZERO);
    }

    #[test]
    fn test_unknown_account_is_a_step_error() {
        let scenario = Scenario::from_toml(
            r#"
name = "typo"
initial_price = "200"

[[steps]]
action = "close_trove"
account = "nobody"
"#,
        )
        .unwrap();
        let mut sim = Simulation::new(params(), &scenario).unwrap();
        let report = sim.run(&scenario);
        assert_eq!(report.failed_steps, 1);
        assert!(report.steps[0].error.as_deref().unwrap().contains("nobody"));
    }

    #[test]
    fn test_frozen_oracle_holds_last_good_price() {
        let mut scenario = Scenario::from_toml(&format!(
            "{SCENARIO}{}",
            r#"
[[steps]]
action = "set_oracle_status"
status = "working"

[[steps]]
action = "liquidate"
liquidator = "keeper"
borrower = "alice"
"#
        ))
        .unwrap();
        // Freeze the feed before the price drop
        scenario.steps.insert(
            3,
            Step::SetOracleStatus {
                status: OracleStatus::Frozen,
            },
        );

        let mut sim = Simulation::new(params(), &scenario).unwrap();
        let report = sim.run(&scenario);

        // Liquidation at 200 finds alice healthy, then succeeds once the feed works
        assert_eq!(report.steps[5].action, "liquidate");
        assert!(!report.steps[5].ok);
        assert!(report.steps[5].error.as_deref().unwrap().contains("nothing to liquidate"));
        assert!(report.steps[8].ok);
        assert_eq!(report.system.oracle_status, OracleStatus::Working);
        assert_eq!(sim.protocol().price(), parse_ether("120").unwrap());
    }

    #[test]
    fn test_zero_initial_price_is_rejected() {
        let scenario = Scenario::from_toml("name = \"x\"\ninitial_price = \"0\"\n").unwrap();
        assert!(Simulation::new(params(), &scenario).is_err());
    }
}
