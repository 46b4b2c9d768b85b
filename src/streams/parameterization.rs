use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    streams::StreamName,
    units::{EngineValue, Unit},
};

/// The lifecycle stage a recovery policy attaches to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStage {
    /// Material recovered from equipment leaving service.
    Eol,
    /// Material recovered during servicing of installed equipment.
    #[default]
    Recharge,
}

/// A percentage held separately per lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRate {
    eol: EngineValue,
    recharge: EngineValue,
}

impl StagedRate {
    fn uniform(amount: Decimal) -> Self {
        Self {
            eol: EngineValue::new(amount, Unit::Percent),
            recharge: EngineValue::new(amount, Unit::Percent),
        }
    }

    pub fn get(&self, stage: RecoveryStage) -> EngineValue {
        match stage {
            RecoveryStage::Eol => self.eol,
            RecoveryStage::Recharge => self.recharge,
        }
    }

    pub fn set(&mut self, stage: RecoveryStage, value: EngineValue) {
        match stage {
            RecoveryStage::Eol => self.eol = value,
            RecoveryStage::Recharge => self.recharge = value,
        }
    }
}

/// Whether equipment retired by a policy is replaced with new equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementKind {
    WithReplacement,
    WithoutReplacement,
}

// ================================================================================================
// Per-substance parameterization
// ================================================================================================

/// Lifecycle parameters and per-step bookkeeping for one (application,
/// substance).
///
/// Two lifetimes coexist here. Structural parameters (intensities, initial
/// charges, yield rates, enabled flags, last-specified values) persist across
/// years. Per-step state (recovery rates, retirement accumulation, recharge
/// accumulation, the sticky replacement flag, the fresh-sales-intent flag)
/// resets on every year increment so that policies must re-activate each
/// timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameterization {
    ghg_intensity: EngineValue,
    energy_intensity: EngineValue,
    initial_charges: BTreeMap<StreamName, EngineValue>,
    retirement_rate: EngineValue,
    recharge_population: EngineValue,
    recharge_intensity: EngineValue,
    recovery_rates: StagedRate,
    yield_rates: StagedRate,
    induction_rates: StagedRate,
    displacement_rate: EngineValue,
    last_specified: BTreeMap<StreamName, EngineValue>,
    enabled: BTreeSet<StreamName>,
    sales_intent_fresh: bool,
    retirement_base: Option<Decimal>,
    applied_retirement: Decimal,
    first_retire_step: bool,
    replacement_kind: Option<ReplacementKind>,
}

impl Default for Parameterization {
    fn default() -> Self {
        Self {
            ghg_intensity: EngineValue::zero(Unit::TonsCo2ePerMetricTon),
            energy_intensity: EngineValue::zero(Unit::KilowattHoursPerUnit),
            initial_charges: BTreeMap::new(),
            retirement_rate: EngineValue::zero(Unit::Percent),
            recharge_population: EngineValue::zero(Unit::Percent),
            recharge_intensity: EngineValue::zero(Unit::KilogramsPerUnit),
            recovery_rates: StagedRate::uniform(Decimal::ZERO),
            yield_rates: StagedRate::uniform(Decimal::ZERO),
            induction_rates: StagedRate::uniform(dec!(100)),
            displacement_rate: EngineValue::new(dec!(100), Unit::Percent),
            last_specified: BTreeMap::new(),
            enabled: BTreeSet::new(),
            sales_intent_fresh: false,
            retirement_base: None,
            applied_retirement: Decimal::ZERO,
            first_retire_step: true,
            replacement_kind: None,
        }
    }
}

impl Parameterization {
    // --- intensities ------------------------------------------------------------------------

    pub fn ghg_intensity(&self) -> EngineValue {
        self.ghg_intensity
    }

    pub fn set_ghg_intensity(&mut self, intensity: EngineValue) {
        self.ghg_intensity = intensity;
    }

    pub fn energy_intensity(&self) -> EngineValue {
        self.energy_intensity
    }

    pub fn set_energy_intensity(&mut self, intensity: EngineValue) {
        self.energy_intensity = intensity;
    }

    // --- initial charge ---------------------------------------------------------------------

    pub fn initial_charge(&self, stream: StreamName) -> EngineValue {
        self.initial_charges
            .get(&stream)
            .copied()
            .unwrap_or_else(|| EngineValue::zero(Unit::KilogramsPerUnit))
    }

    pub fn set_initial_charge(&mut self, stream: StreamName, charge: EngineValue) {
        self.initial_charges.insert(stream, charge);
    }

    pub fn initial_charge_streams(&self) -> impl Iterator<Item = (&StreamName, &EngineValue)> {
        self.initial_charges.iter()
    }

    // --- retirement -------------------------------------------------------------------------

    pub fn retirement_rate(&self) -> EngineValue {
        self.retirement_rate
    }

    /// Retirement accumulates: repeated retire policies within a year add up
    /// to one cumulative rate.
    pub fn increase_retirement_rate(&mut self, rate: EngineValue) {
        let total = self.retirement_rate.amount() + rate.amount();
        self.retirement_rate = EngineValue::new(total, Unit::Percent);
    }

    pub fn retirement_base(&self) -> Option<Decimal> {
        self.retirement_base
    }

    pub fn capture_retirement_base(&mut self, population: Decimal) {
        self.retirement_base = Some(population);
        self.first_retire_step = false;
    }

    pub fn is_first_retire_step(&self) -> bool {
        self.first_retire_step
    }

    pub fn applied_retirement(&self) -> Decimal {
        self.applied_retirement
    }

    pub fn set_applied_retirement(&mut self, units: Decimal) {
        self.applied_retirement = units;
    }

    pub fn replacement_kind(&self) -> Option<ReplacementKind> {
        self.replacement_kind
    }

    pub fn set_replacement_kind(&mut self, kind: ReplacementKind) {
        self.replacement_kind = Some(kind);
    }

    // --- recharge ---------------------------------------------------------------------------

    pub fn recharge_population(&self) -> EngineValue {
        self.recharge_population
    }

    /// Recharge population accumulates across recharge policies in a year.
    pub fn increase_recharge_population(&mut self, share: EngineValue) {
        let total = self.recharge_population.amount() + share.amount();
        self.recharge_population = EngineValue::new(total, Unit::Percent);
    }

    pub fn recharge_intensity(&self) -> EngineValue {
        self.recharge_intensity
    }

    pub fn set_recharge_intensity(&mut self, intensity: EngineValue) {
        self.recharge_intensity = intensity;
    }

    // --- recovery / yield / induction / displacement ----------------------------------------

    pub fn recovery_rate(&self, stage: RecoveryStage) -> EngineValue {
        self.recovery_rates.get(stage)
    }

    /// Recovery is additive: a second recovery policy at the same stage in
    /// the same year stacks on top of the first.
    pub fn add_recovery_rate(&mut self, stage: RecoveryStage, rate: EngineValue) {
        let existing = self.recovery_rates.get(stage);
        let combined = if existing.amount() > Decimal::ZERO {
            EngineValue::new(existing.amount() + rate.amount(), Unit::Percent)
        } else {
            EngineValue::new(rate.amount(), Unit::Percent)
        };
        self.recovery_rates.set(stage, combined);
    }

    pub fn yield_rate(&self, stage: RecoveryStage) -> EngineValue {
        self.yield_rates.get(stage)
    }

    /// Yield combines as an averaged efficiency across policies.
    pub fn combine_yield_rate(&mut self, stage: RecoveryStage, rate: EngineValue) {
        let existing = self.yield_rates.get(stage);
        let combined = if existing.amount() > Decimal::ZERO {
            EngineValue::new(
                (existing.amount() + rate.amount()) / Decimal::TWO,
                Unit::Percent,
            )
        } else {
            EngineValue::new(rate.amount(), Unit::Percent)
        };
        self.yield_rates.set(stage, combined);
    }

    pub fn induction_rate(&self, stage: RecoveryStage) -> EngineValue {
        self.induction_rates.get(stage)
    }

    pub fn set_induction_rate(&mut self, stage: RecoveryStage, rate: EngineValue) {
        self.induction_rates
            .set(stage, EngineValue::new(rate.amount(), Unit::Percent));
    }

    pub fn displacement_rate(&self) -> EngineValue {
        self.displacement_rate
    }

    pub fn set_displacement_rate(&mut self, rate: EngineValue) {
        self.displacement_rate = EngineValue::new(rate.amount(), Unit::Percent);
    }

    // --- carry-over intent ------------------------------------------------------------------

    pub fn last_specified(&self, stream: StreamName) -> Option<EngineValue> {
        self.last_specified.get(&stream).copied()
    }

    pub fn set_last_specified(&mut self, stream: StreamName, value: EngineValue) {
        self.last_specified.insert(stream, value);
    }

    pub fn is_sales_intent_fresh(&self) -> bool {
        self.sales_intent_fresh
    }

    pub fn set_sales_intent_fresh(&mut self, fresh: bool) {
        self.sales_intent_fresh = fresh;
    }

    // --- enablement -------------------------------------------------------------------------

    pub fn is_enabled(&self, stream: StreamName) -> bool {
        self.enabled.contains(&stream)
    }

    pub fn mark_enabled(&mut self, stream: StreamName) {
        self.enabled.insert(stream);
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = StreamName> + '_ {
        self.enabled.iter().copied()
    }

    // --- year boundary ----------------------------------------------------------------------

    /// Resets per-step state at a year increment. Yield rates, intensities,
    /// initial charges, enablement and last-specified values persist;
    /// everything a policy must re-activate each year goes back to its
    /// default.
    pub fn reset_for_new_year(&mut self) {
        self.retirement_rate = EngineValue::zero(Unit::Percent);
        self.recharge_population = EngineValue::zero(Unit::Percent);
        self.recharge_intensity = EngineValue::zero(Unit::KilogramsPerUnit);
        self.recovery_rates = StagedRate::uniform(Decimal::ZERO);
        self.induction_rates = StagedRate::uniform(dec!(100));
        self.displacement_rate = EngineValue::new(dec!(100), Unit::Percent);
        self.sales_intent_fresh = false;
        self.retirement_base = None;
        self.applied_retirement = Decimal::ZERO;
        self.first_retire_step = true;
        self.replacement_kind = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(amount: Decimal) -> EngineValue {
        EngineValue::new(amount, Unit::Percent)
    }

    #[test]
    fn recovery_rates_accumulate_additively() {
        let mut params = Parameterization::default();
        params.add_recovery_rate(RecoveryStage::Recharge, pct(dec!(20)));
        params.add_recovery_rate(RecoveryStage::Recharge, pct(dec!(10)));
        assert_eq!(
            params.recovery_rate(RecoveryStage::Recharge).amount(),
            dec!(30)
        );
        // The other stage is untouched.
        assert!(params.recovery_rate(RecoveryStage::Eol).is_zero());
    }

    #[test]
    fn yield_rates_average() {
        let mut params = Parameterization::default();
        params.combine_yield_rate(RecoveryStage::Eol, pct(dec!(90)));
        params.combine_yield_rate(RecoveryStage::Eol, pct(dec!(70)));
        assert_eq!(params.yield_rate(RecoveryStage::Eol).amount(), dec!(80));
    }

    #[test]
    fn year_reset_clears_step_state_but_keeps_yield() {
        let mut params = Parameterization::default();
        params.add_recovery_rate(RecoveryStage::Eol, pct(dec!(25)));
        params.combine_yield_rate(RecoveryStage::Eol, pct(dec!(90)));
        params.increase_retirement_rate(pct(dec!(5)));
        params.capture_retirement_base(dec!(1000));
        params.set_applied_retirement(dec!(50));
        params.set_replacement_kind(ReplacementKind::WithReplacement);
        params.set_sales_intent_fresh(true);

        params.reset_for_new_year();

        assert!(params.recovery_rate(RecoveryStage::Eol).is_zero());
        assert_eq!(params.yield_rate(RecoveryStage::Eol).amount(), dec!(90));
        assert!(params.retirement_rate().is_zero());
        assert_eq!(params.retirement_base(), None);
        assert_eq!(params.applied_retirement(), Decimal::ZERO);
        assert!(params.is_first_retire_step());
        assert_eq!(params.replacement_kind(), None);
        assert!(!params.is_sales_intent_fresh());
    }

    #[test]
    fn enablement_persists_across_year_reset() {
        let mut params = Parameterization::default();
        params.mark_enabled(StreamName::Domestic);
        params.reset_for_new_year();
        assert!(params.is_enabled(StreamName::Domestic));
    }

    #[test]
    fn induction_defaults_to_full() {
        let params = Parameterization::default();
        assert_eq!(params.induction_rate(RecoveryStage::Eol).amount(), dec!(100));
        assert_eq!(
            params.induction_rate(RecoveryStage::Recharge).amount(),
            dec!(100)
        );
    }
}
