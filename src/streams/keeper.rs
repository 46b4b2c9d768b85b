use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::{
    error::{EngineResult, StreamError},
    streams::{
        SalesDistribution, StreamName, UseKey,
        parameterization::{Parameterization, RecoveryStage},
    },
    units::{ConverterContext, EngineValue, Unit, UnitConverter},
};

#[derive(Debug, Clone, Default)]
struct SubstanceRecord {
    values: BTreeMap<StreamName, EngineValue>,
    params: Parameterization,
}

impl SubstanceRecord {
    fn new() -> Self {
        let values = StreamName::iter()
            .filter(|name| !name.is_derived())
            .map(|name| (name, EngineValue::zero(name.base_unit())))
            .collect();
        Self {
            values,
            params: Parameterization::default(),
        }
    }

    fn value(&self, name: StreamName) -> EngineValue {
        self.values
            .get(&name)
            .copied()
            .unwrap_or_else(|| EngineValue::zero(name.base_unit()))
    }
}

// ================================================================================================
// Stream keeper
// ================================================================================================

/// The per-(application, substance) state store.
///
/// Owns every stream value and parameterization in a scenario. Writes into
/// the sales family route through recycling-aware distribution math; reads
/// of the derived streams (`sales`, `recycle`) sum their components fresh.
/// Iteration order over substances is the key order, so result rows come out
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct StreamKeeper {
    converter: UnitConverter,
    records: BTreeMap<UseKey, SubstanceRecord>,
}

impl StreamKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    // --- substance lifecycle ----------------------------------------------------------------

    /// Lazily creates the record for a substance, streams zeroed in their
    /// canonical units.
    pub fn ensure_substance(&mut self, key: &UseKey) {
        self.records
            .entry(key.clone())
            .or_insert_with(SubstanceRecord::new);
    }

    pub fn has_substance(&self, key: &UseKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &UseKey> {
        self.records.keys()
    }

    fn record(&self, key: &UseKey, operation: &str) -> EngineResult<&SubstanceRecord> {
        self.records
            .get(key)
            .ok_or_else(|| missing(key, operation).into())
    }

    fn record_mut(&mut self, key: &UseKey, operation: &str) -> EngineResult<&mut SubstanceRecord> {
        self.records
            .get_mut(key)
            .ok_or_else(|| missing(key, operation).into())
    }

    pub fn params(&self, key: &UseKey, operation: &str) -> EngineResult<&Parameterization> {
        Ok(&self.record(key, operation)?.params)
    }

    pub fn params_mut(
        &mut self,
        key: &UseKey,
        operation: &str,
    ) -> EngineResult<&mut Parameterization> {
        Ok(&mut self.record_mut(key, operation)?.params)
    }

    // --- reads ------------------------------------------------------------------------------

    /// Reads a stream. `sales` and `recycle` are summed fresh from their
    /// components; everything else comes from the stored map.
    pub fn get_stream(&self, key: &UseKey, name: StreamName) -> EngineResult<EngineValue> {
        let record = self.record(key, "get stream")?;
        let value = match name {
            StreamName::Sales => {
                let kg = record.value(StreamName::Domestic).amount()
                    + record.value(StreamName::Import).amount()
                    + self.recycle_total(record);
                EngineValue::new(kg, Unit::Kilograms)
            }
            StreamName::Recycle => EngineValue::new(self.recycle_total(record), Unit::Kilograms),
            other => record.value(other),
        };
        Ok(value)
    }

    fn recycle_total(&self, record: &SubstanceRecord) -> Decimal {
        record.value(StreamName::RecycleRecharge).amount()
            + record.value(StreamName::RecycleEol).amount()
    }

    // --- writes -----------------------------------------------------------------------------

    /// Routes a write into the keeper.
    ///
    /// With `subtract_recycling` set (the normal case), sales-family writes
    /// are interpreted as total demand and the recycled supply is netted out
    /// before the virgin remainder is stored. With it cleared, domestic and
    /// import are written verbatim (the recalculation pipeline uses this to
    /// place already-netted virgin volumes).
    pub fn set_stream(
        &mut self,
        key: &UseKey,
        name: StreamName,
        value: &EngineValue,
        subtract_recycling: bool,
    ) -> EngineResult<()> {
        debug!(key = %key, stream = %name, value = %value, subtract_recycling, "set stream");

        if name.is_sales_substream()
            && !value.is_zero()
            && !self.params(key, "set stream")?.is_enabled(name)
        {
            warn!(key = %key, stream = %name, reason = "enable-required", "write rejected");
            return Err(StreamError::EnableRequired {
                application: key.application().to_string(),
                substance: key.substance().to_string(),
                stream: name.to_string(),
            }
            .into());
        }

        if !subtract_recycling && matches!(name, StreamName::Domestic | StreamName::Import) {
            let kg = self.sales_family_kg(key, name, value)?;
            return self.store(key, name, kg);
        }

        match name {
            StreamName::Sales => {
                let kg = self.sales_family_kg(key, StreamName::Sales, value)?;
                let record = self.record(key, "set stream")?;
                let recycled = self.recycle_total(record);
                let virgin = (kg - recycled).max(Decimal::ZERO);
                let distribution = self.get_distribution(key, false)?;
                self.store(key, StreamName::Domestic, virgin * distribution.domestic_fraction())?;
                self.store(key, StreamName::Import, virgin * distribution.import_fraction())?;
            }
            StreamName::Domestic | StreamName::Import => {
                let kg = self.sales_family_kg(key, name, value)?;
                if kg.is_zero() {
                    self.store(key, name, Decimal::ZERO)?;
                } else {
                    let distribution = self.get_distribution(key, false)?;
                    let record = self.record(key, "set stream")?;
                    let recycled_share =
                        self.recycle_total(record) * distribution.fraction_of(name);
                    let net = (kg - recycled_share).max(Decimal::ZERO);
                    self.store(key, name, net)?;
                }
            }
            StreamName::Recycle => {
                let ctx = self.conversion_context(key, StreamName::Recycle)?;
                let kg = self
                    .converter
                    .convert(value, Unit::Kilograms, &ctx)?
                    .amount();
                let record = self.record(key, "set stream")?;
                let recharge = record.value(StreamName::RecycleRecharge).amount();
                let eol = record.value(StreamName::RecycleEol).amount();
                let total = recharge + eol;
                let (recharge_share, eol_share) = if total > Decimal::ZERO {
                    (recharge / total, eol / total)
                } else {
                    (dec!(0.5), dec!(0.5))
                };
                self.store(key, StreamName::RecycleRecharge, kg * recharge_share)?;
                self.store(key, StreamName::RecycleEol, kg * eol_share)?;
            }
            other => {
                let ctx = self.conversion_context(key, other)?;
                let converted = self.converter.convert(value, other.base_unit(), &ctx)?;
                self.store(key, other, converted.amount())?;
            }
        }
        Ok(())
    }

    /// Converts a sales-family amount to kg. Unit-based amounts go through
    /// the amortized initial charge and fail when that charge is zero, since
    /// the requested population could not be given any volume at all.
    fn sales_family_kg(
        &self,
        key: &UseKey,
        name: StreamName,
        value: &EngineValue,
    ) -> EngineResult<Decimal> {
        if value.unit().rate_base() == Unit::Units {
            let charge = self.amortized_initial_charge(key)?;
            if charge.is_zero() {
                return Err(StreamError::ZeroInitialCharge {
                    application: key.application().to_string(),
                    substance: key.substance().to_string(),
                }
                .into());
            }
            return Ok(value.amount() * charge);
        }
        let ctx = self.conversion_context(key, name)?;
        Ok(self.converter.convert(value, Unit::Kilograms, &ctx)?.amount())
    }

    fn store(&mut self, key: &UseKey, name: StreamName, amount: Decimal) -> EngineResult<()> {
        debug_assert!(!name.is_derived(), "derived streams are never stored");
        let record = self.record_mut(key, "set stream")?;
        record
            .values
            .insert(name, EngineValue::new(amount, name.base_unit()));
        Ok(())
    }

    // --- conversion support -----------------------------------------------------------------

    /// Context for converting into `stream`: `%` resolves against the
    /// stream's current magnitude, population against the start-of-year
    /// equipment count.
    pub fn conversion_context(
        &self,
        key: &UseKey,
        stream: StreamName,
    ) -> EngineResult<ConverterContext> {
        let record = self.record(key, "conversion context")?;
        let population = record.value(StreamName::PriorEquipment).amount();
        let volume = match stream {
            StreamName::Sales => {
                record.value(StreamName::Domestic).amount()
                    + record.value(StreamName::Import).amount()
                    + self.recycle_total(record)
            }
            StreamName::Recycle => self.recycle_total(record),
            other => record.value(other).amount(),
        };
        Ok(ConverterContext::new()
            .with_population(population)
            .with_amortized_unit_volume(self.amortized_initial_charge(key)?)
            .with_volume(volume)
            .with_ghg_intensity(record.params.ghg_intensity())
            .with_energy_intensity(record.params.energy_intensity()))
    }

    /// kg of substance one unit of new equipment carries, averaged over the
    /// virgin substreams by their current distribution.
    pub fn amortized_initial_charge(&self, key: &UseKey) -> EngineResult<Decimal> {
        let record = self.record(key, "amortized initial charge")?;
        let domestic = record.params.initial_charge(StreamName::Domestic).amount();
        let import = record.params.initial_charge(StreamName::Import).amount();

        match self.get_distribution(key, false) {
            Ok(distribution) => Ok(domestic * distribution.domestic_fraction()
                + import * distribution.import_fraction()),
            // Nothing enabled yet: fall back to the plain mean of the
            // charges that have been specified.
            Err(_) => {
                let specified: Vec<Decimal> = [domestic, import]
                    .into_iter()
                    .filter(|charge| !charge.is_zero())
                    .collect();
                if specified.is_empty() {
                    Ok(Decimal::ZERO)
                } else {
                    Ok(specified.iter().sum::<Decimal>() / Decimal::from(specified.len() as u32))
                }
            }
        }
    }

    pub fn get_distribution(
        &self,
        key: &UseKey,
        include_exports: bool,
    ) -> EngineResult<SalesDistribution> {
        let record = self.record(key, "get distribution")?;
        SalesDistribution::compute(
            key,
            record.value(StreamName::Domestic).amount(),
            record.value(StreamName::Import).amount(),
            record.value(StreamName::Export).amount(),
            |stream| record.params.is_enabled(stream),
            include_exports,
        )
    }

    // --- enablement -------------------------------------------------------------------------

    pub fn mark_stream_enabled(&mut self, key: &UseKey, name: StreamName) -> EngineResult<()> {
        self.record_mut(key, "enable stream")?.params.mark_enabled(name);
        Ok(())
    }

    pub fn has_stream_been_enabled(&self, key: &UseKey, name: StreamName) -> EngineResult<bool> {
        Ok(self.record(key, "enable check")?.params.is_enabled(name))
    }

    // --- parameterization passthroughs ------------------------------------------------------

    pub fn set_initial_charge(
        &mut self,
        key: &UseKey,
        stream: StreamName,
        charge: EngineValue,
    ) -> EngineResult<()> {
        self.record_mut(key, "set initial charge")?
            .params
            .set_initial_charge(stream, charge);
        Ok(())
    }

    pub fn get_initial_charge(&self, key: &UseKey, stream: StreamName) -> EngineResult<EngineValue> {
        Ok(self.record(key, "get initial charge")?.params.initial_charge(stream))
    }

    /// Stacks a recovery rate onto the stage's existing rate (additive
    /// within the year).
    pub fn set_recovery_rate(
        &mut self,
        key: &UseKey,
        rate: EngineValue,
        stage: RecoveryStage,
    ) -> EngineResult<()> {
        self.record_mut(key, "set recovery rate")?
            .params
            .add_recovery_rate(stage, rate);
        Ok(())
    }

    /// Folds a yield rate into the stage's existing rate (averaged).
    pub fn set_yield_rate(
        &mut self,
        key: &UseKey,
        rate: EngineValue,
        stage: RecoveryStage,
    ) -> EngineResult<()> {
        self.record_mut(key, "set yield rate")?
            .params
            .combine_yield_rate(stage, rate);
        Ok(())
    }

    pub fn set_last_specified(
        &mut self,
        key: &UseKey,
        stream: StreamName,
        value: EngineValue,
    ) -> EngineResult<()> {
        self.record_mut(key, "set last specified")?
            .params
            .set_last_specified(stream, value);
        Ok(())
    }

    pub fn get_last_specified(
        &self,
        key: &UseKey,
        stream: StreamName,
    ) -> EngineResult<Option<EngineValue>> {
        Ok(self.record(key, "get last specified")?.params.last_specified(stream))
    }

    // --- year boundary ----------------------------------------------------------------------

    /// Advances every substance across the year boundary: the equipment and
    /// retirement cursors snapshot, the per-year derived streams zero out,
    /// and per-step parameterization state resets.
    pub fn increment_year(&mut self) {
        for (key, record) in self.records.iter_mut() {
            debug!(key = %key, "year increment");
            let equipment = record.value(StreamName::Equipment);
            record.values.insert(
                StreamName::PriorEquipment,
                EngineValue::new(equipment.amount(), Unit::Units),
            );
            let retired = record.value(StreamName::Retired);
            record.values.insert(
                StreamName::PriorRetired,
                EngineValue::new(retired.amount(), Unit::Units),
            );
            for reset in [
                StreamName::NewEquipment,
                StreamName::ImplicitRecharge,
                StreamName::RechargeEmissions,
                StreamName::EolEmissions,
                StreamName::InitialChargeEmissions,
            ] {
                record
                    .values
                    .insert(reset, EngineValue::zero(reset.base_unit()));
            }
            record.params.reset_for_new_year();
        }
    }
}

fn missing(key: &UseKey, operation: &str) -> StreamError {
    StreamError::MissingSubstance {
        application: key.application().to_string(),
        substance: key.substance().to_string(),
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> UseKey {
        UseKey::new("dom refrig", "HFC-134a")
    }

    fn kg(amount: Decimal) -> EngineValue {
        EngineValue::new(amount, Unit::Kilograms)
    }

    /// A keeper with both virgin streams enabled and a 1 kg/unit charge.
    fn keeper() -> StreamKeeper {
        let mut keeper = StreamKeeper::new();
        keeper.ensure_substance(&key());
        keeper.mark_stream_enabled(&key(), StreamName::Domestic).unwrap();
        keeper.mark_stream_enabled(&key(), StreamName::Import).unwrap();
        keeper
            .set_initial_charge(
                &key(),
                StreamName::Domestic,
                EngineValue::new(Decimal::ONE, Unit::KilogramsPerUnit),
            )
            .unwrap();
        keeper
            .set_initial_charge(
                &key(),
                StreamName::Import,
                EngineValue::new(Decimal::ONE, Unit::KilogramsPerUnit),
            )
            .unwrap();
        keeper
    }

    #[test]
    fn unknown_substance_read_fails() {
        let keeper = StreamKeeper::new();
        assert!(keeper.get_stream(&key(), StreamName::Domestic).is_err());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::Domestic, &kg(dec!(120)), true)
            .unwrap();
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Domestic).unwrap().amount(),
            dec!(120)
        );
    }

    #[test]
    fn non_zero_write_requires_enable() {
        let mut keeper = StreamKeeper::new();
        keeper.ensure_substance(&key());
        let err = keeper.set_stream(&key(), StreamName::Domestic, &kg(dec!(5)), true);
        assert!(err.is_err());
        // Zero is always allowed.
        assert!(keeper
            .set_stream(&key(), StreamName::Domestic, &kg(Decimal::ZERO), true)
            .is_ok());
    }

    #[test]
    fn sales_write_splits_across_distribution() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::Domestic, &kg(dec!(75)), true)
            .unwrap();
        keeper
            .set_stream(&key(), StreamName::Import, &kg(dec!(25)), true)
            .unwrap();

        keeper
            .set_stream(&key(), StreamName::Sales, &kg(dec!(200)), true)
            .unwrap();

        assert_eq!(
            keeper.get_stream(&key(), StreamName::Domestic).unwrap().amount(),
            dec!(150)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Import).unwrap().amount(),
            dec!(50)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Sales).unwrap().amount(),
            dec!(200)
        );
    }

    #[test]
    fn sales_write_nets_out_recycled_supply() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::RecycleRecharge, &kg(dec!(40)), true)
            .unwrap();
        keeper
            .set_stream(&key(), StreamName::Sales, &kg(dec!(100)), true)
            .unwrap();

        // 40 kg come from recycling, the virgin remainder splits equally.
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Domestic).unwrap().amount(),
            dec!(30)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Import).unwrap().amount(),
            dec!(30)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Sales).unwrap().amount(),
            dec!(100)
        );
    }

    #[test]
    fn sales_never_goes_negative_when_recycle_exceeds_demand() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::RecycleEol, &kg(dec!(500)), true)
            .unwrap();
        keeper
            .set_stream(&key(), StreamName::Sales, &kg(dec!(100)), true)
            .unwrap();
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Domestic).unwrap().amount(),
            Decimal::ZERO
        );
    }

    #[test]
    fn recycle_write_splits_between_stages() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::RecycleRecharge, &kg(dec!(30)), true)
            .unwrap();
        keeper
            .set_stream(&key(), StreamName::RecycleEol, &kg(dec!(10)), true)
            .unwrap();

        keeper
            .set_stream(&key(), StreamName::Recycle, &kg(dec!(80)), true)
            .unwrap();

        assert_eq!(
            keeper
                .get_stream(&key(), StreamName::RecycleRecharge)
                .unwrap()
                .amount(),
            dec!(60)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::RecycleEol).unwrap().amount(),
            dec!(20)
        );
    }

    #[test]
    fn recycle_write_with_no_prior_amounts_splits_evenly() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::Recycle, &kg(dec!(80)), true)
            .unwrap();
        assert_eq!(
            keeper
                .get_stream(&key(), StreamName::RecycleRecharge)
                .unwrap()
                .amount(),
            dec!(40)
        );
        assert_eq!(
            keeper.get_stream(&key(), StreamName::RecycleEol).unwrap().amount(),
            dec!(40)
        );
    }

    #[test]
    fn unit_based_sales_requires_initial_charge() {
        let mut keeper = StreamKeeper::new();
        keeper.ensure_substance(&key());
        keeper.mark_stream_enabled(&key(), StreamName::Domestic).unwrap();
        let value = EngineValue::new(dec!(100), Unit::Units);
        let err = keeper.set_stream(&key(), StreamName::Sales, &value, true);
        assert!(matches!(
            err,
            Err(crate::error::EngineError::Stream(
                StreamError::ZeroInitialCharge { .. }
            ))
        ));
    }

    #[test]
    fn unit_based_sales_converts_through_the_charge() {
        let mut keeper = keeper();
        let value = EngineValue::new(dec!(100), Unit::Units);
        keeper
            .set_stream(&key(), StreamName::Sales, &value, true)
            .unwrap();
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Sales).unwrap().amount(),
            dec!(100)
        );
    }

    #[test]
    fn direct_write_skips_recycling_subtraction() {
        let mut keeper = keeper();
        keeper
            .set_stream(&key(), StreamName::RecycleRecharge, &kg(dec!(40)), true)
            .unwrap();
        keeper
            .set_stream(&key(), StreamName::Domestic, &kg(dec!(100)), false)
            .unwrap();
        assert_eq!(
            keeper.get_stream(&key(), StreamName::Domestic).unwrap().amount(),
            dec!(100)
        );
    }

    #[test]
    fn year_increment_snapshots_population_and_resets_step_state() {
        let mut keeper = keeper();
        let units = EngineValue::new(dec!(500), Unit::Units);
        keeper
            .set_stream(&key(), StreamName::Equipment, &units, true)
            .unwrap();
        keeper
            .set_recovery_rate(
                &key(),
                EngineValue::new(dec!(20), Unit::Percent),
                RecoveryStage::Recharge,
            )
            .unwrap();

        keeper.increment_year();

        assert_eq!(
            keeper
                .get_stream(&key(), StreamName::PriorEquipment)
                .unwrap()
                .amount(),
            dec!(500)
        );
        assert!(keeper
            .params(&key(), "test")
            .unwrap()
            .recovery_rate(RecoveryStage::Recharge)
            .is_zero());
    }
}
