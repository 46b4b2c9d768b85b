use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{EngineResult, OperationError, ScopeError, SimError, StreamError},
    random::TrialSampler,
    recalc::{self, RecalcKit, RecalcOperationBuilder, RecalcStrategy},
    scope::{RESERVED_YEAR_ABSOLUTE, RESERVED_YEARS_ELAPSED, Scope, VariableManager},
    streams::{
        RecoveryStage, StreamKeeper, StreamName, UseKey, parameterization::ReplacementKind,
    },
    units::{EngineValue, Unit, UnitConverter},
};

// ================================================================================================
// Year gating
// ================================================================================================

/// An optional inclusive year window an operation is active in.
///
/// `None` on either side leaves that side open; an operation with no matcher
/// at all applies every year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearMatcher {
    pub start: Option<i32>,
    pub end: Option<i32>,
}

impl YearMatcher {
    pub fn between(start: i32, end: i32) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn single(year: i32) -> Self {
        Self::between(year, year)
    }

    pub fn from_year(start: i32) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn matches(&self, year: i32) -> bool {
        self.start.is_none_or(|start| year >= start) && self.end.is_none_or(|end| year <= end)
    }
}

/// How a clipped or replaced volume carries over to the target substance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplaceMode {
    /// The same substance mass moves.
    Volume,
    /// The equipment population the volume represents moves; the mass is
    /// re-charged at the target's initial charge.
    Units,
    /// Alias of a raw-mass move at the point of writing.
    Equivalent,
}

// ================================================================================================
// Engine façade
// ================================================================================================

/// Single-scenario orchestrator.
///
/// Owns the stream keeper, converter, variables and year cursor for one
/// scenario evaluation. Not reentrant; parallelism happens across engine
/// instances, never within one.
#[derive(Debug, Clone)]
pub struct Engine {
    start_year: i32,
    end_year: i32,
    current_year: i32,
    trial_number: u64,
    scope: Scope,
    keeper: StreamKeeper,
    converter: UnitConverter,
    variables: VariableManager,
    sampler: TrialSampler,
}

impl Engine {
    pub fn new(start_year: i32, end_year: i32) -> EngineResult<Self> {
        if start_year > end_year {
            return Err(SimError::InvalidYearRange {
                start: start_year,
                end: end_year,
            }
            .into());
        }
        Ok(Self {
            start_year,
            end_year,
            current_year: start_year,
            trial_number: 0,
            scope: Scope::new(),
            keeper: StreamKeeper::new(),
            converter: UnitConverter::new(),
            variables: VariableManager::new(),
            sampler: TrialSampler::new(0, 0),
        })
    }

    /// Binds the engine to a trial for deterministic sampling.
    pub fn set_trial(&mut self, seed: u64, trial: u64) {
        self.trial_number = trial;
        self.sampler = TrialSampler::new(seed, trial);
    }

    pub fn trial_number(&self) -> u64 {
        self.trial_number
    }

    // --- year cursor ------------------------------------------------------------------------

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn years_elapsed(&self) -> i32 {
        self.current_year - self.start_year
    }

    /// True when the current year falls inside the matcher (or there is
    /// none). Operations check this before doing any work.
    pub fn is_in_range(&self, during: Option<&YearMatcher>) -> bool {
        during.is_none_or(|matcher| matcher.matches(self.current_year))
    }

    /// Advances the year cursor and rolls every substance across the year
    /// boundary.
    pub fn increment_year(&mut self) -> EngineResult<()> {
        if self.current_year > self.end_year {
            return Err(SimError::YearExhausted {
                current: self.current_year,
                end: self.end_year,
            }
            .into());
        }
        self.current_year += 1;
        self.keeper.increment_year();
        debug!(year = self.current_year, "year advanced");
        Ok(())
    }

    // --- scope ------------------------------------------------------------------------------

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn set_stanza(&mut self, stanza: &str) {
        self.scope = self.scope.with_stanza(stanza);
        self.variables = VariableManager::new();
    }

    pub fn set_application(&mut self, application: &str) {
        self.scope = self.scope.with_application(application);
    }

    /// Enters a substance, lazily creating its record.
    pub fn set_substance(&mut self, substance: &str) -> EngineResult<()> {
        self.scope = self.scope.with_substance(substance);
        let key = self.scope.use_key("substance block")?;
        self.keeper.ensure_substance(&key);
        Ok(())
    }

    fn key_for(&self, operation: &str) -> EngineResult<UseKey> {
        self.scope.use_key(operation)
    }

    pub fn keeper(&self) -> &StreamKeeper {
        &self.keeper
    }

    // --- reads ------------------------------------------------------------------------------

    pub fn get_stream(&self, name: StreamName) -> EngineResult<EngineValue> {
        let key = self.key_for("get stream")?;
        self.keeper.get_stream(&key, name)
    }

    /// Cross-substance read with an optional target unit, converted under
    /// the *other* substance's state.
    pub fn get_stream_indirect(
        &self,
        name: StreamName,
        application: &str,
        substance: &str,
        conversion: Option<Unit>,
    ) -> EngineResult<EngineValue> {
        let key = UseKey::new(application, substance);
        let value = self.keeper.get_stream(&key, name)?;
        match conversion {
            Some(unit) => {
                let ctx = self.keeper.conversion_context(&key, name)?;
                self.converter.convert(&value, unit, &ctx)
            }
            None => Ok(value),
        }
    }

    // --- variables --------------------------------------------------------------------------

    pub fn define_variable(&mut self, name: &str, value: EngineValue) -> EngineResult<()> {
        self.variables.define(name, value)
    }

    pub fn set_variable(&mut self, name: &str, value: EngineValue) -> EngineResult<()> {
        self.variables.set(name, value)
    }

    pub fn get_variable(&self, name: &str) -> EngineResult<EngineValue> {
        match name {
            RESERVED_YEARS_ELAPSED => Ok(EngineValue::new(
                Decimal::from(self.years_elapsed()),
                Unit::Years,
            )),
            RESERVED_YEAR_ABSOLUTE => Ok(EngineValue::new(
                Decimal::from(self.current_year),
                Unit::Years,
            )),
            other => self
                .variables
                .get(other)
                .ok_or_else(|| ScopeError::UnknownVariable(other.to_string()).into()),
        }
    }

    pub fn draw_uniform(
        &mut self,
        low: Decimal,
        high: Decimal,
        unit: Unit,
    ) -> EngineResult<EngineValue> {
        self.sampler.draw_uniform(low, high, unit)
    }

    pub fn draw_normal(
        &mut self,
        mean: Decimal,
        std_dev: Decimal,
        unit: Unit,
    ) -> EngineResult<EngineValue> {
        self.sampler.draw_normal(mean, std_dev, unit)
    }

    // --- mutating entry points --------------------------------------------------------------

    pub fn enable_stream(&mut self, stream: StreamName) -> EngineResult<()> {
        let key = self.key_for("enable")?;
        self.keeper.mark_stream_enabled(&key, stream)
    }

    pub fn set_initial_charge(
        &mut self,
        stream: StreamName,
        charge: &EngineValue,
    ) -> EngineResult<()> {
        let key = self.key_for("initial charge")?;
        self.keeper.set_initial_charge(&key, stream, *charge)
    }

    /// Sets a stream under full engine semantics: unit-specified sales pick
    /// up their implicit recharge, carry-over intent is recorded, and the
    /// dependent streams recalculate.
    #[tracing::instrument(skip(self, value), fields(stream = %stream, value = %value))]
    pub fn set_stream(&mut self, stream: StreamName, value: &EngineValue) -> EngineResult<()> {
        let key = self.key_for("set")?;
        self.set_stream_for_key(&key, stream, value)
    }

    fn set_stream_for_key(
        &mut self,
        key: &UseKey,
        stream: StreamName,
        value: &EngineValue,
    ) -> EngineResult<()> {
        let unit_based_sales =
            stream == StreamName::Sales && value.unit().rate_base() == Unit::Units;

        if unit_based_sales {
            let charge = self.keeper.amortized_initial_charge(key)?;
            if charge.is_zero() {
                warn!(key = %key, reason = "zero-initial-charge", "unit-based sales rejected");
                return Err(StreamError::ZeroInitialCharge {
                    application: key.application().to_string(),
                    substance: key.substance().to_string(),
                }
                .into());
            }
            let implicit = self.explicit_recharge_kg(key)?;
            self.keeper.set_stream(
                key,
                StreamName::ImplicitRecharge,
                &EngineValue::new(implicit, Unit::Kilograms),
                true,
            )?;
            let total = value.amount() * charge + implicit;
            self.keeper.set_stream(
                key,
                StreamName::Sales,
                &EngineValue::new(total, Unit::Kilograms),
                true,
            )?;
        } else {
            self.keeper.set_stream(key, stream, value, true)?;
        }

        self.keeper.set_last_specified(key, stream, *value)?;

        if matches!(
            stream,
            StreamName::Sales | StreamName::Domestic | StreamName::Import | StreamName::Export
        ) {
            self.keeper
                .params_mut(key, "set")?
                .set_sales_intent_fresh(true);
            let pipeline = RecalcOperationBuilder::for_key(key.clone())
                .recalc_population_change()
                .recalc_consumption()
                .build();
            self.run_pipeline(pipeline)?;
        }
        Ok(())
    }

    /// Shifts a stream by a delta expressed in any convertible unit.
    pub fn change_stream(&mut self, stream: StreamName, delta: &EngineValue) -> EngineResult<()> {
        let key = self.key_for("change")?;
        self.change_stream_for_key(&key, stream, delta)
    }

    fn change_stream_for_key(
        &mut self,
        key: &UseKey,
        stream: StreamName,
        delta: &EngineValue,
    ) -> EngineResult<()> {
        let current = self.keeper.get_stream(key, stream)?;
        let ctx = self.keeper.conversion_context(key, stream)?;
        let delta_converted = self.converter.convert(delta, stream.base_unit(), &ctx)?;
        let next = (current.amount() + delta_converted.amount()).max(Decimal::ZERO);
        // The next value derives from the stored (already netted) one, so
        // substream writes go in verbatim.
        self.keeper.set_stream(
            key,
            stream,
            &EngineValue::new(next, stream.base_unit()),
            subtract_recycling_for(stream),
        )?;

        if matches!(
            stream,
            StreamName::Sales | StreamName::Domestic | StreamName::Import | StreamName::Export
        ) {
            let pipeline = RecalcOperationBuilder::for_key(key.clone())
                .recalc_population_change()
                .recalc_consumption()
                .build();
            self.run_pipeline(pipeline)?;
        }
        Ok(())
    }

    /// Clips a stream from above, optionally displacing the clipped volume
    /// into another substance.
    pub fn cap_stream(
        &mut self,
        stream: StreamName,
        limit: &EngineValue,
        displacing: Option<(&str, DisplaceMode)>,
    ) -> EngineResult<()> {
        self.limit_stream(stream, limit, displacing, true)
    }

    /// Raises a stream from below, optionally pulling the added volume out
    /// of another substance.
    pub fn floor_stream(
        &mut self,
        stream: StreamName,
        limit: &EngineValue,
        displacing: Option<(&str, DisplaceMode)>,
    ) -> EngineResult<()> {
        self.limit_stream(stream, limit, displacing, false)
    }

    fn limit_stream(
        &mut self,
        stream: StreamName,
        limit: &EngineValue,
        displacing: Option<(&str, DisplaceMode)>,
        is_cap: bool,
    ) -> EngineResult<()> {
        let key = self.key_for(if is_cap { "cap" } else { "floor" })?;
        let current = self.keeper.get_stream(&key, stream)?;
        let ctx = self.keeper.conversion_context(&key, stream)?;
        let limit_converted = self.converter.convert(limit, stream.base_unit(), &ctx)?;

        let violated = if is_cap {
            current.amount() > limit_converted.amount()
        } else {
            current.amount() < limit_converted.amount()
        };
        if !violated {
            return Ok(());
        }

        let clipped = current.amount() - limit_converted.amount();
        self.keeper
            .set_stream(&key, stream, &limit_converted, subtract_recycling_for(stream))?;
        let pipeline = RecalcOperationBuilder::for_key(key.clone())
            .recalc_population_change()
            .recalc_consumption()
            .build();
        self.run_pipeline(pipeline)?;

        if let Some((destination, mode)) = displacing {
            // A cap frees volume into the target; a floor draws it out.
            self.displace(&key, stream, destination, mode, clipped)?;
        }
        Ok(())
    }

    fn displace(
        &mut self,
        source: &UseKey,
        stream: StreamName,
        destination: &str,
        mode: DisplaceMode,
        delta_kg: Decimal,
    ) -> EngineResult<()> {
        let dest_key = UseKey::new(source.application(), destination);
        let moved_kg = match mode {
            DisplaceMode::Volume | DisplaceMode::Equivalent => delta_kg,
            DisplaceMode::Units => {
                let source_charge = self.keeper.amortized_initial_charge(source)?;
                let dest_charge = self.keeper.amortized_initial_charge(&dest_key)?;
                if source_charge.is_zero() {
                    Decimal::ZERO
                } else {
                    delta_kg / source_charge * dest_charge
                }
            }
        };

        let dest_current = self.keeper.get_stream(&dest_key, stream)?;
        let next = (dest_current.amount() + moved_kg).max(Decimal::ZERO);
        self.keeper.set_stream(
            &dest_key,
            stream,
            &EngineValue::new(next, stream.base_unit()),
            subtract_recycling_for(stream),
        )?;
        let pipeline = RecalcOperationBuilder::for_key(dest_key)
            .recalc_population_change()
            .recalc_consumption()
            .build();
        self.run_pipeline(pipeline)
    }

    /// Retires a share of the installed base, optionally replacing the lost
    /// equipment with fresh sales demand.
    #[tracing::instrument(skip(self, rate), fields(rate = %rate, with_replacement))]
    pub fn retire(&mut self, rate: &EngineValue, with_replacement: bool) -> EngineResult<()> {
        let key = self.key_for("retire")?;
        percent_guard(rate, "retire")?;

        {
            let params = self.keeper.params_mut(&key, "retire")?;
            let requested = if with_replacement {
                ReplacementKind::WithReplacement
            } else {
                ReplacementKind::WithoutReplacement
            };
            match params.replacement_kind() {
                Some(existing) if existing != requested => {
                    warn!(key = %key, reason = "mixed-replacement", "retire rejected");
                    return Err(OperationError::MixedReplacement {
                        application: key.application().to_string(),
                        substance: key.substance().to_string(),
                    }
                    .into());
                }
                _ => params.set_replacement_kind(requested),
            }
            params.increase_retirement_rate(EngineValue::new(rate.amount(), Unit::Percent));
        }

        let pipeline = RecalcOperationBuilder::for_key(key.clone())
            .recalc_retire()
            .recalc_consumption()
            .build();

        if with_replacement {
            let before = self.keeper.get_stream(&key, StreamName::Equipment)?.amount();
            self.run_pipeline(pipeline)?;
            let after = self.keeper.get_stream(&key, StreamName::Equipment)?.amount();
            let reduction = before - after;
            if reduction > Decimal::ZERO {
                let unit_based = self
                    .keeper
                    .get_last_specified(&key, StreamName::Sales)?
                    .is_some_and(|value| value.unit().rate_base() == Unit::Units);
                let replacement = if unit_based {
                    EngineValue::new(reduction, Unit::Units)
                } else {
                    let charge = self.keeper.amortized_initial_charge(&key)?;
                    EngineValue::new(reduction * charge, Unit::Kilograms)
                };
                // Replacement raises sales and consumption only; the
                // population already reflects the retirement.
                let ctx = self.keeper.conversion_context(&key, StreamName::Sales)?;
                let replacement_kg = self
                    .converter
                    .convert(&replacement, Unit::Kilograms, &ctx)?
                    .amount();
                let current = self.keeper.get_stream(&key, StreamName::Sales)?.amount();
                self.keeper.set_stream(
                    &key,
                    StreamName::Sales,
                    &EngineValue::new(current + replacement_kg, Unit::Kilograms),
                    true,
                )?;
                let pipeline = RecalcOperationBuilder::for_key(key.clone())
                    .recalc_consumption()
                    .build();
                self.run_pipeline(pipeline)?;
            }
        } else {
            self.run_pipeline(pipeline)?;
        }
        Ok(())
    }

    /// Activates recovery at a lifecycle stage: recovery stacks additively,
    /// yield folds in as an averaged efficiency.
    pub fn recycle(
        &mut self,
        recovery: &EngineValue,
        yield_rate: &EngineValue,
        stage: RecoveryStage,
        displacement: Option<&EngineValue>,
    ) -> EngineResult<()> {
        let key = self.key_for("recycle")?;
        percent_guard(recovery, "recycle")?;
        percent_guard(yield_rate, "recycle")?;

        self.keeper
            .set_recovery_rate(&key, EngineValue::new(recovery.amount(), Unit::Percent), stage)?;
        self.keeper
            .set_yield_rate(&key, EngineValue::new(yield_rate.amount(), Unit::Percent), stage)?;
        if let Some(rate) = displacement {
            percent_guard(rate, "recycle")?;
            self.keeper
                .params_mut(&key, "recycle")?
                .set_displacement_rate(*rate);
        }

        let pipeline = RecalcOperationBuilder::for_key(key)
            .recalc_sales()
            .recalc_population_change()
            .recalc_consumption()
            .build();
        self.run_pipeline(pipeline)
    }

    /// Accumulates servicing parameters for the year and recalculates.
    ///
    /// When sales were last specified in units and nothing fresh has been
    /// set this year, the last unit-based value is re-applied so that the
    /// implicit recharge stacks on top of the carried-over demand.
    pub fn recharge(
        &mut self,
        population: &EngineValue,
        intensity: &EngineValue,
    ) -> EngineResult<()> {
        let key = self.key_for("recharge")?;
        percent_guard(population, "recharge")?;

        {
            let params = self.keeper.params_mut(&key, "recharge")?;
            params.increase_recharge_population(EngineValue::new(
                population.amount(),
                Unit::Percent,
            ));
            params.set_recharge_intensity(*intensity);
        }

        let carried_over = {
            let params = self.keeper.params(&key, "recharge")?;
            let unit_based = params
                .last_specified(StreamName::Sales)
                .is_some_and(|value| value.unit().rate_base() == Unit::Units);
            unit_based && !params.is_sales_intent_fresh()
        };

        if carried_over {
            let last = self
                .keeper
                .get_last_specified(&key, StreamName::Sales)?
                .unwrap_or_else(|| EngineValue::zero(Unit::Units));
            self.set_stream_for_key(&key, StreamName::Sales, &last)
        } else {
            let pipeline = RecalcOperationBuilder::for_key(key)
                .recalc_sales()
                .recalc_population_change_with_recharge()
                .recalc_consumption()
                .build();
            self.run_pipeline(pipeline)
        }
    }

    /// Moves volume from the scoped substance's stream into another
    /// substance of the same application.
    pub fn replace(
        &mut self,
        amount: &EngineValue,
        stream: StreamName,
        destination: &str,
    ) -> EngineResult<()> {
        let key = self.key_for("replace")?;
        if key.substance() == destination {
            warn!(key = %key, reason = "self-replace", "replace rejected");
            return Err(OperationError::SelfReplace {
                substance: destination.to_string(),
            }
            .into());
        }
        let dest_key = UseKey::new(key.application(), destination);

        let source_current = self.keeper.get_stream(&key, stream)?.amount();
        let (source_kg, dest_kg) = match amount.unit().rate_base() {
            Unit::Percent => {
                let kg = amount.fraction() * source_current;
                (kg, kg)
            }
            Unit::Kilograms => (amount.amount(), amount.amount()),
            Unit::MetricTons => {
                let kg = amount.amount() * Decimal::ONE_THOUSAND;
                (kg, kg)
            }
            Unit::Units => {
                // The moved equipment is charged at each side's own rate.
                let source_charge = self.keeper.amortized_initial_charge(&key)?;
                let dest_charge = self.keeper.amortized_initial_charge(&dest_key)?;
                (
                    amount.amount() * source_charge,
                    amount.amount() * dest_charge,
                )
            }
            other => {
                return Err(OperationError::InvalidAmount {
                    operation: "replace".to_string(),
                    msg: format!("unsupported unit '{other}'"),
                }
                .into());
            }
        };

        let source_next = (source_current - source_kg).max(Decimal::ZERO);
        self.keeper.set_stream(
            &key,
            stream,
            &EngineValue::new(source_next, stream.base_unit()),
            subtract_recycling_for(stream),
        )?;

        let dest_current = self.keeper.get_stream(&dest_key, stream)?.amount();
        self.keeper.set_stream(
            &dest_key,
            stream,
            &EngineValue::new(dest_current + dest_kg, stream.base_unit()),
            subtract_recycling_for(stream),
        )?;

        for affected in [key, dest_key] {
            let pipeline = RecalcOperationBuilder::for_key(affected)
                .recalc_population_change()
                .recalc_consumption()
                .build();
            self.run_pipeline(pipeline)?;
        }
        Ok(())
    }

    /// Sets the GHG or energy intensity, depending on the unit given.
    pub fn set_equals(&mut self, intensity: &EngineValue) -> EngineResult<()> {
        let key = self.key_for("equals")?;
        {
            let params = self.keeper.params_mut(&key, "equals")?;
            match intensity.unit().rate_base() {
                Unit::TonsCo2ePerMetricTon | Unit::TonsCo2e => params.set_ghg_intensity(
                    EngineValue::new(intensity.amount(), Unit::TonsCo2ePerMetricTon),
                ),
                Unit::KilogramsCo2ePerKilogram | Unit::KilogramsCo2e => params.set_ghg_intensity(
                    EngineValue::new(intensity.amount(), Unit::KilogramsCo2ePerKilogram),
                ),
                Unit::KilowattHoursPerUnit | Unit::KilowattHours => params.set_energy_intensity(
                    EngineValue::new(intensity.amount(), Unit::KilowattHoursPerUnit),
                ),
                other => {
                    return Err(OperationError::InvalidAmount {
                        operation: "equals".to_string(),
                        msg: format!("unsupported intensity unit '{other}'"),
                    }
                    .into());
                }
            }
        }
        let pipeline = RecalcOperationBuilder::for_key(key)
            .recalc_recharge_emissions()
            .recalc_eol_emissions()
            .recalc_consumption()
            .build();
        self.run_pipeline(pipeline)
    }

    // --- internals --------------------------------------------------------------------------

    /// The explicitly accumulated servicing volume for the year.
    fn explicit_recharge_kg(&self, key: &UseKey) -> EngineResult<Decimal> {
        let params = self.keeper.params(key, "recharge volume")?;
        let population = self
            .keeper
            .get_stream(key, StreamName::PriorEquipment)?
            .amount();
        Ok(population
            * params.recharge_population().fraction()
            * params.recharge_intensity().amount())
    }

    fn run_pipeline(&mut self, pipeline: Vec<RecalcStrategy>) -> EngineResult<()> {
        let mut kit = RecalcKit {
            keeper: &mut self.keeper,
            converter: &self.converter,
        };
        recalc::execute(&mut kit, &pipeline)
    }
}

/// Writes derived from a stored substream value are already net of
/// recycling; only whole-sales writes re-run the netting.
fn subtract_recycling_for(stream: StreamName) -> bool {
    !matches!(stream, StreamName::Domestic | StreamName::Import)
}

fn percent_guard(value: &EngineValue, operation: &str) -> EngineResult<()> {
    if value.unit().rate_base() == Unit::Percent {
        Ok(())
    } else {
        Err(OperationError::InvalidAmount {
            operation: operation.to_string(),
            msg: format!("expected a percentage, got '{}'", value.unit()),
        }
        .into())
    }
}
