use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    streams::{StreamName, UseKey, keeper::StreamKeeper},
    units::{ConverterContext, EngineValue, Unit, UnitConverter},
};

pub mod consumption;
pub mod emissions;
pub mod population;
pub mod recycling;
pub mod retire;
pub mod sales;

// ================================================================================================
// Recalc kit
// ================================================================================================

/// The state handles a strategy works against: the keeper it mutates and a
/// converter for dimensional math. Constructed by the engine per mutation.
pub struct RecalcKit<'a> {
    pub keeper: &'a mut StreamKeeper,
    pub converter: &'a UnitConverter,
}

impl RecalcKit<'_> {
    /// kg of substance demanded by servicing the installed base this year.
    pub fn recharge_demand_kg(&self, key: &UseKey) -> EngineResult<Decimal> {
        let params = self.keeper.params(key, "recharge demand")?;
        let population = self
            .keeper
            .get_stream(key, StreamName::PriorEquipment)?
            .amount();
        Ok(population
            * params.recharge_population().fraction()
            * params.recharge_intensity().amount())
    }

    /// Units of equipment retired so far this year.
    pub fn eol_units_this_year(&self, key: &UseKey) -> EngineResult<Decimal> {
        let retired = self.keeper.get_stream(key, StreamName::Retired)?.amount();
        let prior = self
            .keeper
            .get_stream(key, StreamName::PriorRetired)?
            .amount();
        Ok((retired - prior).max(Decimal::ZERO))
    }

    /// Converts a substance mass to tCO2e under the substance's intensity.
    pub fn kg_to_tco2e(&self, key: &UseKey, kg: Decimal) -> EngineResult<Decimal> {
        let params = self.keeper.params(key, "ghg conversion")?;
        let ctx = ConverterContext::new().with_ghg_intensity(params.ghg_intensity());
        let value = EngineValue::new(kg, Unit::Kilograms);
        Ok(self.converter.convert(&value, Unit::TonsCo2e, &ctx)?.amount())
    }
}

// ================================================================================================
// Strategies
// ================================================================================================

/// The closed set of recalculation strategies.
///
/// Strategies never call each other; composition happens in the builder,
/// which lays dependent strategies out as a flat pipeline the engine runs
/// front to back. That keeps the firing order explicit and inspectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecalcStrategy {
    /// Rebalances virgin supply against recycled supply and implicit
    /// recharge, preserving total demand.
    Sales { key: UseKey },
    /// Derives the equipment population from sales volume.
    PopulationChange {
        key: UseKey,
        use_explicit_recharge: bool,
    },
    /// Applies the cumulative retirement rate against the base population.
    Retire { key: UseKey },
    /// Derives virgin consumption in tCO2e.
    Consumption { key: UseKey },
    RechargeEmissions { key: UseKey },
    EolEmissions { key: UseKey },
    EolRecycling { key: UseKey },
    RechargeRecycling { key: UseKey },
}

/// Runs a pipeline front to back, stopping at the first failure.
pub fn execute(kit: &mut RecalcKit<'_>, pipeline: &[RecalcStrategy]) -> EngineResult<()> {
    for strategy in pipeline {
        dispatch(kit, strategy)?;
    }
    Ok(())
}

fn dispatch(kit: &mut RecalcKit<'_>, strategy: &RecalcStrategy) -> EngineResult<()> {
    tracing::debug!(?strategy, "recalc");
    match strategy {
        RecalcStrategy::Sales { key } => sales::recalc(kit, key),
        RecalcStrategy::PopulationChange {
            key,
            use_explicit_recharge,
        } => population::recalc(kit, key, *use_explicit_recharge),
        RecalcStrategy::Retire { key } => retire::recalc(kit, key),
        RecalcStrategy::Consumption { key } => consumption::recalc(kit, key),
        RecalcStrategy::RechargeEmissions { key } => emissions::recalc_recharge(kit, key),
        RecalcStrategy::EolEmissions { key } => emissions::recalc_eol(kit, key),
        RecalcStrategy::EolRecycling { key } => {
            recycling::recalc(kit, key, crate::streams::RecoveryStage::Eol)
        }
        RecalcStrategy::RechargeRecycling { key } => {
            recycling::recalc(kit, key, crate::streams::RecoveryStage::Recharge)
        }
    }
}

// ================================================================================================
// Builder
// ================================================================================================

/// Composes strategies into a pipeline in their canonical firing order.
///
/// Each `recalc_*` step appends the strategy together with the dependents
/// that must follow it: recycling recomputation fires before the matching
/// emissions pass, retirement pulls the population chain behind it.
#[derive(Debug, Clone)]
pub struct RecalcOperationBuilder {
    key: UseKey,
    pipeline: Vec<RecalcStrategy>,
}

impl RecalcOperationBuilder {
    pub fn for_key(key: UseKey) -> Self {
        Self {
            key,
            pipeline: Vec::new(),
        }
    }

    pub fn recalc_sales(mut self) -> Self {
        self.pipeline.push(RecalcStrategy::Sales {
            key: self.key.clone(),
        });
        self
    }

    /// Population derivation with the implicit-recharge volume as the
    /// servicing need.
    pub fn recalc_population_change(self) -> Self {
        self.population_change(false)
    }

    /// Population derivation with the explicitly accumulated recharge
    /// parameters as the servicing need.
    pub fn recalc_population_change_with_recharge(self) -> Self {
        self.population_change(true)
    }

    fn population_change(mut self, use_explicit_recharge: bool) -> Self {
        self.pipeline.push(RecalcStrategy::RechargeRecycling {
            key: self.key.clone(),
        });
        self.pipeline.push(RecalcStrategy::PopulationChange {
            key: self.key.clone(),
            use_explicit_recharge,
        });
        self.pipeline.push(RecalcStrategy::RechargeEmissions {
            key: self.key.clone(),
        });
        self
    }

    pub fn recalc_retire(mut self) -> Self {
        self.pipeline.push(RecalcStrategy::EolRecycling {
            key: self.key.clone(),
        });
        self.pipeline.push(RecalcStrategy::Retire {
            key: self.key.clone(),
        });
        self.pipeline.push(RecalcStrategy::EolEmissions {
            key: self.key.clone(),
        });
        self.population_change(false)
    }

    pub fn recalc_consumption(mut self) -> Self {
        self.pipeline.push(RecalcStrategy::Consumption {
            key: self.key.clone(),
        });
        self
    }

    pub fn recalc_recharge_emissions(mut self) -> Self {
        self.pipeline.push(RecalcStrategy::RechargeEmissions {
            key: self.key.clone(),
        });
        self
    }

    pub fn recalc_eol_emissions(mut self) -> Self {
        self.pipeline.push(RecalcStrategy::EolEmissions {
            key: self.key.clone(),
        });
        self
    }

    pub fn build(self) -> Vec<RecalcStrategy> {
        self.pipeline
    }
}
