use std::collections::HashMap;

use itertools::iproduct;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    engine::Engine,
    error::{EngineResult, SimError},
    program::{Program, Scenario},
    streams::{StreamName, UseKey},
    units::{EngineValue, Unit},
};

// ================================================================================================
// Result rows
// ================================================================================================

/// One row of results: a (scenario, trial, year, application, substance)
/// key plus the derived quantities a downstream consumer charts or audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub scenario: String,
    pub trial: u64,
    pub year: i32,
    pub application: String,
    pub substance: String,

    pub domestic: EngineValue,
    pub import: EngineValue,
    pub export: EngineValue,
    pub recycle: EngineValue,

    pub domestic_consumption: EngineValue,
    pub import_consumption: EngineValue,
    pub recycle_consumption: EngineValue,
    pub export_consumption: EngineValue,

    pub population: EngineValue,
    pub population_new: EngineValue,

    pub recharge_emissions: EngineValue,
    pub eol_emissions: EngineValue,
    pub initial_charge_emissions: EngineValue,
    pub energy_consumption: EngineValue,

    /// Implicit-recharge detail behind unit-specified sales.
    pub trade_supplement: EngineValue,

    pub bank_kg: EngineValue,
    pub bank_tco2e: EngineValue,
    pub bank_change_kg: EngineValue,
    pub bank_change_tco2e: EngineValue,
}

impl ResultRow {
    /// The value columns in serialization order, after the five key columns.
    pub const VALUE_COLUMNS: [&'static str; 19] = [
        "domestic",
        "import",
        "export",
        "recycle",
        "domesticConsumption",
        "importConsumption",
        "recycleConsumption",
        "exportConsumption",
        "population",
        "populationNew",
        "rechargeEmissions",
        "eolEmissions",
        "initialChargeEmissions",
        "energyConsumption",
        "tradeSupplement",
        "bankKg",
        "bankTco2e",
        "bankChangeKg",
        "bankChangeTco2e",
    ];

    pub fn values(&self) -> [&EngineValue; 19] {
        [
            &self.domestic,
            &self.import,
            &self.export,
            &self.recycle,
            &self.domestic_consumption,
            &self.import_consumption,
            &self.recycle_consumption,
            &self.export_consumption,
            &self.population,
            &self.population_new,
            &self.recharge_emissions,
            &self.eol_emissions,
            &self.initial_charge_emissions,
            &self.energy_consumption,
            &self.trade_supplement,
            &self.bank_kg,
            &self.bank_tco2e,
            &self.bank_change_kg,
            &self.bank_change_tco2e,
        ]
    }
}

// ================================================================================================
// Runner
// ================================================================================================

/// Evaluates every (scenario, trial) pair of a program, each on its own
/// engine instance, and merges the rows in deterministic order.
///
/// Engines are single-threaded and never shared; the rayon pool only ever
/// runs independent instances side by side.
#[derive(Debug, Clone)]
pub struct SimulationRunner {
    replicates: u64,
    seed: u64,
}

impl Default for SimulationRunner {
    fn default() -> Self {
        Self {
            replicates: 1,
            seed: 0,
        }
    }
}

impl SimulationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replicates(mut self, replicates: u64) -> Self {
        self.replicates = replicates;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Runs every scenario of the program.
    pub fn run(&self, program: &Program) -> EngineResult<Vec<ResultRow>> {
        if self.replicates == 0 {
            return Err(SimError::InvalidReplicates(
                "at least one replicate is required".to_string(),
            )
            .into());
        }
        program.validate()?;

        let jobs: Vec<(&Scenario, u64)> =
            iproduct!(program.scenarios.iter(), 1..=self.replicates).collect();

        let per_job: EngineResult<Vec<Vec<ResultRow>>> = jobs
            .into_par_iter()
            .map(|(scenario, trial)| self.run_trial(program, scenario, trial))
            .collect();

        Ok(per_job?.into_iter().flatten().collect())
    }

    /// Runs a single named scenario.
    pub fn run_scenario(&self, program: &Program, name: &str) -> EngineResult<Vec<ResultRow>> {
        let scenario = program.scenario(name)?;
        let narrowed = Program {
            default: program.default.clone(),
            policies: program.policies.clone(),
            scenarios: vec![scenario.clone()],
        };
        self.run(&narrowed)
    }

    fn run_trial(
        &self,
        program: &Program,
        scenario: &Scenario,
        trial: u64,
    ) -> EngineResult<Vec<ResultRow>> {
        info!(scenario = %scenario.name, trial, "trial start");
        let operations = program.stacked_operations(scenario)?;

        let mut engine = Engine::new(scenario.start_year, scenario.end_year)?;
        engine.set_trial(self.seed, trial);
        engine.set_stanza(&program.default.name);

        let mut rows = Vec::new();
        let mut bank_cursor: HashMap<UseKey, (Decimal, Decimal)> = HashMap::new();

        for year in scenario.start_year..=scenario.end_year {
            for operation in &operations {
                operation.execute(&mut engine)?;
            }
            rows.extend(snapshot(&engine, scenario, trial, year, &mut bank_cursor)?);
            if year < scenario.end_year {
                engine.increment_year()?;
            }
        }
        info!(scenario = %scenario.name, trial, rows = rows.len(), "trial done");
        Ok(rows)
    }
}

/// Captures one row per registered substance at the current year.
fn snapshot(
    engine: &Engine,
    scenario: &Scenario,
    trial: u64,
    year: i32,
    bank_cursor: &mut HashMap<UseKey, (Decimal, Decimal)>,
) -> EngineResult<Vec<ResultRow>> {
    let keeper = engine.keeper();
    let keys: Vec<UseKey> = keeper.keys().cloned().collect();
    let mut rows = Vec::with_capacity(keys.len());

    for key in keys {
        let stream = |name: StreamName| keeper.get_stream(&key, name);
        let params = keeper.params(&key, "snapshot")?;
        // 1 tCO2e/mt == 0.001 tCO2e/kg; both intensity tokens carry the
        // same numeric value.
        let ghg_per_kg = params.ghg_intensity().amount() / Decimal::ONE_THOUSAND;
        let energy_per_unit = params.energy_intensity().amount();

        let domestic = stream(StreamName::Domestic)?;
        let import = stream(StreamName::Import)?;
        let export = stream(StreamName::Export)?;
        let recycle = stream(StreamName::Recycle)?;
        let population = stream(StreamName::Equipment)?;

        let tco2e = |kg: Decimal| EngineValue::new(kg * ghg_per_kg, Unit::TonsCo2e);

        let charge = keeper.amortized_initial_charge(&key)?;
        let bank_kg = population.amount() * charge;
        let bank_tco2e = bank_kg * ghg_per_kg;
        let (previous_kg, previous_tco2e) = bank_cursor
            .insert(key.clone(), (bank_kg, bank_tco2e))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        rows.push(ResultRow {
            scenario: scenario.name.clone(),
            trial,
            year,
            application: key.application().to_string(),
            substance: key.substance().to_string(),
            domestic_consumption: tco2e(domestic.amount()),
            import_consumption: tco2e(import.amount()),
            recycle_consumption: tco2e(recycle.amount()),
            export_consumption: tco2e(export.amount()),
            domestic,
            import,
            export,
            recycle,
            population,
            population_new: stream(StreamName::NewEquipment)?,
            recharge_emissions: stream(StreamName::RechargeEmissions)?,
            eol_emissions: stream(StreamName::EolEmissions)?,
            initial_charge_emissions: stream(StreamName::InitialChargeEmissions)?,
            energy_consumption: EngineValue::new(
                population.amount() * energy_per_unit,
                Unit::KilowattHours,
            ),
            trade_supplement: stream(StreamName::ImplicitRecharge)?,
            bank_kg: EngineValue::new(bank_kg, Unit::Kilograms),
            bank_tco2e: EngineValue::new(bank_tco2e, Unit::TonsCo2e),
            bank_change_kg: EngineValue::new(bank_kg - previous_kg, Unit::Kilograms),
            bank_change_tco2e: EngineValue::new(bank_tco2e - previous_tco2e, Unit::TonsCo2e),
        });
    }
    Ok(rows)
}
