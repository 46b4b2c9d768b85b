use rust_decimal::Decimal;

use crate::{
    error::{EngineResult, UnitError},
    units::{EngineValue, Unit},
};

// ================================================================================================
// Conversion context
// ================================================================================================

/// Simulation-state quantities a conversion may depend on.
///
/// Built fresh at each call site from the state the caller can see:
/// `population` (units of installed equipment), `amortized_unit_volume`
/// (kg of substance per unit of equipment), `volume` (a reference mass for
/// `%` resolution) and the current intensities. Every field is optional; a
/// conversion whose required context is missing or zero yields zero rather
/// than failing, so recalculation cascades never abort mid-pipeline.
#[derive(Debug, Clone, Default)]
pub struct ConverterContext {
    population: Option<Decimal>,
    amortized_unit_volume: Option<Decimal>,
    volume: Option<Decimal>,
    ghg_intensity: Option<EngineValue>,
    energy_intensity: Option<EngineValue>,
}

impl ConverterContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed equipment population, in units.
    pub fn with_population(mut self, population: Decimal) -> Self {
        self.population = Some(population);
        self
    }

    /// Substance mass per unit of equipment, in kg / unit.
    pub fn with_amortized_unit_volume(mut self, kg_per_unit: Decimal) -> Self {
        self.amortized_unit_volume = Some(kg_per_unit);
        self
    }

    /// Reference mass against which `%` amounts resolve, in kg.
    pub fn with_volume(mut self, kg: Decimal) -> Self {
        self.volume = Some(kg);
        self
    }

    /// Greenhouse-gas intensity, in tCO2e / mt or kgCO2e / kg.
    pub fn with_ghg_intensity(mut self, intensity: EngineValue) -> Self {
        self.ghg_intensity = Some(intensity);
        self
    }

    /// Energy intensity, in kwh / unit.
    pub fn with_energy_intensity(mut self, intensity: EngineValue) -> Self {
        self.energy_intensity = Some(intensity);
        self
    }

    fn population(&self) -> Decimal {
        self.population.unwrap_or(Decimal::ZERO)
    }

    fn amortized_unit_volume(&self) -> Decimal {
        self.amortized_unit_volume.unwrap_or(Decimal::ZERO)
    }

    fn volume(&self) -> Decimal {
        self.volume.unwrap_or(Decimal::ZERO)
    }

    /// Intensity normalized to tCO2e per kg. `1 kgCO2e / kg == 1 tCO2e / mt`,
    /// so both tokens carry the same numeric value and divide by 1000.
    fn ghg_per_kg(&self) -> Decimal {
        match self.ghg_intensity {
            Some(intensity)
                if matches!(
                    intensity.unit(),
                    Unit::TonsCo2ePerMetricTon | Unit::KilogramsCo2ePerKilogram
                ) =>
            {
                intensity.amount() / Decimal::ONE_THOUSAND
            }
            _ => Decimal::ZERO,
        }
    }

    fn kwh_per_unit(&self) -> Decimal {
        match self.energy_intensity {
            Some(intensity) if intensity.unit() == Unit::KilowattHoursPerUnit => {
                intensity.amount()
            }
            _ => Decimal::ZERO,
        }
    }
}

// ================================================================================================
// Converter
// ================================================================================================

/// Stateless dimensional converter.
///
/// Mass conversions route through kg, equipment conversions through units.
/// A zero divisor (e.g. converting kg to units with a zero amortized charge)
/// produces zero; callers that must treat that as an error check before
/// converting.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitConverter;

impl UnitConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(
        &self,
        value: &EngineValue,
        target: Unit,
        ctx: &ConverterContext,
    ) -> EngineResult<EngineValue> {
        let source = value.unit().rate_base();
        let goal = target.rate_base();

        if source == goal {
            return Ok(EngineValue::new(value.amount(), target));
        }

        let amount = match goal {
            Unit::Kilograms => self.to_kg(value, ctx)?,
            Unit::MetricTons => self.to_kg(value, ctx)? / Decimal::ONE_THOUSAND,
            Unit::TonsCo2e => self.to_kg(value, ctx)? * ctx.ghg_per_kg(),
            Unit::KilogramsCo2e => {
                self.to_kg(value, ctx)? * ctx.ghg_per_kg() * Decimal::ONE_THOUSAND
            }
            Unit::Units => self.to_units(value, ctx)?,
            Unit::KilowattHours => self.to_units(value, ctx)? * ctx.kwh_per_unit(),
            Unit::Percent => self.to_percent(value, ctx)?,
            Unit::TonsCo2ePerMetricTon if source == Unit::KilogramsCo2ePerKilogram => {
                // Numerically identical rates.
                value.amount()
            }
            Unit::KilogramsCo2ePerKilogram if source == Unit::TonsCo2ePerMetricTon => {
                value.amount()
            }
            _ => {
                return Err(UnitError::IncompatibleUnits {
                    from: value.unit().to_string(),
                    to: target.to_string(),
                }
                .into());
            }
        };

        Ok(EngineValue::new(amount, target))
    }

    fn to_kg(&self, value: &EngineValue, ctx: &ConverterContext) -> EngineResult<Decimal> {
        let amount = value.amount();
        let kg = match value.unit().rate_base() {
            Unit::Kilograms => amount,
            Unit::MetricTons => amount * Decimal::ONE_THOUSAND,
            Unit::Units => amount * ctx.amortized_unit_volume(),
            Unit::TonsCo2e => safe_div(amount, ctx.ghg_per_kg()),
            Unit::KilogramsCo2e => {
                safe_div(amount / Decimal::ONE_THOUSAND, ctx.ghg_per_kg())
            }
            Unit::Percent => amount / Decimal::ONE_HUNDRED * ctx.volume(),
            Unit::KilowattHours => {
                safe_div(amount, ctx.kwh_per_unit()) * ctx.amortized_unit_volume()
            }
            other => {
                return Err(UnitError::IncompatibleUnits {
                    from: other.to_string(),
                    to: Unit::Kilograms.to_string(),
                }
                .into());
            }
        };
        Ok(kg)
    }

    fn to_units(&self, value: &EngineValue, ctx: &ConverterContext) -> EngineResult<Decimal> {
        let amount = value.amount();
        let units = match value.unit().rate_base() {
            Unit::Units => amount,
            Unit::Percent => amount / Decimal::ONE_HUNDRED * ctx.population(),
            Unit::KilowattHours => safe_div(amount, ctx.kwh_per_unit()),
            Unit::Kilograms | Unit::MetricTons | Unit::TonsCo2e | Unit::KilogramsCo2e => {
                let kg = self.to_kg(value, ctx)?;
                safe_div(kg, ctx.amortized_unit_volume())
            }
            other => {
                return Err(UnitError::IncompatibleUnits {
                    from: other.to_string(),
                    to: Unit::Units.to_string(),
                }
                .into());
            }
        };
        Ok(units)
    }

    fn to_percent(&self, value: &EngineValue, ctx: &ConverterContext) -> EngineResult<Decimal> {
        let pct = match value.unit().rate_base() {
            Unit::Units => {
                safe_div(value.amount(), ctx.population()) * Decimal::ONE_HUNDRED
            }
            Unit::Kilograms | Unit::MetricTons | Unit::TonsCo2e | Unit::KilogramsCo2e => {
                let kg = self.to_kg(value, ctx)?;
                safe_div(kg, ctx.volume()) * Decimal::ONE_HUNDRED
            }
            other => {
                return Err(UnitError::IncompatibleUnits {
                    from: other.to_string(),
                    to: Unit::Percent.to_string(),
                }
                .into());
            }
        };
        Ok(pct)
    }
}

/// Division yielding zero on a zero divisor instead of panicking.
fn safe_div(numerator: Decimal, divisor: Decimal) -> Decimal {
    if divisor.is_zero() {
        Decimal::ZERO
    } else {
        numerator / divisor
    }
}
