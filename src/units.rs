use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Mutex, OnceLock},
};

use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{EngineResult, UnitError};

pub mod convert;

pub use convert::{ConverterContext, UnitConverter};

// ================================================================================================
// Units
// ================================================================================================

/// The closed set of unit tokens understood by the engine.
///
/// Quantities are masses (`kg`, `mt`), equipment counts (`units`), shares
/// (`%`), greenhouse-gas equivalents (`tCO2e`, `kgCO2e`), energy (`kwh`) or
/// durations (`years`). Compound tokens express per-unit rates. The `/ year`
/// suffix marks an annual rate and converts as the bare unit.
#[derive(
    Debug,
    Clone,
    Copy,
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
pub enum Unit {
    #[strum(serialize = "kg")]
    #[serde(rename = "kg")]
    Kilograms,

    #[strum(serialize = "mt")]
    #[serde(rename = "mt")]
    MetricTons,

    #[strum(serialize = "units", serialize = "unit")]
    #[serde(rename = "units", alias = "unit")]
    Units,

    #[strum(serialize = "%")]
    #[serde(rename = "%")]
    Percent,

    #[strum(serialize = "tCO2e")]
    #[serde(rename = "tCO2e")]
    TonsCo2e,

    #[strum(serialize = "kgCO2e")]
    #[serde(rename = "kgCO2e")]
    KilogramsCo2e,

    #[strum(serialize = "kwh")]
    #[serde(rename = "kwh")]
    KilowattHours,

    #[strum(serialize = "years", serialize = "year")]
    #[serde(rename = "years", alias = "year")]
    Years,

    #[strum(serialize = "kg / unit")]
    #[serde(rename = "kg / unit")]
    KilogramsPerUnit,

    #[strum(serialize = "tCO2e / mt")]
    #[serde(rename = "tCO2e / mt")]
    TonsCo2ePerMetricTon,

    #[strum(serialize = "kgCO2e / kg")]
    #[serde(rename = "kgCO2e / kg")]
    KilogramsCo2ePerKilogram,

    #[strum(serialize = "kwh / unit")]
    #[serde(rename = "kwh / unit")]
    KilowattHoursPerUnit,

    #[strum(serialize = "% / year")]
    #[serde(rename = "% / year")]
    PercentPerYear,
}

impl Unit {
    /// Strips the annual-rate suffix: `% / year` converts exactly as `%`.
    pub fn rate_base(self) -> Unit {
        match self {
            Unit::PercentPerYear => Unit::Percent,
            other => other,
        }
    }

    /// True for units counting equipment rather than substance mass.
    pub fn is_equipment(self) -> bool {
        matches!(self, Unit::Units)
    }

    /// True for plain substance masses.
    pub fn is_mass(self) -> bool {
        matches!(self, Unit::Kilograms | Unit::MetricTons)
    }

    /// True for greenhouse-gas equivalent masses.
    pub fn is_ghg(self) -> bool {
        matches!(self, Unit::TonsCo2e | Unit::KilogramsCo2e)
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

// ================================================================================================
// Unit-token normalization cache
// ================================================================================================

/// The only process-wide state in the crate: raw unit token -> parsed unit.
///
/// Bounded so that hostile or misbehaving inputs cannot grow it without
/// limit; entries past the bound are parsed but not cached.
static NORMALIZATION_CACHE: OnceLock<Mutex<HashMap<String, Unit>>> = OnceLock::new();

const NORMALIZATION_CACHE_BOUND: usize = 100;

/// Parses a raw unit token, tolerating irregular whitespace (`"kg/unit"`,
/// `"kg  /  unit"`). Results are cached process-wide.
pub fn parse_unit(raw: &str) -> EngineResult<Unit> {
    let cache = NORMALIZATION_CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    if let Ok(guard) = cache.lock()
        && let Some(unit) = guard.get(raw)
    {
        return Ok(*unit);
    }

    let normalized = normalize_unit_token(raw);
    let unit =
        Unit::from_str(&normalized).map_err(|_| UnitError::UnknownUnit(raw.to_string()))?;

    if let Ok(mut guard) = cache.lock()
        && guard.len() < NORMALIZATION_CACHE_BOUND
    {
        guard.insert(raw.to_string(), unit);
    }

    Ok(unit)
}

fn normalize_unit_token(raw: &str) -> String {
    raw.split('/')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(" / ")
}

// ================================================================================================
// Dimensional value
// ================================================================================================

/// An exact decimal amount paired with its unit.
///
/// All engine arithmetic runs on `rust_decimal::Decimal` (96-bit scaled
/// integer); floating point appears only at the randomness boundary and is
/// rejected there if non-finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineValue {
    amount: Decimal,
    unit: Unit,
}

impl EngineValue {
    pub fn new(amount: Decimal, unit: Unit) -> Self {
        Self { amount, unit }
    }

    pub fn zero(unit: Unit) -> Self {
        Self {
            amount: Decimal::ZERO,
            unit,
        }
    }

    /// Ingests a float, rejecting NaN and infinities. `context` names the
    /// destination for the diagnostic.
    pub fn try_from_f64(value: f64, unit: Unit, context: &str) -> EngineResult<Self> {
        if !value.is_finite() {
            return Err(UnitError::NotFinite {
                context: context.to_string(),
            }
            .into());
        }
        let amount = Decimal::from_f64(value).ok_or_else(|| UnitError::NotFinite {
            context: context.to_string(),
        })?;
        Ok(Self { amount, unit })
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn with_amount(&self, amount: Decimal) -> Self {
        Self {
            amount,
            unit: self.unit,
        }
    }

    /// For `%` values: the fraction this percentage represents (`50 %` -> `0.5`).
    pub fn fraction(&self) -> Decimal {
        self.amount / Decimal::ONE_HUNDRED
    }

    /// Adds another value carrying the same unit.
    pub fn checked_add(&self, other: &EngineValue) -> Option<EngineValue> {
        (self.unit == other.unit).then(|| self.with_amount(self.amount + other.amount))
    }

    /// Subtracts another value carrying the same unit.
    pub fn checked_sub(&self, other: &EngineValue) -> Option<EngineValue> {
        (self.unit == other.unit).then(|| self.with_amount(self.amount - other.amount))
    }

    /// Clamps negative amounts to zero, preserving the unit.
    pub fn clamp_non_negative(&self) -> EngineValue {
        if self.amount.is_sign_negative() {
            self.with_amount(Decimal::ZERO)
        } else {
            *self
        }
    }
}

impl fmt::Display for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}
