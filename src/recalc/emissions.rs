use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Emissions from servicing the installed base: the chosen recharge volume
/// under the substance's GHG intensity. Falls back to the implicit recharge
/// volume when no explicit recharge has been accumulated.
pub fn recalc_recharge(kit: &mut RecalcKit<'_>, key: &UseKey) -> EngineResult<()> {
    let explicit_kg = kit.recharge_demand_kg(key)?;
    let recharge_kg = if explicit_kg > Decimal::ZERO {
        explicit_kg
    } else {
        kit.keeper
            .get_stream(key, StreamName::ImplicitRecharge)?
            .amount()
    };
    let emissions = kit.kg_to_tco2e(key, recharge_kg)?;
    kit.keeper.set_stream(
        key,
        StreamName::RechargeEmissions,
        &EngineValue::new(emissions, Unit::TonsCo2e),
        true,
    )
}

/// Emissions from the equipment retired this year only: the year's retired
/// delta, charged at the amortized initial charge.
pub fn recalc_eol(kit: &mut RecalcKit<'_>, key: &UseKey) -> EngineResult<()> {
    let retired_units = kit.eol_units_this_year(key)?;
    let charge = kit.keeper.amortized_initial_charge(key)?;
    let emissions = kit.kg_to_tco2e(key, retired_units * charge)?;
    kit.keeper.set_stream(
        key,
        StreamName::EolEmissions,
        &EngineValue::new(emissions, Unit::TonsCo2e),
        true,
    )
}
