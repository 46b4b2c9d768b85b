use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Derives the equipment population from this year's sales volume.
///
/// The substance left for new installs is sales minus the servicing volume;
/// the chosen servicing volume is the explicitly accumulated recharge need
/// when the caller asked for it, the implicit recharge otherwise. The
/// population floor is zero; the signed delta is kept in `newEquipment`.
pub fn recalc(
    kit: &mut RecalcKit<'_>,
    key: &UseKey,
    use_explicit_recharge: bool,
) -> EngineResult<()> {
    let sales_kg = kit.keeper.get_stream(key, StreamName::Sales)?.amount();
    let chosen_recharge_kg = if use_explicit_recharge {
        kit.recharge_demand_kg(key)?
    } else {
        kit.keeper
            .get_stream(key, StreamName::ImplicitRecharge)?
            .amount()
    };

    let charge = kit.keeper.amortized_initial_charge(key)?;
    let delta_units = if charge.is_zero() {
        Decimal::ZERO
    } else {
        (sales_kg - chosen_recharge_kg) / charge
    };

    let prior = kit
        .keeper
        .get_stream(key, StreamName::PriorEquipment)?
        .amount();
    let equipment = (prior + delta_units).max(Decimal::ZERO);

    kit.keeper
        .set_stream(key, StreamName::Equipment, &units(equipment), true)?;
    kit.keeper
        .set_stream(key, StreamName::NewEquipment, &units(delta_units), true)?;

    let installed_kg = delta_units.max(Decimal::ZERO) * charge;
    let install_emissions = kit.kg_to_tco2e(key, installed_kg)?;
    kit.keeper.set_stream(
        key,
        StreamName::InitialChargeEmissions,
        &EngineValue::new(install_emissions, Unit::TonsCo2e),
        true,
    )?;
    Ok(())
}

fn units(amount: Decimal) -> EngineValue {
    EngineValue::new(amount, Unit::Units)
}
