use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Applies the cumulative retirement rate against the year's base
/// population.
///
/// The base is captured on the first retirement of the year so that stacked
/// retire policies compound against the same population. Only the delta
/// beyond what has already been applied this year moves equipment into
/// `retired`.
pub fn recalc(kit: &mut RecalcKit<'_>, key: &UseKey) -> EngineResult<()> {
    let prior = kit
        .keeper
        .get_stream(key, StreamName::PriorEquipment)?
        .amount();

    let params = kit.keeper.params(key, "retire recalc")?.clone();
    let base = match params.retirement_base() {
        Some(base) => base,
        None => {
            kit.keeper
                .params_mut(key, "retire recalc")?
                .capture_retirement_base(prior);
            prior
        }
    };

    let cumulative_units = base * params.retirement_rate().fraction();
    let delta = (cumulative_units - params.applied_retirement()).max(Decimal::ZERO);

    let equipment = kit.keeper.get_stream(key, StreamName::Equipment)?.amount();
    let retired = kit.keeper.get_stream(key, StreamName::Retired)?.amount();

    kit.keeper.set_stream(
        key,
        StreamName::PriorEquipment,
        &units((prior - delta).max(Decimal::ZERO)),
        true,
    )?;
    kit.keeper.set_stream(
        key,
        StreamName::Equipment,
        &units((equipment - delta).max(Decimal::ZERO)),
        true,
    )?;
    kit.keeper
        .set_stream(key, StreamName::Retired, &units(retired + delta), true)?;

    kit.keeper
        .params_mut(key, "retire recalc")?
        .set_applied_retirement(cumulative_units);
    Ok(())
}

fn units(amount: Decimal) -> EngineValue {
    EngineValue::new(amount, Unit::Units)
}
