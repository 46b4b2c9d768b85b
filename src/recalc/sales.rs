use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{Parameterization, RecoveryStage, StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Rebalances the virgin substreams after a rate or recovery change.
///
/// Total demand is held constant: the recycled supply and (for unit-specified
/// sales) the implicit servicing volume are recomputed, and the virgin
/// remainder is redistributed across domestic and import. Demand is captured
/// before the recycled volumes are rewritten, since the sales read sums them.
pub fn recalc(kit: &mut RecalcKit<'_>, key: &UseKey) -> EngineResult<()> {
    let demand_kg = kit.keeper.get_stream(key, StreamName::Sales)?.amount();
    let implicit_kg = kit
        .keeper
        .get_stream(key, StreamName::ImplicitRecharge)?
        .amount();

    let params = kit.keeper.params(key, "sales recalc")?.clone();
    let charge = kit.keeper.amortized_initial_charge(key)?;

    let eol_available = kit.eol_units_this_year(key)? * charge;
    let recharge_available = kit.recharge_demand_kg(key)?;
    let displacement = params.displacement_rate().fraction();

    let recycled_eol = stage_recycled(&params, RecoveryStage::Eol, eol_available) * displacement;
    let recycled_recharge =
        stage_recycled(&params, RecoveryStage::Recharge, recharge_available) * displacement;
    let recycled_total = recycled_eol + recycled_recharge;

    kit.keeper
        .set_stream(key, StreamName::RecycleEol, &kg(recycled_eol), true)?;
    kit.keeper
        .set_stream(key, StreamName::RecycleRecharge, &kg(recycled_recharge), true)?;

    let required = (demand_kg - implicit_kg - recycled_total).max(Decimal::ZERO);

    // Unit-specified sales carry their implicit recharge on top of the
    // virgin requirement, so the demand read stays whole.
    let unit_intent = params
        .last_specified(StreamName::Sales)
        .is_some_and(|value| value.unit().rate_base() == Unit::Units);
    let virgin = if unit_intent && implicit_kg > Decimal::ZERO {
        required + implicit_kg
    } else {
        required
    };

    let distribution = kit.keeper.get_distribution(key, false)?;
    kit.keeper.set_stream(
        key,
        StreamName::Domestic,
        &kg(virgin * distribution.domestic_fraction()),
        false,
    )?;
    kit.keeper.set_stream(
        key,
        StreamName::Import,
        &kg(virgin * distribution.import_fraction()),
        false,
    )?;
    Ok(())
}

fn stage_recycled(params: &Parameterization, stage: RecoveryStage, available: Decimal) -> Decimal {
    let recovery = params.recovery_rate(stage).fraction();
    if recovery <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    available
        * recovery
        * params.yield_rate(stage).fraction()
        * params.induction_rate(stage).fraction()
}

fn kg(amount: Decimal) -> EngineValue {
    EngineValue::new(amount, Unit::Kilograms)
}
