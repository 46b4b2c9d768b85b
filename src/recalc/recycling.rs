use rust_decimal::Decimal;

use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{RecoveryStage, StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Recomputes the recycled supply for one lifecycle stage.
///
/// Gated on a non-zero recovery rate for the stage. The available volume is
/// the equipment retiring this year (EOL) or the servicing demand of the
/// installed base (recharge); of that, recovery, yield, induction and
/// displacement determine what actually substitutes virgin material.
pub fn recalc(kit: &mut RecalcKit<'_>, key: &UseKey, stage: RecoveryStage) -> EngineResult<()> {
    let params = kit.keeper.params(key, "recycling recalc")?.clone();
    let recovery = params.recovery_rate(stage).fraction();
    if recovery <= Decimal::ZERO {
        return Ok(());
    }

    let available_kg = match stage {
        RecoveryStage::Eol => {
            let charge = kit.keeper.amortized_initial_charge(key)?;
            kit.eol_units_this_year(key)? * charge
        }
        RecoveryStage::Recharge => kit.recharge_demand_kg(key)?,
    };

    let recycled = available_kg
        * recovery
        * params.yield_rate(stage).fraction()
        * params.induction_rate(stage).fraction()
        * params.displacement_rate().fraction();

    let target = match stage {
        RecoveryStage::Eol => StreamName::RecycleEol,
        RecoveryStage::Recharge => StreamName::RecycleRecharge,
    };
    kit.keeper.set_stream(
        key,
        target,
        &EngineValue::new(recycled, Unit::Kilograms),
        true,
    )
}
