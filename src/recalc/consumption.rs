use crate::{
    error::EngineResult,
    recalc::RecalcKit,
    streams::{StreamName, UseKey},
    units::{EngineValue, Unit},
};

/// Derives virgin consumption: domestic plus import, in tCO2e under the
/// substance's GHG intensity. Recycled supply does not count as
/// consumption.
pub fn recalc(kit: &mut RecalcKit<'_>, key: &UseKey) -> EngineResult<()> {
    let domestic = kit.keeper.get_stream(key, StreamName::Domestic)?.amount();
    let import = kit.keeper.get_stream(key, StreamName::Import)?.amount();
    let tco2e = kit.kg_to_tco2e(key, domestic + import)?;
    kit.keeper.set_stream(
        key,
        StreamName::Consumption,
        &EngineValue::new(tco2e, Unit::TonsCo2e),
        true,
    )
}
