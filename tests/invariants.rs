//! Universal invariants, exercised over mixed operation sequences driven
//! directly against the engine.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use kigali::{Engine, EngineValue, StreamName, Unit, streams::RecoveryStage};

fn engine() -> Engine {
    let mut engine = Engine::new(2025, 2035).unwrap();
    engine.set_stanza("default");
    engine.set_application("domestic refrigeration");
    engine.set_substance("HFC-134a").unwrap();
    engine.enable_stream(StreamName::Domestic).unwrap();
    engine.enable_stream(StreamName::Import).unwrap();
    engine
        .set_initial_charge(
            StreamName::Domestic,
            &EngineValue::new(dec!(0.5), Unit::KilogramsPerUnit),
        )
        .unwrap();
    engine
        .set_initial_charge(
            StreamName::Import,
            &EngineValue::new(dec!(0.5), Unit::KilogramsPerUnit),
        )
        .unwrap();
    engine
        .set_equals(&EngineValue::new(dec!(1430), Unit::TonsCo2ePerMetricTon))
        .unwrap();
    engine
}

fn kg(amount: Decimal) -> EngineValue {
    EngineValue::new(amount, Unit::Kilograms)
}

fn pct(amount: Decimal) -> EngineValue {
    EngineValue::new(amount, Unit::Percent)
}

/// A mixed sequence touching every mutating entry point.
fn mixed_mutations(engine: &mut Engine) {
    engine.set_stream(StreamName::Sales, &kg(dec!(400))).unwrap();
    engine.recharge(&pct(dec!(10)), &EngineValue::new(dec!(0.1), Unit::KilogramsPerUnit))
        .unwrap();
    engine
        .recycle(&pct(dec!(15)), &pct(dec!(80)), RecoveryStage::Recharge, None)
        .unwrap();
    engine.change_stream(StreamName::Domestic, &kg(dec!(25))).unwrap();
    engine.retire(&pct(dec!(4)), false).unwrap();
    engine
        .cap_stream(StreamName::Import, &kg(dec!(120)), None)
        .unwrap();
}

fn assert_stream_identities(engine: &Engine) {
    let tolerance = dec!(0.000001);
    let sales = engine.get_stream(StreamName::Sales).unwrap().amount();
    let domestic = engine.get_stream(StreamName::Domestic).unwrap().amount();
    let import = engine.get_stream(StreamName::Import).unwrap().amount();
    let recycle = engine.get_stream(StreamName::Recycle).unwrap().amount();
    assert!((sales - (domestic + import + recycle)).abs() <= tolerance);

    let recharge = engine.get_stream(StreamName::RecycleRecharge).unwrap().amount();
    let eol = engine.get_stream(StreamName::RecycleEol).unwrap().amount();
    assert!((recycle - (recharge + eol)).abs() <= tolerance);

    for stream in [
        StreamName::Equipment,
        StreamName::PriorEquipment,
        StreamName::Retired,
    ] {
        assert!(
            engine.get_stream(stream).unwrap().amount() >= Decimal::ZERO,
            "{stream} went negative"
        );
    }
}

#[test]
fn stream_identities_hold_across_mixed_mutations_and_years() {
    let mut engine = engine();
    for _ in 0..5 {
        mixed_mutations(&mut engine);
        assert_stream_identities(&engine);
        engine.increment_year().unwrap();
        assert_stream_identities(&engine);
    }
}

#[test]
fn set_then_read_round_trips_exactly() {
    let mut engine = engine();
    engine.set_stream(StreamName::Domestic, &kg(dec!(123.456))).unwrap();
    assert_eq!(
        engine.get_stream(StreamName::Domestic).unwrap().amount(),
        dec!(123.456)
    );

    engine
        .set_stream(
            StreamName::Equipment,
            &EngineValue::new(dec!(42), Unit::Units),
        )
        .unwrap();
    assert_eq!(
        engine.get_stream(StreamName::Equipment).unwrap().amount(),
        dec!(42)
    );
}

#[test]
fn enabling_is_monotonic_within_a_year() {
    let mut engine = engine();
    let key = kigali::UseKey::new("domestic refrigeration", "HFC-134a");
    assert!(engine.keeper().has_stream_been_enabled(&key, StreamName::Domestic).unwrap());
    mixed_mutations(&mut engine);
    assert!(engine.keeper().has_stream_been_enabled(&key, StreamName::Domestic).unwrap());
    assert!(engine.keeper().has_stream_been_enabled(&key, StreamName::Import).unwrap());
}

#[test]
fn year_increment_snapshots_the_population() {
    let mut engine = engine();
    engine.set_stream(StreamName::Sales, &kg(dec!(300))).unwrap();
    let equipment = engine.get_stream(StreamName::Equipment).unwrap().amount();
    engine.increment_year().unwrap();
    assert_eq!(
        engine.get_stream(StreamName::PriorEquipment).unwrap().amount(),
        equipment
    );
}

#[test]
fn split_recovery_matches_a_single_combined_recovery() {
    // recover r1 then r2 at one stage behaves as recover (r1 + r2).
    let run = |rates: &[Decimal]| {
        let mut engine = engine();
        engine.set_stream(StreamName::Sales, &kg(dec!(500))).unwrap();
        engine
            .recharge(&pct(dec!(10)), &EngineValue::new(dec!(0.2), Unit::KilogramsPerUnit))
            .unwrap();
        engine.increment_year().unwrap();
        engine
            .recharge(&pct(dec!(10)), &EngineValue::new(dec!(0.2), Unit::KilogramsPerUnit))
            .unwrap();
        for rate in rates {
            engine
                .recycle(&pct(*rate), &pct(dec!(90)), RecoveryStage::Recharge, None)
                .unwrap();
        }
        (
            engine.get_stream(StreamName::Domestic).unwrap().amount(),
            engine.get_stream(StreamName::Recycle).unwrap().amount(),
        )
    };

    let split = run(&[dec!(10), dec!(15)]);
    let combined = run(&[dec!(25)]);
    assert_eq!(split, combined);
}

#[test]
fn out_of_range_operations_leave_state_untouched() {
    use kigali::{Operation, YearMatcher};

    let mut engine = engine();
    engine.set_stream(StreamName::Sales, &kg(dec!(250))).unwrap();

    let snapshot = |engine: &Engine| {
        [
            StreamName::Domestic,
            StreamName::Import,
            StreamName::Sales,
            StreamName::Equipment,
            StreamName::Consumption,
        ]
        .map(|stream| engine.get_stream(stream).unwrap().amount())
    };
    let before = snapshot(&engine);

    for operation in [
        Operation::set(StreamName::Sales, dec!(999), Unit::Kilograms),
        Operation::retire(dec!(50)),
        Operation::recycle(dec!(30), dec!(90), RecoveryStage::Eol),
        Operation::cap(StreamName::Domestic, dec!(1), Unit::Kilograms),
    ] {
        operation
            .during(YearMatcher::between(2030, 2031))
            .execute(&mut engine)
            .unwrap();
    }

    assert_eq!(snapshot(&engine), before);
}

#[test]
fn yield_rates_survive_the_year_boundary_but_recovery_does_not() {
    let mut engine = engine();
    engine.set_stream(StreamName::Sales, &kg(dec!(500))).unwrap();
    engine
        .recycle(&pct(dec!(20)), &pct(dec!(90)), RecoveryStage::Recharge, None)
        .unwrap();
    engine.increment_year().unwrap();

    let key = kigali::UseKey::new("domestic refrigeration", "HFC-134a");
    let params = engine.keeper().params(&key, "test").unwrap();
    assert!(params.recovery_rate(RecoveryStage::Recharge).is_zero());
    assert_eq!(params.yield_rate(RecoveryStage::Recharge).amount(), dec!(90));
}
