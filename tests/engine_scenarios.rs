//! End-to-end scenario runs driven through the program builder, checking
//! the engine's observable behavior year by year.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use kigali::{
    Operation, Program, ProgramBuilder, ResultRow, SimulationRunner, StreamName, Unit, YearMatcher,
    streams::RecoveryStage,
};

fn rows_for<'a>(rows: &'a [ResultRow], scenario: &str, substance: &str) -> Vec<&'a ResultRow> {
    rows.iter()
        .filter(|row| row.scenario == scenario && row.substance == substance)
        .collect()
}

fn close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

// ------------------------------------------------------------------------------------------------
// Basic recharge with full retirement
// ------------------------------------------------------------------------------------------------

#[test]
fn full_retirement_empties_the_installed_base() {
    let program = ProgramBuilder::new()
        .with_default(vec![
            Operation::scope("domestic refrigeration", "HFC-134a"),
            Operation::enable(StreamName::Domestic),
            Operation::initial_charge(StreamName::Domestic, dec!(1)),
            Operation::recharge(dec!(10), dec!(0.12)),
            Operation::set(StreamName::Sales, dec!(100), Unit::Units)
                .during(YearMatcher::single(2025)),
            Operation::set(StreamName::Sales, dec!(0), Unit::Units)
                .during(YearMatcher::between(2026, 2027)),
            Operation::retire(dec!(100)),
        ])
        .with_scenario("BAU", 2025, 2027, &[])
        .build();

    let rows = SimulationRunner::new().run(&program).unwrap();
    let lineage = rows_for(&rows, "BAU", "HFC-134a");

    assert!(lineage[0].population.amount() > Decimal::ZERO);
    assert!(close(lineage[1].population.amount(), dec!(0), dec!(0.000001)));
    assert!(close(lineage[2].population.amount(), dec!(0), dec!(0.000001)));
}

// ------------------------------------------------------------------------------------------------
// Age / replacement lineage
// ------------------------------------------------------------------------------------------------

#[test]
fn retirement_with_replacement_follows_the_aging_lineage() {
    let program = ProgramBuilder::new()
        .with_default(vec![
            Operation::scope("commercial refrigeration", "HFC-134a"),
            Operation::enable(StreamName::Domestic),
            Operation::initial_charge(StreamName::Domestic, dec!(1)),
            Operation::set(StreamName::PriorEquipment, dec!(1000), Unit::Units)
                .during(YearMatcher::single(2025)),
            Operation::set(StreamName::Sales, dec!(100), Unit::Units)
                .during(YearMatcher::from_year(2026)),
            Operation::retire_with_replacement(dec!(5)),
        ])
        .with_scenario("BAU", 2025, 2027, &[])
        .build();

    let rows = SimulationRunner::new().run(&program).unwrap();
    let lineage = rows_for(&rows, "BAU", "HFC-134a");

    assert!(close(lineage[0].population.amount(), dec!(950), dec!(0.5)));
    assert!(close(lineage[1].population.amount(), dec!(1002.5), dec!(5)));
    assert!(lineage[2].population.amount() > lineage[1].population.amount());
}

// ------------------------------------------------------------------------------------------------
// Policy stacking order-sensitivity
// ------------------------------------------------------------------------------------------------

fn stacking_program() -> Program {
    ProgramBuilder::new()
        .with_default(vec![
            Operation::scope("app", "HFC-32"),
            Operation::enable(StreamName::Domestic),
            Operation::initial_charge(StreamName::Domestic, dec!(1)),
            Operation::set(StreamName::Domestic, dec!(100), Unit::Kilograms),
        ])
        .with_policy(
            "Big Change",
            vec![Operation::change(StreamName::Domestic, dec!(-10), Unit::Percent)],
        )
        .with_policy(
            "Permit",
            vec![Operation::cap(StreamName::Domestic, dec!(80), Unit::Kilograms)],
        )
        .with_scenario("PermitThenBig", 2025, 2034, &["Permit", "Big Change"])
        .with_scenario("BigThenPermit", 2025, 2034, &["Big Change", "Permit"])
        .with_scenario("PermitOnly", 2025, 2034, &["Permit"])
        .with_scenario("BigOnly", 2025, 2034, &["Big Change"])
        .build()
}

#[test]
fn policy_stack_order_changes_the_outcome() {
    let rows = SimulationRunner::new().run(&stacking_program()).unwrap();
    let final_domestic = |scenario: &str| {
        rows_for(&rows, scenario, "HFC-32")
            .last()
            .unwrap()
            .domestic
            .amount()
    };

    let permit_then_big = final_domestic("PermitThenBig");
    let big_then_permit = final_domestic("BigThenPermit");
    let permit_only = final_domestic("PermitOnly");
    let big_only = final_domestic("BigOnly");

    assert_ne!(permit_then_big, big_then_permit);
    assert!(permit_then_big < permit_only);
    assert!(permit_only < big_only);
}

// ------------------------------------------------------------------------------------------------
// Recycling substitutes virgin material
// ------------------------------------------------------------------------------------------------

#[test]
fn recycling_reduces_virgin_supply_at_constant_sales() {
    let base_ops = vec![
        Operation::scope("domestic refrigeration", "HFC-134a"),
        Operation::enable(StreamName::Domestic),
        Operation::enable(StreamName::Import),
        Operation::initial_charge(StreamName::Domestic, dec!(1)),
        Operation::initial_charge(StreamName::Import, dec!(1)),
        Operation::recharge(dec!(10), dec!(0.12)),
        Operation::set(StreamName::Sales, dec!(500), Unit::Kilograms),
    ];

    let program = ProgramBuilder::new()
        .with_default(base_ops)
        .with_policy(
            "Recovery",
            vec![
                Operation::recycle(dec!(20), dec!(90), RecoveryStage::Recharge)
                    .during(YearMatcher::from_year(2027)),
            ],
        )
        .with_scenario("BAU", 2025, 2030, &[])
        .with_scenario("Recovery", 2025, 2030, &["Recovery"])
        .build();

    let rows = SimulationRunner::new().run(&program).unwrap();
    let bau = rows_for(&rows, "BAU", "HFC-134a");
    let recovery = rows_for(&rows, "Recovery", "HFC-134a");

    for (baseline, recycled) in bau.iter().zip(&recovery) {
        let virgin_baseline = baseline.domestic.amount() + baseline.import.amount();
        let virgin_recycled = recycled.domestic.amount() + recycled.import.amount();
        let sales_baseline = virgin_baseline + baseline.recycle.amount();
        let sales_recycled = virgin_recycled + recycled.recycle.amount();

        assert!(close(sales_recycled, sales_baseline, dec!(0.000001)));
        if recycled.year >= 2027 {
            assert!(recycled.recycle.amount() > Decimal::ZERO);
            assert!(virgin_recycled < virgin_baseline);
        } else {
            assert_eq!(virgin_recycled, virgin_baseline);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Replacement across substances preserves total equipment
// ------------------------------------------------------------------------------------------------

#[test]
fn replacement_across_substances_preserves_total_equipment() {
    let base_ops = vec![
        Operation::scope("domestic refrigeration", "HFC-134a"),
        Operation::enable(StreamName::Domestic),
        Operation::initial_charge(StreamName::Domestic, dec!(1)),
        Operation::set(StreamName::Sales, dec!(100), Unit::Kilograms),
        Operation::scope("domestic refrigeration", "R-600a"),
        Operation::enable(StreamName::Domestic),
        Operation::initial_charge(StreamName::Domestic, dec!(1)),
        Operation::set(StreamName::Sales, dec!(50), Unit::Kilograms),
    ];

    let program = ProgramBuilder::new()
        .with_default(base_ops)
        .with_policy(
            "Transition",
            vec![
                Operation::scope("domestic refrigeration", "HFC-134a"),
                Operation::replace(dec!(100), Unit::Percent, StreamName::Sales, "R-600a")
                    .during(YearMatcher::from_year(2027)),
            ],
        )
        .with_scenario("BAU", 2025, 2030, &[])
        .with_scenario("Transition", 2025, 2030, &["Transition"])
        .build();

    let rows = SimulationRunner::new().run(&program).unwrap();

    for year in 2025..=2030 {
        let total = |scenario: &str| {
            rows.iter()
                .filter(|row| row.scenario == scenario && row.year == year)
                .map(|row| row.population.amount())
                .sum::<Decimal>()
        };
        assert!(
            close(total("Transition"), total("BAU"), dec!(0.000001)),
            "total equipment diverged in {year}"
        );
    }

    // The transition actually moved material.
    let hfc_final = rows_for(&rows, "Transition", "HFC-134a").last().unwrap().domestic.amount();
    let bau_final = rows_for(&rows, "BAU", "HFC-134a").last().unwrap().domestic.amount();
    assert!(hfc_final < bau_final);
}

// ------------------------------------------------------------------------------------------------
// Self-replacement is rejected
// ------------------------------------------------------------------------------------------------

#[test]
fn self_replacement_fails_with_a_diagnostic() {
    let program = ProgramBuilder::new()
        .with_default(vec![
            Operation::scope("app", "HFC-134a"),
            Operation::enable(StreamName::Import),
            Operation::initial_charge(StreamName::Import, dec!(1)),
            Operation::set(StreamName::Import, dec!(100), Unit::Kilograms),
            Operation::replace(dec!(50), Unit::Percent, StreamName::Import, "HFC-134a"),
        ])
        .with_scenario("BAU", 2025, 2026, &[])
        .build();

    let err = SimulationRunner::new().run(&program).unwrap_err();
    assert!(err.to_string().contains("itself"));
}
