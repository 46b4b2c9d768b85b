use std::io::Write;

use crate::{
    error::{EngineResult, ReportError},
    runner::ResultRow,
};

pub const KEY_COLUMNS: [&str; 5] = ["scenario", "trial", "year", "application", "substance"];

/// Renders result rows as CSV: the five key columns, then the value columns
/// in their fixed order. Cells hold bare decimals; the unit of each column
/// is fixed by the stream it reports.
pub fn write_rows<W: Write>(writer: &mut W, rows: &[ResultRow]) -> EngineResult<()> {
    let header: Vec<&str> = KEY_COLUMNS
        .iter()
        .chain(ResultRow::VALUE_COLUMNS.iter())
        .copied()
        .collect();
    writeln!(writer, "{}", header.join(",")).map_err(ReportError::Io)?;

    for row in rows {
        let mut cells: Vec<String> = vec![
            escape(&row.scenario),
            row.trial.to_string(),
            row.year.to_string(),
            escape(&row.application),
            escape(&row.substance),
        ];
        cells.extend(
            row.values()
                .iter()
                .map(|value| value.amount().normalize().to_string()),
        );
        writeln!(writer, "{}", cells.join(",")).map_err(ReportError::Io)?;
    }
    Ok(())
}

pub fn to_string(rows: &[ResultRow]) -> EngineResult<String> {
    let mut buffer = Vec::new();
    write_rows(&mut buffer, rows)?;
    String::from_utf8(buffer)
        .map_err(|e| ReportError::WriteFailed(e.to_string()).into())
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::{
        ops::Operation,
        program::ProgramBuilder,
        runner::SimulationRunner,
        streams::StreamName,
        units::Unit,
    };

    use super::*;

    #[test]
    fn header_then_one_line_per_row() {
        let program = ProgramBuilder::new()
            .with_default(vec![
                Operation::scope("app", "sub"),
                Operation::enable(StreamName::Domestic),
                Operation::set(StreamName::Domestic, dec!(10), Unit::Kilograms),
            ])
            .with_scenario("BAU", 2025, 2026, &[])
            .build();
        let rows = SimulationRunner::new().run(&program).unwrap();
        let csv = to_string(&rows).unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("scenario,trial,year,application,substance,domestic,"));
        assert!(lines[1].starts_with("BAU,1,2025,app,sub,10,"));
    }

    #[test]
    fn cells_with_commas_are_quoted() {
        assert_eq!(escape("commercial, large"), "\"commercial, large\"");
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
