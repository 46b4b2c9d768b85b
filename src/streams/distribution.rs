use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineResult, StreamError},
    streams::{StreamName, UseKey},
};

/// The split of a sales total across the virgin substreams, in percent.
///
/// Shares always sum to 100 when any relevant stream is enabled; export is
/// forced to zero when it is excluded from the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesDistribution {
    domestic: Decimal,
    import: Decimal,
    export: Decimal,
}

impl SalesDistribution {
    pub fn domestic_pct(&self) -> Decimal {
        self.domestic
    }

    pub fn import_pct(&self) -> Decimal {
        self.import
    }

    pub fn export_pct(&self) -> Decimal {
        self.export
    }

    pub fn domestic_fraction(&self) -> Decimal {
        self.domestic / Decimal::ONE_HUNDRED
    }

    pub fn import_fraction(&self) -> Decimal {
        self.import / Decimal::ONE_HUNDRED
    }

    pub fn export_fraction(&self) -> Decimal {
        self.export / Decimal::ONE_HUNDRED
    }

    pub fn fraction_of(&self, stream: StreamName) -> Decimal {
        match stream {
            StreamName::Domestic => self.domestic_fraction(),
            StreamName::Import => self.import_fraction(),
            StreamName::Export => self.export_fraction(),
            _ => Decimal::ZERO,
        }
    }

    /// Computes the distribution from current kg values and enablement.
    ///
    /// Priority: proportional to values when anything is non-zero; 100% to a
    /// single enabled stream; an equal split across several enabled streams
    /// that are all zero. With nothing enabled there is no defensible split
    /// and the caller gets an error.
    pub fn compute(
        key: &UseKey,
        domestic_kg: Decimal,
        import_kg: Decimal,
        export_kg: Decimal,
        enabled: impl Fn(StreamName) -> bool,
        include_exports: bool,
    ) -> EngineResult<SalesDistribution> {
        let mut entries: Vec<(StreamName, Decimal, bool)> = vec![
            (StreamName::Domestic, domestic_kg, enabled(StreamName::Domestic)),
            (StreamName::Import, import_kg, enabled(StreamName::Import)),
        ];
        if include_exports {
            entries.push((StreamName::Export, export_kg, enabled(StreamName::Export)));
        }

        let sum: Decimal = entries.iter().map(|(_, kg, _)| *kg).sum();
        let enabled_count = entries.iter().filter(|(_, _, on)| *on).count();

        let shares: Vec<(StreamName, Decimal)> = if sum > Decimal::ZERO {
            entries
                .iter()
                .map(|(name, kg, _)| (*name, kg / sum * Decimal::ONE_HUNDRED))
                .collect()
        } else if enabled_count == 0 {
            return Err(StreamError::DistributionRequiresEnable {
                application: key.application().to_string(),
                substance: key.substance().to_string(),
            }
            .into());
        } else {
            let equal = Decimal::ONE_HUNDRED / Decimal::from(enabled_count as u32);
            entries
                .iter()
                .map(|(name, _, on)| (*name, if *on { equal } else { Decimal::ZERO }))
                .collect()
        };

        let mut distribution = SalesDistribution {
            domestic: Decimal::ZERO,
            import: Decimal::ZERO,
            export: Decimal::ZERO,
        };
        for (name, share) in shares {
            match name {
                StreamName::Domestic => distribution.domestic = share,
                StreamName::Import => distribution.import = share,
                StreamName::Export => distribution.export = share,
                _ => {}
            }
        }
        Ok(distribution)
    }
}
