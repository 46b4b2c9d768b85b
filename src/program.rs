use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineResult, SimError},
    ops::Operation,
};

// ================================================================================================
// Parsed-program model
// ================================================================================================

/// A named stanza of operations: the default world, or a policy stacked on
/// top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub operations: Vec<Operation>,
}

/// A named run: a year range and an ordered policy stack applied over the
/// default world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// The contract a parser fulfills: ordered scenarios, each executable
/// against an engine. Anything that can produce this value (a Script
/// Language front-end, JSON, the builder below) drives the engine the same
/// way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub default: Policy,
    #[serde(default)]
    pub policies: Vec<Policy>,
    pub scenarios: Vec<Scenario>,
}

impl Program {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let program: Program =
            serde_json::from_str(json).map_err(crate::error::ReportError::Json)?;
        Ok(program)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self).map_err(crate::error::ReportError::Json)?)
    }

    pub fn scenario_names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn scenario(&self, name: &str) -> EngineResult<&Scenario> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SimError::ScenarioNotFound(name.to_string()).into())
    }

    fn policy(&self, name: &str, scenario: &str) -> EngineResult<&Policy> {
        self.policies
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                SimError::PolicyNotFound {
                    policy: name.to_string(),
                    scenario: scenario.to_string(),
                }
                .into()
            })
    }

    /// The operations a scenario executes each year: the default world
    /// first, then each stacked policy in declaration order. Stack order is
    /// semantic: a cap after a change clips the changed value, a cap before
    /// it does not.
    pub fn stacked_operations(&self, scenario: &Scenario) -> EngineResult<Vec<&Operation>> {
        let mut operations: Vec<&Operation> = self.default.operations.iter().collect();
        for policy_name in &scenario.policies {
            let policy = self.policy(policy_name, &scenario.name)?;
            operations.extend(policy.operations.iter());
        }
        Ok(operations)
    }

    /// Structural checks a front-end runs before execution: orderable year
    /// ranges and resolvable policy references.
    pub fn validate(&self) -> EngineResult<()> {
        for scenario in &self.scenarios {
            if scenario.start_year > scenario.end_year {
                return Err(SimError::InvalidYearRange {
                    start: scenario.start_year,
                    end: scenario.end_year,
                }
                .into());
            }
            for policy_name in &scenario.policies {
                self.policy(policy_name, &scenario.name)?;
            }
        }
        Ok(())
    }
}

// ================================================================================================
// Builder
// ================================================================================================

/// Assembles a program in code; the test suites and embedders use this in
/// place of a parser.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    default_operations: Vec<Operation>,
    policies: Vec<Policy>,
    scenarios: Vec<Scenario>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, operations: Vec<Operation>) -> Self {
        self.default_operations = operations;
        self
    }

    pub fn with_policy(mut self, name: impl Into<String>, operations: Vec<Operation>) -> Self {
        self.policies.push(Policy {
            name: name.into(),
            operations,
        });
        self
    }

    pub fn with_scenario(
        mut self,
        name: impl Into<String>,
        start_year: i32,
        end_year: i32,
        policies: &[&str],
    ) -> Self {
        self.scenarios.push(Scenario {
            name: name.into(),
            start_year,
            end_year,
            policies: policies.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> Program {
        Program {
            default: Policy {
                name: "default".to_string(),
                operations: self.default_operations,
            },
            policies: self.policies,
            scenarios: self.scenarios,
        }
    }
}
