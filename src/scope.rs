use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineResult, ScopeError},
    streams::UseKey,
    units::EngineValue,
};

/// Variable names whose reads are derived from the year cursor; writes fail.
pub const RESERVED_YEARS_ELAPSED: &str = "yearsElapsed";
pub const RESERVED_YEAR_ABSOLUTE: &str = "yearAbsolute";

pub fn is_reserved_variable(name: &str) -> bool {
    name == RESERVED_YEARS_ELAPSED || name == RESERVED_YEAR_ABSOLUTE
}

// ================================================================================================
// Scope
// ================================================================================================

/// The hierarchical naming context an operation executes under.
///
/// Immutable: navigation returns a new scope, so an operation that needs a
/// detour (e.g. reading another substance's parameters) restores the
/// original by simply keeping it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    stanza: Option<String>,
    application: Option<String>,
    substance: Option<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stanza(&self, stanza: impl Into<String>) -> Scope {
        Scope {
            stanza: Some(stanza.into()),
            application: None,
            substance: None,
        }
    }

    /// Entering an application clears any substance of the previous one.
    pub fn with_application(&self, application: impl Into<String>) -> Scope {
        Scope {
            stanza: self.stanza.clone(),
            application: Some(application.into()),
            substance: None,
        }
    }

    pub fn with_substance(&self, substance: impl Into<String>) -> Scope {
        Scope {
            stanza: self.stanza.clone(),
            application: self.application.clone(),
            substance: Some(substance.into()),
        }
    }

    pub fn stanza(&self) -> Option<&str> {
        self.stanza.as_deref()
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn substance(&self) -> Option<&str> {
        self.substance.as_deref()
    }

    /// The (application, substance) key this scope addresses, or which half
    /// is missing. `operation` names the caller for the diagnostic.
    pub fn use_key(&self, operation: &str) -> EngineResult<UseKey> {
        let application = self.application.clone().ok_or_else(|| ScopeError::NoApplication {
            operation: operation.to_string(),
        })?;
        let substance = self.substance.clone().ok_or_else(|| ScopeError::NoSubstance {
            operation: operation.to_string(),
        })?;
        Ok(UseKey::new(application, substance))
    }
}

// ================================================================================================
// Variables
// ================================================================================================

/// User variables for the active stanza.
///
/// One table per stanza: entering a stanza starts fresh, and the
/// applications and substances within it share the table. Redefinition
/// replaces the previous value.
#[derive(Debug, Clone, Default)]
pub struct VariableManager {
    values: HashMap<String, EngineValue>,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or redefines) a variable.
    pub fn define(&mut self, name: &str, value: EngineValue) -> EngineResult<()> {
        if is_reserved_variable(name) {
            return Err(ScopeError::ReservedVariable(name.to_string()).into());
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Updates an existing variable.
    pub fn set(&mut self, name: &str, value: EngineValue) -> EngineResult<()> {
        if is_reserved_variable(name) {
            return Err(ScopeError::ReservedVariable(name.to_string()).into());
        }
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ScopeError::UnknownVariable(name.to_string()).into()),
        }
    }

    pub fn get(&self, name: &str) -> Option<EngineValue> {
        self.values.get(name).copied()
    }
}
