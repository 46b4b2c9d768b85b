use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Errors raised while parsing or converting dimensional values.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Unknown unit token: '{0}'")]
    UnknownUnit(String),

    #[error("Non-finite value rejected for {context}")]
    NotFinite { context: String },

    #[error("No conversion path from '{from}' to '{to}'")]
    IncompatibleUnits { from: String, to: String },
}

/// Errors raised by the stream keeper while reading or writing state.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("No substance '{substance}' registered for application '{application}' (required by {operation})")]
    MissingSubstance {
        application: String,
        substance: String,
        operation: String,
    },

    #[error("Stream '{stream}' of {application}/{substance} must be enabled before a non-zero value is set")]
    EnableRequired {
        application: String,
        substance: String,
        stream: String,
    },

    #[error("Cannot distribute sales for {application}/{substance}: no sales stream has been enabled")]
    DistributionRequiresEnable {
        application: String,
        substance: String,
    },

    #[error("Cannot set unit-based sales for {application}/{substance}: initial charge is zero")]
    ZeroInitialCharge {
        application: String,
        substance: String,
    },
}

/// Errors raised by scope navigation and user variables.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Variable '{0}' is reserved and cannot be written")]
    ReservedVariable(String),

    #[error("Variable '{0}' is not defined in the current scope")]
    UnknownVariable(String),

    #[error("No application in scope (required by {operation})")]
    NoApplication { operation: String },

    #[error("No substance in scope (required by {operation})")]
    NoSubstance { operation: String },
}

/// Errors raised while executing an operation of the policy vocabulary.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Cannot replace substance '{substance}' with itself")]
    SelfReplace { substance: String },

    #[error("Cannot mix retire with and without replacement for {application}/{substance} in the same step")]
    MixedReplacement {
        application: String,
        substance: String,
    },

    #[error("Invalid amount for {operation}: {msg}")]
    InvalidAmount { operation: String, msg: String },
}

/// Errors raised by the scenario runner and the year cursor.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Cannot advance past the final year {end} (current year {current})")]
    YearExhausted { current: i32, end: i32 },

    #[error("Scenario not found: '{0}'")]
    ScenarioNotFound(String),

    #[error("Policy not found: '{policy}' (required by scenario '{scenario}')")]
    PolicyNotFound { policy: String, scenario: String },

    #[error("Invalid replicate count: {0}")]
    InvalidReplicates(String),

    #[error("Invalid year range (start: {start}, end: {end})")]
    InvalidYearRange { start: i32, end: i32 },
}

/// Errors raised while serializing results or loading programs.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Program deserialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write results: {0}")]
    WriteFailed(String),
}
