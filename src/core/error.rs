use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CurrencyError {
    #[error("no exchange rate for {currency} (base {base})")]
    MissingRate { currency: String, base: String },
    #[error("exchange rate for {currency} must be a positive finite number, got {rate}")]
    InvalidRate { currency: String, rate: f64 },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Currency(#[from] CurrencyError),
    #[error("age {age}: {message}")]
    Year { age: u32, message: String },
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("unsupported schema version {found} (latest is {latest})")]
    UnsupportedVersion { found: u64, latest: u64 },
    #[error("{entity}[{index}]: required field `{field}` is missing")]
    MissingField {
        entity: &'static str,
        index: usize,
        field: &'static str,
    },
}
