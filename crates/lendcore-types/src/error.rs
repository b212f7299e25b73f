use thiserror::Error;

/// Errors raised by agent task execution.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("task failed after {attempts} attempts: {customer_message}")]
    TaskFailed {
        attempts: u32,
        customer_message: String,
    },

    #[error("agent '{agent}' cannot execute task kind '{task}'")]
    UnsupportedTask { agent: String, task: String },

    #[error("missing task input: {0}")]
    MissingInput(String),

    #[error("required context data '{0}' is not available")]
    MissingContextData(String),

    #[error("invalid task input: {0}")]
    InvalidInput(String),

    #[error("external service error: {0}")]
    Gateway(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from session and context management.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("invalid stage transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("agent '{0}' is not registered for this session")]
    AgentNotRegistered(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from the resilient external API gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("circuit open for '{0}'")]
    CircuitOpen(String),

    #[error("customer '{0}' not found")]
    CustomerNotFound(String),

    #[error("request to '{api}' failed: {message}")]
    Request { api: String, message: String },

    #[error("response validation failed for '{api}': {errors:?}")]
    InvalidResponse { api: String, errors: Vec<String> },

    #[error("request to '{api}' timed out after {seconds}s")]
    Timeout { api: String, seconds: u64 },

    #[error("'{api}' exhausted after {attempts} attempts: {message}")]
    Exhausted {
        api: String,
        attempts: u32,
        message: String,
    },
}

/// Errors from loan term calculations.
#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("principal amount must be positive")]
    NonPositivePrincipal,

    #[error("interest rate cannot be negative")]
    NegativeRate,

    #[error("tenure must be positive")]
    NonPositiveTenure,

    #[error("principal exceeds maximum loan amount of \u{20b9}{0}")]
    PrincipalTooLarge(u64),

    #[error("tenure exceeds maximum of {0} months")]
    TenureTooLong(u32),

    #[error("EMI too low to cover interest")]
    EmiBelowInterest,
}

/// Errors from domain record validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid phone number format: '{0}'")]
    InvalidPhone(String),

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("invalid employment type: '{0}'")]
    InvalidEmploymentType(String),

    #[error("credit score {0} outside allowed range 300-900")]
    CreditScoreOutOfRange(i32),

    #[error("loan amount must be positive and at most \u{20b9}1 crore")]
    AmountOutOfRange,

    #[error("tenure must be between 6 and 360 months")]
    TenureOutOfRange,

    #[error("interest rate must be between 0 and 50 percent")]
    RateOutOfRange,
}
