/// Error taxonomy for the simulation core.
/// The run must:
/// - Skip a single diverging trial without failing its batch
/// - Retry a failed batch before giving up on the whole run
/// - Never retry invalid input, cancellation or memory exhaustion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("price path diverged at step {step}: {price}")]
    Divergence { step: usize, price: f64 },

    #[error("simulation canceled after {completed_simulations} trials")]
    Canceled { completed_simulations: usize },

    #[error("batch {batch_index} failed after {attempts} attempts: {reason}")]
    BatchExecutionFailed {
        batch_index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),

    #[error("simulation produced no results")]
    EmptyResultSet,

    #[error("a simulation is already running")]
    AlreadyRunning,

    #[error("invalid controller state: {0}")]
    InvalidState(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SimulationError {
    /// Stable identifier for the presentation layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Divergence { .. } => "divergence",
            Self::Canceled { .. } => "canceled",
            Self::BatchExecutionFailed { .. } => "batch_execution_failed",
            Self::InsufficientMemory(_) => "insufficient_memory",
            Self::EmptyResultSet => "empty_result_set",
            Self::AlreadyRunning => "already_running",
            Self::InvalidState(_) => "invalid_state",
            Self::Config(_) => "config",
        }
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Only generic batch failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Canceled { .. }
                | Self::InvalidParameters(_)
                | Self::InsufficientMemory(_)
                | Self::AlreadyRunning
                | Self::InvalidState(_)
                | Self::Config(_)
        )
    }
}

pub type SimResult<T> = Result<T, SimulationError>;
