use thiserror::Error;

#[derive(Error, Debug)]
pub enum NoirError {
    #[error("Graph store unreachable: {0}")]
    Connectivity(String),

    #[error("Every dispatched graph query timed out: {}", shapes.join(", "))]
    Timeout { shapes: Vec<String> },

    #[error("Investigation cancelled")]
    Cancelled,

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl NoirError {
    /// Connectivity and total timeouts can succeed if the caller retries the
    /// whole invocation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, NoirError::Connectivity(_) | NoirError::Timeout { .. })
    }
}
