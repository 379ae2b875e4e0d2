#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Mission or catalog configuration that cannot be used to build a pipeline.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Two entries of one position specification resolve to the same trigger.
    #[error("duplicate trigger {0} in position specification")]
    DuplicateTrigger(String),

    /// Sub-commutation columns must be strictly ascending.
    #[error("sub-commutation columns for {group} are not ascending: {columns:?}")]
    UnsortedColumns { group: String, columns: Vec<usize> },

    #[error("invalid calibration curve: {0}")]
    Curve(String),

    #[error("no position specification for mode {0}")]
    UnknownMode(String),

    /// A position specification was asked to read bytes it cannot reach.
    #[error("extraction fault: {0}")]
    Extraction(String),

    /// A byte was delivered to a tracker that does not own its position.
    #[error("dispatch fault: {0}")]
    Dispatch(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("engine stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;
