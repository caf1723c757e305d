use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline construction and execution
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Outcome of a single `Stage::iterate` call
pub type Iteration = std::result::Result<(), Halt>;

/// Errors raised while wiring, building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage declared the same port twice
    #[error("Stage '{stage}' declares port '{port}' more than once")]
    DuplicatePort { stage: String, port: String },

    /// No port with that name and direction exists on the stage
    #[error("Stage '{stage}' has no {direction} port named '{port}'")]
    UnknownPort {
        stage: String,
        port: String,
        direction: &'static str,
    },

    /// The port exists but carries a different item type
    #[error("Port '{port}' on stage '{stage}' carries a different item type")]
    PortTypeMismatch { stage: String, port: String },

    /// The port handle was created by another builder
    #[error("Port '{port}' on stage '{stage}' was not created by this builder")]
    ForeignPort { stage: String, port: String },

    /// Fan-in and fan-out are not supported
    #[error("Port '{port}' on stage '{stage}' is already connected")]
    AlreadyConnected { stage: String, port: String },

    /// Buffers hold at least one item
    #[error("Buffer capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    /// A stage rejected its parameters during `init()`
    #[error("Stage '{stage}' failed to initialize: {source}")]
    StageInit {
        stage: String,
        #[source]
        source: StageError,
    },

    /// Thread spawn or join error
    #[error("Thread error: {0}")]
    ThreadError(String),

    /// The pipeline did not finish within the join timeout
    #[error("Pipeline did not finish within {0:?}")]
    JoinTimeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Errors raised by stage implementations
#[derive(Error, Debug)]
pub enum StageError {
    /// Invalid or missing stage parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A port was used before the pipeline was built
    #[error("Port '{0}' used before the pipeline was built")]
    UnboundPort(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stage execution error
    #[error("Stage execution failed: {0}")]
    Failed(String),
}

/// Why a port operation or an iteration did not complete normally.
///
/// `EndOfStream` and `Interrupted` are control flow, not failures: the runner
/// stops the stage quietly on either. Only `Fault` is reported as an error.
#[derive(Error, Debug)]
pub enum Halt {
    /// The buffer is finished and drained
    #[error("end of stream")]
    EndOfStream,

    /// The pipeline was forcibly interrupted
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Fault(#[from] StageError),
}

impl Halt {
    /// True for the graceful end-of-stream signal
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Halt::EndOfStream)
    }
}

impl From<std::io::Error> for Halt {
    fn from(err: std::io::Error) -> Self {
        Halt::Fault(StageError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_missing() -> Iteration {
        std::fs::read("/definitely/not/here")?;
        Ok(())
    }

    #[test]
    fn test_io_error_becomes_fault() {
        match read_missing() {
            Err(Halt::Fault(StageError::Io(_))) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_stage_init_message() {
        let err = PipelineError::StageInit {
            stage: "scanner".into(),
            source: StageError::InvalidParameter("directory does not exist".into()),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'scanner' failed to initialize: Invalid parameter: directory does not exist"
        );
    }
}
