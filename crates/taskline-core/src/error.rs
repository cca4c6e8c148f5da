use thiserror::Error;

#[derive(Debug, Error)]
pub enum TasklineError {
    #[error("action {0:?} not found")]
    ActionNotFound(String),

    #[error("operation {0:?} not found")]
    OperationNotFound(String),

    #[error("operation {id:?} already finished as {status}")]
    OperationFinished { id: String, status: String },

    #[error("receiver {0:?} not found")]
    ReceiverNotFound(String),

    #[error("receiver {0:?} is not alive")]
    ReceiverNotAlive(String),

    #[error("invalid transition for task {id:?} from {from} to {to}: {reason}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid tag {0:?}")]
    InvalidTag(String),

    #[error("invalid version {0:?}")]
    InvalidVersion(String),

    #[error("invalid action status {0:?}")]
    InvalidStatus(String),

    #[error("state changing too quickly; try again soon")]
    ExcessiveContention,

    #[error("store error: {0}")]
    Store(String),

    /// Displays the whole chain; `inner` is not exposed as `source()`.
    #[error("{context}: {inner}")]
    Annotated {
        context: String,
        inner: Box<TasklineError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TasklineError {
    /// Wrap the error with a description of what was being attempted.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        TasklineError::Annotated {
            context: context.into(),
            inner: Box::new(self),
        }
    }

    /// The innermost error, with annotations peeled off.
    pub fn root(&self) -> &TasklineError {
        match self {
            TasklineError::Annotated { inner, .. } => inner.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            TasklineError::ActionNotFound(_)
                | TasklineError::OperationNotFound(_)
                | TasklineError::ReceiverNotFound(_)
        )
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self.root(), TasklineError::InvalidTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, TasklineError>;
