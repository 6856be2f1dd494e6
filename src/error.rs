use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("cannot run stage '{stage}' without input")]
    MissingInput { stage: String },

    #[error("cannot run stage '{stage}' without an operation")]
    MissingOperation { stage: String },

    #[error("stage '{stage}' has both an elementwise chain and an aggregate operation")]
    ConflictingOperation { stage: String },

    #[error("stage '{stage}' failed to apply op to val {value} on row {row} of col ({column}) with op msg: {message}")]
    ElementOperation {
        stage: String,
        column: String,
        row: usize,
        value: f64,
        message: String,
    },

    #[error("stage '{stage}' was cancelled after another stage failed")]
    Cancelled { stage: String },

    #[error("stage '{stage}' failed to perform aggregate op on col ({column}), err: {message}")]
    AggregateOperation {
        stage: String,
        column: String,
        message: String,
    },

    #[error("source has {raw} columns but {bound} stage bindings ({missing} unbound)")]
    UnboundColumns {
        raw: usize,
        bound: usize,
        missing: usize,
    },

    #[error("source column '{column}' has no bound stage")]
    UnboundColumn { column: String },

    #[error("cannot run a flow without a source")]
    NoSource,

    #[error("cannot run a flow without a sink")]
    NoSink,

    #[error("a {kind} is already registered")]
    DuplicateRegistration { kind: &'static str },

    #[error("readiness queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("junction '{junction}' never ran: upstream stage '{upstream}' did not complete")]
    StalledJunction { junction: String, upstream: String },

    #[error("cannot create a sink without stages")]
    EmptySink,

    #[error("failed to {action} the file located at: {path}: {source}")]
    FileAccess {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("the file located at {path} has no content")]
    EmptyInput { path: String },

    #[error("cannot parse value '{value}' on row {row} of col ({column}) as a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error("column '{column}' appears more than once in {path}")]
    DuplicateColumn { column: String, path: String },

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("column worker pool closed: {0}")]
    WorkerPool(#[from] tokio::sync::AcquireError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, FlowError>;
