use thiserror::Error;

pub type RemateResult<T> = Result<T, RemateError>;

#[derive(Debug, Error)]
pub enum RemateError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    System(#[from] SystemError),
}

impl RemateError {
    /// Machine-readable category surfaced in the single startup ERROR log
    /// when the core refuses to enter the tick loop.
    pub fn category(&self) -> &'static str {
        match self {
            RemateError::Scenario(_) => "scenario",
            RemateError::Wire(_) => "wire",
            RemateError::Store(_) => "store",
            RemateError::Collector(_) => "collector",
            RemateError::Engine(_) => "engine",
            RemateError::System(_) => "system",
        }
    }
}

/// Errors in the replay scenario document: structure, ordering, wire probes.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("Failed to deserialize scenario: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Missing required scenario field: {0}")]
    MissingField(String),

    #[error("Timeline is not strictly ascending at tick {0}")]
    NonMonotonicTimeline(u64),

    #[error("Unsupported HTTP status in timeline entry {tick}: {status}")]
    UnsupportedStatus { tick: u64, status: u16 },

    #[error("Timeline entry {tick} carries a malformed portal payload: {msg}")]
    MalformedPayload { tick: u64, msg: String },
}

/// Errors parsing the portal wire format or talking to the portal.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Malformed portal envelope: {0}")]
    Envelope(String),

    #[error("Expected `@@`-delimited payload with {expected} segments, found {found}")]
    Segmentation { expected: usize, found: usize },

    #[error("Failed to parse offers array: {0}")]
    Offers(String),

    #[error("Unparseable money string: '{0}'")]
    Money(String),

    #[error("HTTP request failed: {0}")]
    Request(String),
}

/// Errors raised by the store boundary. The engine retries a failed write
/// once and then escalates to STOP (reason "store failure").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown auction: {0}")]
    UnknownAuction(String),

    #[error("Unknown line item: {0}")]
    UnknownLineItem(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Store write failed: {0}")]
    WriteFailed(String),

    #[error("Store read failed: {0}")]
    ReadFailed(String),
}

/// Errors in collector startup and the tick loop. Once the loop is running,
/// failures convert into HTTP_ERROR or LOG events instead of crossing the
/// queue boundary as errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,

    #[error("Collector start failed: {0}")]
    StartFailed(String),

    #[error("No session capture available: {0}")]
    NoSession(String),

    #[error("Event queue closed: {0}")]
    QueueClosed(String),
}

/// Errors in engine dispatch and emission.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Processed-event queue closed: {0}")]
    QueueClosed(String),

    #[error("Control queue closed: {0}")]
    ControlClosed(String),
}

/// Internal invariants and bugs. These are fatal per the error taxonomy.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Missing internal field: {0}")]
    MissingField(String),

    #[error("System error: {0}")]
    Generic(String),
}
