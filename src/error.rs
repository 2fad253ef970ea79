/// Custom Result type for varcell operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the varcell library.
///
/// Capacity conditions are deliberately absent: a full cell buffer is the designed
/// backpressure signal, surfaced as `Ok(false)` from the encoding path, never as an
/// error variant.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors opening or reading a call-set source
    #[error("Error reading call-set source: {0}")]
    SourceError(#[from] SourceError),

    /// Configuration/input mismatches against the source header
    #[error("Schema error: {0}")]
    SchemaError(#[from] SchemaError),

    /// Position-tracking or offset-bookkeeping inconsistencies
    #[error("Invariant violation: {0}")]
    InvariantError(#[from] InvariantError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Errors raised while opening, seeking, or advancing a call-set source
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// The source file could not be opened
    #[error("Cannot open call-set source {path}: {source}")]
    CannotOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A record failed to parse; corrupt records are never silently skipped
    #[error("Corrupt record in {path}: {message}")]
    CorruptRecord { path: String, message: String },

    /// The source is closed and the operation requires an open handle
    #[error("Source handle for {0} is closed")]
    HandleClosed(String),
}

/// Errors raised when the query configuration does not match the source header
#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    /// A queried field is absent from the source header
    #[error("Field '{0}' absent from source header")]
    UnknownField(String),

    /// A record's contig is unknown to the id mapper
    #[error("Contig '{0}' not present in id mapper")]
    UnknownContig(String),

    /// A callset named in the source header is unknown to the id mapper
    #[error("Callset '{0}' not present in id mapper")]
    UnknownCallset(String),

    /// A value's observed arity violates the declared cardinality
    #[error("Field '{field}' has {got} values but declares a cardinality of {expected}")]
    ArityViolation {
        field: String,
        expected: usize,
        got: usize,
    },

    /// A queried field has a type the cell encoding does not carry
    #[error("Field '{field}' has unsupported type {ty}")]
    UnsupportedFieldType { field: String, ty: String },
}

/// Invariant violations; these indicate a bug or corrupted input, never backpressure
#[derive(thiserror::Error, Debug)]
pub enum InvariantError {
    /// A record's column lies outside its partition's assigned interval
    #[error("Record at column {column} outside partition interval [{begin}, {end})")]
    RecordOutsidePartition { column: i64, begin: i64, end: i64 },

    /// The begin <= last_full_line_end <= current ordering was broken
    #[error(
        "Offset order violated for callset {callset_idx}: begin={begin} last_full_line_end={last_full_line_end} current={current}"
    )]
    OffsetOrder {
        callset_idx: usize,
        begin: i64,
        last_full_line_end: i64,
        current: i64,
    },

    /// Caller supplied per-partition slices whose lengths disagree with the partition count
    #[error("Expected {expected} per-partition entries, got {got}")]
    PartitionCountMismatch { expected: usize, got: usize },

    /// A partition was asked to run without a bound reader
    #[error("Partition {0} has no reader bound")]
    MissingReader(usize),

    /// A partition positioned at a record lost it before encoding
    #[error("Partition {0} lost its pending record")]
    PendingRecordLost(usize),
}
