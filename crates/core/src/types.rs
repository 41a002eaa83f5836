/// Server-side execution identifiers are opaque strings (the backend
/// hands out UUID-like ids).
pub type ExecutionId = String;

/// Test-case primary keys are 64-bit integers.
pub type CaseId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
