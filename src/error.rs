// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// Error types for every subsystem in the engine. Failures that only degrade
// observability (a missing stat, a failed profile write) are recovered and
// logged where they happen; failures that would hand incorrect data to a
// caller are surfaced through these types.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Core Engine Errors
// ----------------------------------------------------------------------------

/// The main error type for the Vigil engine.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum VigilError {
    // ---- Configuration Errors ----
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // ---- Collection Errors ----
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    // ---- Profiler Errors ----
    #[error("Profiler error: {0}")]
    Profiler(#[from] ProfilerError),

    // ---- Storage Errors ----
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // ---- IO Errors ----
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ---- Generic Errors ----
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            VigilError::Config(_) => false,
            VigilError::Collector(e) => e.is_recoverable(),
            VigilError::Profiler(e) => e.is_recoverable(),
            VigilError::Storage(e) => e.is_recoverable(),
            VigilError::Io(_) => true,
            VigilError::Internal(_) => false,
        }
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            VigilError::Config(_) => "config",
            VigilError::Collector(_) => "collector",
            VigilError::Profiler(_) => "profiler",
            VigilError::Storage(_) => "storage",
            VigilError::Io(_) => "io",
            VigilError::Internal(_) => "internal",
        }
    }

    /// Get suggested recovery action
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            VigilError::Config(_) => RecoveryHint::FixConfiguration,
            VigilError::Collector(_) => RecoveryHint::Skip,
            VigilError::Profiler(e) => e.recovery_hint(),
            VigilError::Storage(e) => e.recovery_hint(),
            VigilError::Io(_) => RecoveryHint::RetryWithBackoff,
            VigilError::Internal(_) => RecoveryHint::None,
        }
    }
}

/// Hints for how to recover from an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryHint {
    /// No recovery possible
    None,
    /// Retry with exponential backoff
    RetryWithBackoff,
    /// Fix configuration and restart
    FixConfiguration,
    /// Fix the call site; retrying the same input fails again
    FixCaller,
    /// Skip this item and continue
    Skip,
    /// Install or configure an external tool
    InstallTool,
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        ConfigError::MissingField {
            field: field.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Collector Errors
// ----------------------------------------------------------------------------

/// Errors from OS/process stat sources
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Stat source '{source_name}' unavailable: {message}")]
    StatSourceUnavailable { source_name: String, message: String },

    #[error("Failed to parse '{source_name}': {message}")]
    ParseFailed { source_name: String, message: String },

    #[error("Sub-collector '{domain}' panicked")]
    Panicked { domain: String },
}

impl CollectorError {
    pub fn is_recoverable(&self) -> bool {
        true
    }

    pub fn unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CollectorError::StatSourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn parse_failed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CollectorError::ParseFailed {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Profiler Errors
// ----------------------------------------------------------------------------

/// Errors from the sampling profiler and its collaborators
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Function expects {expected} arguments, got {got}")]
    ArgumentCountMismatch { expected: usize, got: usize },

    #[error("Argument {index} type mismatch: expected {expected}, got {got}")]
    ArgumentTypeMismatch {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("Profile I/O failed for {path}: {message}")]
    ProfileIo { path: PathBuf, message: String },

    #[error("A CPU profile is already being recorded")]
    ProfilingBusy,

    #[error("No CPU profile is being recorded")]
    ProfilingInactive,

    #[error("Profile rendering tool '{tool}' not found")]
    RenderToolUnavailable { tool: String },

    #[error("Profile rendering failed: {message}")]
    RenderFailed { message: String },

    #[error("No metrics recorded for function '{identity}'")]
    FunctionNotFound { identity: String },
}

impl ProfilerError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProfilerError::ArgumentCountMismatch { .. } => false,
            ProfilerError::ArgumentTypeMismatch { .. } => false,
            ProfilerError::RenderToolUnavailable { .. } => false,
            _ => true,
        }
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            ProfilerError::ArgumentCountMismatch { .. }
            | ProfilerError::ArgumentTypeMismatch { .. } => RecoveryHint::FixCaller,
            ProfilerError::ProfilingBusy => RecoveryHint::Skip,
            ProfilerError::RenderToolUnavailable { .. } => RecoveryHint::InstallTool,
            ProfilerError::ProfileIo { .. } => RecoveryHint::RetryWithBackoff,
            _ => RecoveryHint::None,
        }
    }

    pub fn profile_io(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ProfilerError::ProfileIo {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Storage Errors
// ----------------------------------------------------------------------------

/// Errors related to time-series storage and query
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Read failed for '{metric}': {message}")]
    ReadFailed { metric: String, message: String },

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },

    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },
}

impl StorageError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            StorageError::WriteFailed { .. } => true,
            StorageError::ReadFailed { .. } => true,
            _ => false,
        }
    }

    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            StorageError::WriteFailed { .. } | StorageError::ReadFailed { .. } => {
                RecoveryHint::RetryWithBackoff
            }
            _ => RecoveryHint::FixCaller,
        }
    }
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Result type for engine operations
pub type VigilResult<T> = Result<T, VigilError>;

/// Result type for stat source operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Result type for profiler operations
pub type ProfilerResult<T> = Result<T, ProfilerError>;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
