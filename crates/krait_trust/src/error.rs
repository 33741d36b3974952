use thiserror::Error;

/// The ways trust verification can fail. The variants mirror the stages of
/// the verification pipeline: file naming, metadata parsing, signature
/// thresholds, version monotonicity, expiration, and spec versioning.
#[derive(Debug, Error)]
pub enum TrustError {
    /// A role file name does not follow the required pattern, or its embedded
    /// version does not match the version recorded inside the file.
    #[error("invalid role file: {0}")]
    RoleFile(String),

    /// A role file is missing required fields or they have the wrong shape.
    #[error("invalid role metadata: {0}")]
    RoleMetadata(String),

    /// Not enough distinct valid signatures to meet a role's threshold.
    #[error("role '{role}' requires {threshold} valid signatures, found {valid}")]
    Role {
        /// The role whose threshold was not met.
        role: String,
        /// The required number of signatures.
        threshold: u32,
        /// The number of valid distinct signatures found.
        valid: u32,
    },

    /// A successor root decreased or skipped the version counter.
    #[error("rollback detected: expected root version {expected}, found {found}")]
    Rollback {
        /// The version the chain expected next.
        expected: u32,
        /// The version actually found in the file.
        found: u32,
    },

    /// An expired role was encountered.
    #[error("role '{role}' expired at {expiration}")]
    Freeze {
        /// The expired role.
        role: String,
        /// The recorded expiration time.
        expiration: chrono::DateTime<chrono::Utc>,
    },

    /// The metadata declares a spec version this implementation does not
    /// accept at this point in the chain.
    #[error("unsupported metadata spec version transition: {0}")]
    SpecVersion(String),

    /// Reading a role file from disk failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A role file is not valid JSON.
    #[error("failed to parse role metadata")]
    Json(#[from] serde_json::Error),

    /// Fetching a role file from the channel failed.
    #[error("failed to fetch role metadata")]
    Http(#[from] reqwest::Error),
}
