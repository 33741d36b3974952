//! The error taxonomy of a krait run and its mapping to process exit codes.

use thiserror::Error;

/// Exit codes of the process, stable across releases:
///
/// * 0: success
/// * 1: generic failure
/// * 2: invalid user input
/// * 3: package or repodata not found
/// * 4: the solver found the request unsatisfiable
/// * 5: download or extraction failure
/// * 6: trust verification failure
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExitCode(pub i32);

/// The top level error type, aggregating the failures of the subsystems.
#[derive(Debug, Error)]
pub enum KraitError {
    /// A user provided spec or channel string could not be parsed.
    #[error(transparent)]
    InvalidMatchSpec(#[from] krait_conda_types::ParseMatchSpecError),

    /// A user provided channel string could not be parsed.
    #[error(transparent)]
    InvalidChannel(#[from] krait_conda_types::ParseChannelError),

    /// Fetching repodata failed.
    #[error(transparent)]
    FetchRepoData(#[from] krait_repodata::fetch::FetchRepoDataError),

    /// Dependency resolution failed.
    #[error(transparent)]
    Solve(#[from] krait_solve::SolveError),

    /// Downloading, extracting or linking packages failed.
    #[error(transparent)]
    Installer(#[from] crate::installer::InstallerError),

    /// Content trust verification failed.
    #[error(transparent)]
    Trust(#[from] krait_trust::TrustError),

    /// The operation was interrupted.
    #[error(transparent)]
    Interrupted(#[from] krait_networking::Interrupted),

    /// An io error outside of any of the subsystems.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KraitError {
    /// Maps the error to the exit code of the process.
    pub fn exit_code(&self) -> ExitCode {
        use krait_repodata::fetch::FetchRepoDataError;
        ExitCode(match self {
            KraitError::InvalidMatchSpec(_) | KraitError::InvalidChannel(_) => 2,
            KraitError::FetchRepoData(FetchRepoDataError::NotFound(_)) => 3,
            KraitError::FetchRepoData(_) => 5,
            KraitError::Solve(krait_solve::SolveError::Unsolvable(_)) => 4,
            KraitError::Solve(_) => 2,
            KraitError::Installer(e) => e.exit_code().0,
            KraitError::Trust(_) => 6,
            KraitError::Interrupted(_) | KraitError::Io(_) => 1,
        })
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::MatchSpec;

    use super::KraitError;

    #[test]
    fn exit_codes() {
        let parse_error = MatchSpec::from_str("").unwrap_err();
        assert_eq!(KraitError::from(parse_error).exit_code().0, 2);

        let unsolvable = krait_solve::SolveError::Unsolvable("nope".to_owned());
        assert_eq!(KraitError::from(unsolvable).exit_code().0, 4);
    }
}
