//! The transaction: the planned difference between the current and the
//! desired state of a prefix.

use std::collections::HashMap;

use krait_conda_types::{history::HistoryEntry, PackageRecord, Platform};

use super::python::{PythonInfo, PythonInfoError};

/// An error while deriving a transaction.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The python version of the environment could not be interpreted.
    #[error(transparent)]
    PythonInfoError(#[from] PythonInfoError),
}

/// A single operation of a transaction.
#[derive(Debug)]
pub enum TransactionOperation<Old, New> {
    /// Install a package that was not present before.
    Install(New),

    /// Remove the old package and install the new one in its place.
    Change {
        /// The installed record to remove.
        old: Old,

        /// The record to install instead.
        new: New,
    },

    /// Unlink and relink the same package. Happens to noarch python
    /// packages when the python version changes underneath them.
    Reinstall(Old),

    /// Remove a package.
    Remove(Old),
}

impl<Old: AsRef<New>, New> TransactionOperation<Old, New> {
    /// The record that ends up installed by this operation, if any.
    pub fn record_to_install(&self) -> Option<&New> {
        match self {
            TransactionOperation::Install(new) => Some(new),
            TransactionOperation::Change { new, .. } => Some(new),
            TransactionOperation::Reinstall(old) => Some(old.as_ref()),
            TransactionOperation::Remove(_) => None,
        }
    }
}

impl<Old, New> TransactionOperation<Old, New> {
    /// The record that is removed by this operation, if any.
    pub fn record_to_remove(&self) -> Option<&Old> {
        match self {
            TransactionOperation::Install(_) => None,
            TransactionOperation::Change { old, .. } => Some(old),
            TransactionOperation::Reinstall(old) => Some(old),
            TransactionOperation::Remove(old) => Some(old),
        }
    }
}

/// The ordered list of operations that brings a prefix from its current
/// state to the desired state. Produced by [`Transaction::from_current_and_desired`],
/// consumed once by the installer.
pub struct Transaction<Old, New> {
    /// The operations to apply.
    pub operations: Vec<TransactionOperation<Old, New>>,

    /// The python of the desired state, if the environment contains one.
    pub python_info: Option<PythonInfo>,

    /// The platform the transaction applies to.
    pub platform: Platform,
}

impl<Old, New> Transaction<Old, New> {
    /// Returns true if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<Old: AsRef<PackageRecord>, New: AsRef<PackageRecord>> Transaction<Old, New> {
    /// Diffs the current against the desired state. When the python version
    /// changes, every noarch python package that would otherwise stay
    /// untouched is scheduled for a reinstall, because its files must move
    /// to the new site-packages directory.
    pub fn from_current_and_desired<
        CurIter: IntoIterator<Item = Old>,
        NewIter: IntoIterator<Item = New>,
    >(
        current: CurIter,
        desired: NewIter,
        platform: Platform,
    ) -> Result<Self, TransactionError>
    where
        CurIter::IntoIter: Clone,
        NewIter::IntoIter: Clone,
    {
        Self::from_current_and_desired_with_reinstalls(current, desired, &[], platform)
    }

    /// Like [`Transaction::from_current_and_desired`], but additionally
    /// forces a reinstall of the named packages even when their records did
    /// not change.
    pub fn from_current_and_desired_with_reinstalls<
        CurIter: IntoIterator<Item = Old>,
        NewIter: IntoIterator<Item = New>,
    >(
        current: CurIter,
        desired: NewIter,
        force_reinstall: &[krait_conda_types::PackageName],
        platform: Platform,
    ) -> Result<Self, TransactionError>
    where
        CurIter::IntoIter: Clone,
        NewIter::IntoIter: Clone,
    {
        let current = current.into_iter();
        let desired = desired.into_iter();

        let current_python_info = find_python_info(current.clone(), platform)?;
        let desired_python_info = find_python_info(desired.clone(), platform)?;
        let needs_python_relink = match (&current_python_info, &desired_python_info) {
            (Some(current), Some(desired)) => desired.is_relink_required(current),
            _ => false,
        };

        let mut desired: HashMap<String, New> = desired
            .map(|record| {
                (
                    record.as_ref().name.as_normalized().to_owned(),
                    record,
                )
            })
            .collect();

        let mut operations = Vec::new();

        for record in current {
            match desired.remove(record.as_ref().name.as_normalized()) {
                None => operations.push(TransactionOperation::Remove(record)),
                Some(desired_record) => {
                    let forced = force_reinstall
                        .iter()
                        .any(|name| name == &record.as_ref().name);
                    if desired_record.as_ref() != record.as_ref() {
                        operations.push(TransactionOperation::Change {
                            old: record,
                            new: desired_record,
                        });
                    } else if forced
                        || (desired_record.as_ref().noarch.is_python() && needs_python_relink)
                    {
                        operations.push(TransactionOperation::Reinstall(record));
                    }
                }
            }
        }

        // Whatever remains in the desired map is new.
        for record in desired.into_values() {
            operations.push(TransactionOperation::Install(record));
        }

        Ok(Self {
            operations,
            python_info: desired_python_info,
            platform,
        })
    }

    /// Produces the history entry that records this transaction: the
    /// requested specs plus the canonical names of everything linked and
    /// unlinked.
    pub fn history_entry(
        &self,
        command: Option<String>,
        requested_specs: Vec<String>,
    ) -> HistoryEntry {
        let mut linked = Vec::new();
        let mut unlinked = Vec::new();
        for operation in &self.operations {
            match operation {
                TransactionOperation::Install(new) => linked.push(canonical_name(new.as_ref())),
                TransactionOperation::Change { old, new } => {
                    unlinked.push(canonical_name(old.as_ref()));
                    linked.push(canonical_name(new.as_ref()));
                }
                TransactionOperation::Reinstall(old) => {
                    unlinked.push(canonical_name(old.as_ref()));
                    linked.push(canonical_name(old.as_ref()));
                }
                TransactionOperation::Remove(old) => unlinked.push(canonical_name(old.as_ref())),
            }
        }
        HistoryEntry {
            timestamp: None,
            command,
            update_specs: requested_specs,
            linked,
            unlinked,
        }
    }
}

fn canonical_name(record: &PackageRecord) -> String {
    format!("{record}")
}

/// Finds the python of a record set.
fn find_python_info(
    records: impl IntoIterator<Item = impl AsRef<PackageRecord>>,
    platform: Platform,
) -> Result<Option<PythonInfo>, PythonInfoError> {
    records
        .into_iter()
        .find(|r| is_python_record(r.as_ref()))
        .map(|record| PythonInfo::from_python_record(record.as_ref(), platform))
        .map_or(Ok(None), |info| info.map(Some))
}

fn is_python_record(record: &PackageRecord) -> bool {
    record.name.as_normalized() == "python"
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{
        NoArchType, PackageName, PackageRecord, Platform, RepoDataRecord, Version,
    };

    use super::{Transaction, TransactionOperation};

    fn record(name: &str, version: &str) -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked(name),
                Version::from_str(version).unwrap(),
                "0".to_owned(),
            ),
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: url::Url::parse(&format!("https://example.com/{name}-{version}-0.tar.bz2"))
                .unwrap(),
            channel: None,
        }
    }

    fn noarch_python_record(name: &str, version: &str) -> RepoDataRecord {
        let mut record = record(name, version);
        record.package_record.noarch = NoArchType::python();
        record
    }

    #[test]
    fn diffing_produces_the_expected_operations() {
        let current = vec![record("keep", "1.0"), record("upgrade", "1.0"), record("drop", "1.0")];
        let desired = vec![record("keep", "1.0"), record("upgrade", "2.0"), record("add", "1.0")];

        let transaction =
            Transaction::from_current_and_desired(current, desired, Platform::Linux64).unwrap();

        let mut installs = Vec::new();
        let mut removes = Vec::new();
        let mut changes = Vec::new();
        for op in &transaction.operations {
            match op {
                TransactionOperation::Install(new) => {
                    installs.push(new.package_record.name.as_normalized().to_owned());
                }
                TransactionOperation::Remove(old) => {
                    removes.push(old.package_record.name.as_normalized().to_owned());
                }
                TransactionOperation::Change { old, .. } => {
                    changes.push(old.package_record.name.as_normalized().to_owned());
                }
                TransactionOperation::Reinstall(_) => panic!("no reinstalls expected"),
            }
        }
        assert_eq!(installs, vec!["add"]);
        assert_eq!(removes, vec!["drop"]);
        assert_eq!(changes, vec!["upgrade"]);
    }

    #[test]
    fn python_version_change_reinstalls_noarch_packages() {
        let current = vec![
            record("python", "3.10.4"),
            noarch_python_record("purelib", "1.0"),
            record("native", "1.0"),
        ];
        let desired = vec![
            record("python", "3.11.0"),
            noarch_python_record("purelib", "1.0"),
            record("native", "1.0"),
        ];

        let transaction =
            Transaction::from_current_and_desired(current, desired, Platform::Linux64).unwrap();

        let reinstalls: Vec<_> = transaction
            .operations
            .iter()
            .filter_map(|op| match op {
                TransactionOperation::Reinstall(old) => {
                    Some(old.package_record.name.as_normalized().to_owned())
                }
                _ => None,
            })
            .collect();
        assert_eq!(reinstalls, vec!["purelib"]);

        // A patch level bump does not relink anything.
        let current = vec![record("python", "3.11.0"), noarch_python_record("purelib", "1.0")];
        let desired = vec![record("python", "3.11.4"), noarch_python_record("purelib", "1.0")];
        let transaction =
            Transaction::from_current_and_desired(current, desired, Platform::Linux64).unwrap();
        assert!(transaction.operations.iter().all(|op| !matches!(
            op,
            TransactionOperation::Reinstall(_)
        )));
    }

    #[test]
    fn forced_reinstalls_apply_to_unchanged_packages() {
        let current = vec![record("keep", "1.0"), record("redo", "1.0")];
        let desired = vec![record("keep", "1.0"), record("redo", "1.0")];
        let transaction = Transaction::from_current_and_desired_with_reinstalls(
            current,
            desired,
            &[krait_conda_types::PackageName::new_unchecked("redo")],
            Platform::Linux64,
        )
        .unwrap();

        assert_eq!(transaction.operations.len(), 1);
        assert!(matches!(
            &transaction.operations[0],
            TransactionOperation::Reinstall(old)
                if old.package_record.name.as_normalized() == "redo"
        ));
    }

    #[test]
    fn history_entries_record_links_and_unlinks() {
        let current = vec![record("drop", "1.0")];
        let desired = vec![record("add", "2.0")];
        let transaction =
            Transaction::from_current_and_desired(current, desired, Platform::Linux64).unwrap();

        let entry = transaction.history_entry(
            Some("install add".to_owned()),
            vec!["add".to_owned()],
        );
        assert_eq!(entry.linked, vec!["add-2.0-0"]);
        assert_eq!(entry.unlinked, vec!["drop-1.0-0"]);
        assert_eq!(entry.update_specs, vec!["add"]);
    }
}
