//! Ordering of candidate packages: which of several matching packages should
//! the solver try first.

use std::cmp::Ordering;

use krait_conda_types::RepoDataRecord;

/// Compares two candidates so that the preferred candidate sorts first:
/// higher version, then higher build number, then newer timestamp, then
/// higher channel priority, and finally the file name for determinism.
pub(crate) fn compare_candidates(
    a: &RepoDataRecord,
    a_channel_priority: i32,
    b: &RepoDataRecord,
    b_channel_priority: i32,
) -> Ordering {
    let a_record = &a.package_record;
    let b_record = &b.package_record;

    match b_record.version.cmp(&a_record.version) {
        Ordering::Equal => {}
        ordering => return ordering,
    }
    match b_record.build_number.cmp(&a_record.build_number) {
        Ordering::Equal => {}
        ordering => return ordering,
    }
    match b_record.timestamp.cmp(&a_record.timestamp) {
        Ordering::Equal => {}
        ordering => return ordering,
    }
    match b_channel_priority.cmp(&a_channel_priority) {
        Ordering::Equal => {}
        ordering => return ordering,
    }
    a.file_name.cmp(&b.file_name)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};

    use super::compare_candidates;

    fn record(version: &str, build_number: u64, timestamp: Option<i64>) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked("pkga"),
            Version::from_str(version).unwrap(),
            "0".to_owned(),
        );
        package_record.build_number = build_number;
        package_record.timestamp = timestamp
            .map(|ts| chrono::DateTime::from_timestamp_millis(ts).unwrap());
        RepoDataRecord {
            package_record,
            file_name: format!("pkga-{version}-{build_number}.tar.bz2"),
            url: url::Url::parse("https://example.com/x.tar.bz2").unwrap(),
            channel: None,
        }
    }

    #[test]
    fn higher_versions_sort_first() {
        let newer = record("2.0", 0, None);
        let older = record("1.0", 5, None);
        assert!(compare_candidates(&newer, 0, &older, 0).is_lt());
    }

    #[test]
    fn build_number_breaks_version_ties() {
        let high_build = record("1.0", 3, None);
        let low_build = record("1.0", 1, None);
        assert!(compare_candidates(&high_build, 0, &low_build, 0).is_lt());
    }

    #[test]
    fn timestamp_breaks_build_ties() {
        let newer = record("1.0", 1, Some(2_000));
        let older = record("1.0", 1, Some(1_000));
        assert!(compare_candidates(&newer, 0, &older, 0).is_lt());
    }

    #[test]
    fn channel_priority_breaks_remaining_ties() {
        let a = record("1.0", 1, Some(1_000));
        let b = record("1.0", 1, Some(1_000));
        assert!(compare_candidates(&a, 1, &b, 0).is_lt());
        assert!(compare_candidates(&a, 0, &b, 1).is_gt());
    }
}
