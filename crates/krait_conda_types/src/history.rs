//! The append-only `conda-meta/history` log: one entry per transaction,
//! recording the user request and the link/unlink operations performed.

use std::{
    io::Write,
    path::Path,
};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// A single transaction in the history file.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HistoryEntry {
    /// The moment the transaction was recorded.
    pub timestamp: Option<DateTime<Utc>>,

    /// The command line that caused the transaction.
    pub command: Option<String>,

    /// The specs the user requested.
    pub update_specs: Vec<String>,

    /// Canonical names of packages that were linked, e.g.
    /// `conda-forge::pkga-1.0-py_0`.
    pub linked: Vec<String>,

    /// Canonical names of packages that were unlinked.
    pub unlinked: Vec<String>,
}

/// An error reading or writing the history file.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed history line: '{0}'")]
    MalformedLine(String),
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl HistoryEntry {
    /// Renders the entry in the history file format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        out.push_str(&format!(
            "==> {} <==\n",
            timestamp.format(TIMESTAMP_FORMAT)
        ));
        if let Some(command) = &self.command {
            out.push_str(&format!("# cmd: {command}\n"));
        }
        if !self.update_specs.is_empty() {
            let specs = self
                .update_specs
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("# update specs: [{specs}]\n"));
        }
        for unlinked in &self.unlinked {
            out.push_str(&format!("-{unlinked}\n"));
        }
        for linked in &self.linked {
            out.push_str(&format!("+{linked}\n"));
        }
        out
    }

    /// Appends the entry to the history file of a prefix, creating the file
    /// when necessary.
    pub fn append_to_file(&self, path: impl AsRef<Path>) -> Result<(), HistoryError> {
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

/// Parses a history file into its entries. Unknown comment lines are ignored,
/// anything else malformed is an error.
pub fn parse_history(content: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
    let mut entries: Vec<HistoryEntry> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix("==>") {
            let timestamp_str = header.trim_end_matches("<==").trim();
            let timestamp = NaiveDateTime::parse_from_str(timestamp_str, TIMESTAMP_FORMAT)
                .map_err(|_| HistoryError::MalformedLine(line.to_owned()))?;
            entries.push(HistoryEntry {
                timestamp: Some(timestamp.and_utc()),
                ..HistoryEntry::default()
            });
            continue;
        }

        let entry = entries
            .last_mut()
            .ok_or_else(|| HistoryError::MalformedLine(line.to_owned()))?;
        if let Some(cmd) = line.strip_prefix("# cmd:") {
            entry.command = Some(cmd.trim().to_owned());
        } else if let Some(specs) = line.strip_prefix("# update specs:") {
            entry.update_specs = specs
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .map(|s| s.trim().trim_matches('\'').to_owned())
                .filter(|s| !s.is_empty())
                .collect();
        } else if let Some(linked) = line.strip_prefix('+') {
            entry.linked.push(linked.to_owned());
        } else if let Some(unlinked) = line.strip_prefix('-') {
            entry.unlinked.push(unlinked.to_owned());
        } else if line.starts_with('#') {
            // Other comments (conda versions and the like) are ignored.
        } else {
            return Err(HistoryError::MalformedLine(line.to_owned()));
        }
    }
    Ok(entries)
}

/// Reads and parses the history file of a prefix. A missing file is an empty
/// history.
pub fn read_history_file(path: impl AsRef<Path>) -> Result<Vec<HistoryEntry>, HistoryError> {
    match fs_err::read_to_string(path.as_ref()) {
        Ok(content) => parse_history(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::{parse_history, HistoryEntry};
    use chrono::TimeZone;

    #[test]
    fn roundtrip() {
        let entry = HistoryEntry {
            timestamp: Some(chrono::Utc.with_ymd_and_hms(2024, 3, 1, 10, 22, 33).unwrap()),
            command: Some("install pkga".to_owned()),
            update_specs: vec!["pkga".to_owned()],
            linked: vec![
                "test::pkgb-2.1-py_0".to_owned(),
                "test::pkga-1.0-py_0".to_owned(),
            ],
            unlinked: vec![],
        };

        let rendered = entry.render();
        let parsed = parse_history(&rendered).unwrap();
        assert_eq!(parsed, vec![entry]);
    }

    #[test]
    fn multiple_entries_and_ignored_comments() {
        let content = "\
==> 2024-03-01 10:22:33 <==
# cmd: install pkga
# conda version: 23.1.0
+test::pkga-1.0-py_0
==> 2024-03-02 09:00:00 <==
# cmd: remove pkga
-test::pkga-1.0-py_0
";
        let parsed = parse_history(content).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].linked, vec!["test::pkga-1.0-py_0"]);
        assert_eq!(parsed[1].unlinked, vec!["test::pkga-1.0-py_0"]);
    }

    #[test]
    fn lines_before_a_header_are_malformed() {
        assert!(parse_history("+test::pkga-1.0-py_0\n").is_err());
    }
}
