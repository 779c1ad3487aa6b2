//! Exim process role classification.
//!
//! Exim has no status file for its workers, so roles are inferred from
//! the command line and process-group leadership. The listening daemon
//! and the SMTP handlers it forks share the same argv (`exim -bd ...`);
//! only the daemon leads its process group.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// One process table entry as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub cmdline: Vec<String>,
    pub is_group_leader: bool,
}

impl ProcessRecord {
    pub fn new<S: Into<String>>(
        cmdline: impl IntoIterator<Item = S>,
        is_group_leader: bool,
    ) -> Self {
        Self {
            cmdline: cmdline.into_iter().map(Into::into).collect(),
            is_group_leader,
        }
    }

    /// Final path segment of the executable, if any.
    pub fn basename(&self) -> Option<&str> {
        let exe = self.cmdline.first()?;
        exe.rsplit('/').next()
    }
}

/// Functional role of an Exim process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// The persistent listening daemon.
    Daemon,
    /// A delivery process (`-Mc`).
    Delivering,
    /// A queue runner (`-q`, `-qG`).
    Running,
    /// An SMTP connection handler forked from the daemon.
    Handling,
    Other,
}

impl ProcessRole {
    /// Label value used in exported metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessRole::Daemon => "daemon",
            ProcessRole::Delivering => "delivering",
            ProcessRole::Running => "running",
            ProcessRole::Handling => "handling",
            ProcessRole::Other => "other",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_daemon_flag(token: &str) -> bool {
    matches!(token, "-bd" | "-bdf")
}

/// Infers the role of a single Exim process.
pub fn classify_process(record: &ProcessRecord) -> ProcessRole {
    let Some(flag) = record.cmdline.get(1) else {
        return ProcessRole::Other;
    };
    match flag.as_str() {
        "-Mc" => ProcessRole::Delivering,
        "-q" | "-qG" => ProcessRole::Running,
        f if is_daemon_flag(f) => {
            if record.is_group_leader {
                ProcessRole::Daemon
            } else {
                ProcessRole::Handling
            }
        }
        _ if record.is_group_leader && record.cmdline.iter().any(|t| is_daemon_flag(t)) => {
            ProcessRole::Daemon
        }
        _ => ProcessRole::Other,
    }
}

/// Counts roles of the processes whose executable basename is
/// `binary_name`. Roles without processes are absent from the result.
pub fn classify(records: &[ProcessRecord], binary_name: &str) -> BTreeMap<ProcessRole, u64> {
    let mut roles = BTreeMap::new();
    for record in records {
        if record.basename() != Some(binary_name) {
            continue;
        }
        *roles.entry(classify_process(record)).or_insert(0) += 1;
    }
    roles
}

/// Whether the role map contains the listening daemon.
pub fn is_up(roles: &BTreeMap<ProcessRole, u64>) -> bool {
    roles.get(&ProcessRole::Daemon).is_some_and(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cmdline: &[&str], leader: bool) -> ProcessRecord {
        ProcessRecord::new(cmdline.iter().copied(), leader)
    }

    #[test]
    fn test_daemon_vs_handler() {
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-bd"], true)),
            ProcessRole::Daemon
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-bd"], false)),
            ProcessRole::Handling
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-bdf", "-q1h"], false)),
            ProcessRole::Handling
        );
    }

    #[test]
    fn test_delivering_and_running() {
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-Mc", "1rAbCd-0003xY-Zq"], false)),
            ProcessRole::Delivering
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-q"], true)),
            ProcessRole::Running
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-qG"], false)),
            ProcessRole::Running
        );
    }

    #[test]
    fn test_daemon_heuristic_for_unrecognized_flag() {
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-q30m", "-bd"], true)),
            ProcessRole::Daemon
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-q30m", "-bd"], false)),
            ProcessRole::Other
        );
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4", "-bV"], false)),
            ProcessRole::Other
        );
    }

    #[test]
    fn test_no_arguments() {
        assert_eq!(
            classify_process(&record(&["/usr/sbin/exim4"], true)),
            ProcessRole::Other
        );
        assert_eq!(classify_process(&record(&[], true)), ProcessRole::Other);
    }

    #[test]
    fn test_classify_filters_by_basename() {
        let records = vec![
            record(&["/usr/sbin/exim4", "-bd", "-q30m"], true),
            record(&["/usr/sbin/exim4", "-bd", "-q30m"], false),
            record(&["exim4", "-Mc", "id"], false),
            record(&["/usr/sbin/exim", "-bd"], true),
            record(&["/usr/bin/exim4-notify", "-bd"], true),
            record(&[], false),
        ];
        let roles = classify(&records, "exim4");
        assert_eq!(roles.len(), 3);
        assert_eq!(roles[&ProcessRole::Daemon], 1);
        assert_eq!(roles[&ProcessRole::Handling], 1);
        assert_eq!(roles[&ProcessRole::Delivering], 1);
        assert!(!roles.contains_key(&ProcessRole::Other));
        assert!(is_up(&roles));
    }

    #[test]
    fn test_down_without_daemon() {
        let records = vec![record(&["/usr/sbin/exim4", "-bd"], false)];
        let roles = classify(&records, "exim4");
        assert!(!is_up(&roles));
        assert!(!is_up(&BTreeMap::new()));
    }
}
