//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic spool and `/proc` states of an Exim
//! host.

use super::filesystem::MockFs;

/// Queue root used by the spool scenarios.
pub const SPOOL_ROOT: &str = "/var/spool/exim4/input";

/// Number of messages in `MockFs::typical_spool()`.
pub const TYPICAL_SPOOL_TOTAL: u64 = 6;

/// Number of frozen messages in `MockFs::typical_spool()`.
pub const TYPICAL_SPOOL_FROZEN: u64 = 2;

impl MockFs {
    /// Creates a spool with a mix of legacy and current message ids.
    ///
    /// Messages live both in the queue root (split_spool_directory off)
    /// and in shard directories. Also contains files the scanner must
    /// ignore: a lock file, a db directory and a malformed header name.
    pub fn typical_spool() -> Self {
        let mut fs = Self::new();
        let root = std::path::Path::new(SPOOL_ROOT);

        // Legacy 16-character ids.
        fs.add_message(root, "1rAbCd-0003xY-Zq", false);
        fs.add_message(root.join("d"), "1rAbCd-0003xY-Zd", true);
        fs.add_message(root.join("Z"), "1rAbCZ-000aaa-01", false);

        // Current 23-character ids (Exim 4.97+).
        fs.add_message(root, "1rAbCd-000000003xY-Zq0A", false);
        fs.add_message(root.join("k"), "1rAbCk-00000000aaa-0102", true);
        fs.add_message(root.join("0"), "1rAbC0-00000000bbb-0304", false);

        fs.add_file(root.join("1rAbCd-0003xY-Zq-J"), "journal");
        fs.add_file(root.join("short-H"), "short-H\n");
        fs.add_dir(root.join("db"));

        fs
    }

    /// Creates a process table of a busy Exim host.
    ///
    /// Contains the listening daemon, two SMTP handlers forked from it,
    /// a queue runner, a delivery process, an unrelated process and a
    /// kernel thread with an empty cmdline.
    pub fn exim_processes() -> Self {
        let mut fs = Self::new();

        fs.add_process(1, 1, &["/sbin/init"]);
        fs.add_process(2, 0, &[]);
        fs.add_process(800, 800, &["/usr/sbin/exim4", "-bd", "-q30m"]);
        fs.add_process(4100, 800, &["/usr/sbin/exim4", "-bd", "-q30m"]);
        fs.add_process(4101, 800, &["/usr/sbin/exim4", "-bd", "-q30m"]);
        fs.add_process(4200, 4200, &["/usr/sbin/exim4", "-q"]);
        fs.add_process(4201, 4200, &["/usr/sbin/exim4", "-Mc", "1rAbCd-0003xY-Zq"]);
        fs.add_process(5000, 5000, &["/usr/bin/exim_exporter"]);

        fs
    }
}
