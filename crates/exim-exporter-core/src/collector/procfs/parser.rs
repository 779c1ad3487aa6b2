//! Parsers for `/proc/[pid]` files.
//!
//! These are pure functions that parse file contents into structured data,
//! testable with string inputs.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fields of `/proc/[pid]/stat` needed for role classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub pgrp: i32,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because the comm field can contain spaces and parentheses.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    // Find the comm field boundaries (enclosed in parentheses)
    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;

    // state ppid pgrp ...
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 3 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 3+, got {}",
            fields.len()
        )));
    }

    let pgrp: i32 = fields[2]
        .parse()
        .map_err(|_| ParseError::new("invalid pgrp"))?;

    Ok(ProcStat { pid, pgrp })
}

/// Splits `/proc/[pid]/cmdline` into its NUL-separated tokens.
///
/// Kernel threads have an empty cmdline and yield no tokens. Processes
/// that rewrite their argv may use spaces instead of NULs; such a
/// cmdline is split on whitespace.
pub fn parse_cmdline(content: &str) -> Vec<String> {
    let trimmed = content.trim_end_matches('\0');
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.contains('\0') {
        trimmed.split('\0').map(str::to_string).collect()
    } else {
        trimmed.split_whitespace().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_stat_basic() {
        let content = "800 (exim4) S 1 800 800 0 -1 4194560 100 0 0 0 10 5 0 0 20 0 1 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat, ProcStat { pid: 800, pgrp: 800 });
    }

    #[test]
    fn test_parse_proc_stat_comm_with_parens() {
        let content = "42 (weird (name) 7 x) R 1 40 41 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat, ProcStat { pid: 42, pgrp: 40 });
    }

    #[test]
    fn test_parse_proc_stat_errors() {
        assert!(parse_proc_stat("").is_err());
        assert!(parse_proc_stat("12 exim4 S 1 2 3").is_err());
        assert!(parse_proc_stat("x (exim4) S 1 2 3").is_err());
        assert!(parse_proc_stat("12 (exim4) S 1").is_err());
        assert!(parse_proc_stat("12 (exim4) S 1 abc 3").is_err());
    }

    #[test]
    fn test_parse_cmdline() {
        assert_eq!(
            parse_cmdline("/usr/sbin/exim4\0-bd\0-q30m\0"),
            vec!["/usr/sbin/exim4", "-bd", "-q30m"]
        );
        assert!(parse_cmdline("").is_empty());
        assert!(parse_cmdline("\0").is_empty());
    }

    #[test]
    fn test_parse_cmdline_rewritten_argv() {
        assert_eq!(
            parse_cmdline("/usr/sbin/exim4 -Mc 1rAbCd-0003xY-Zq"),
            vec!["/usr/sbin/exim4", "-Mc", "1rAbCd-0003xY-Zq"]
        );
    }
}
