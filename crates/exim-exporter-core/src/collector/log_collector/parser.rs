//! Exim log line classifier.
//!
//! Main log lines look like
//! `<date> <time> [+<elapsed>] [[<pid>]] <message-id> <op> <address> ...`,
//! where the elapsed-time tag and the bracketed PID depend on
//! `log_selector` settings. Instead of a regex we walk the whitespace
//! fields, skipping the optional ones, and look at the token that follows
//! the message id. All format-variant handling lives in
//! [`find_operation`].

use std::fmt;

/// Message disposition derived from the main log operation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageFlag {
    /// `<=` message arrival.
    Arrived,
    /// `(=` message fakereject.
    FakeReject,
    /// `=>` normal message delivery.
    Delivered,
    /// `->` additional address in the same delivery.
    Additional,
    /// `>>` cutthrough message delivery.
    Cutthrough,
    /// `*>` delivery suppressed by `-N`.
    Suppressed,
    /// `**` delivery failed; address bounced.
    Failed,
    /// `==` delivery deferred; temporary problem.
    Deferred,
    /// `Completed` all addresses done.
    Completed,
}

impl MessageFlag {
    /// Maps an operation token to its flag.
    pub fn from_token(token: &str) -> Option<Self> {
        let flag = match token {
            "<=" => MessageFlag::Arrived,
            "(=" => MessageFlag::FakeReject,
            "=>" => MessageFlag::Delivered,
            "->" => MessageFlag::Additional,
            ">>" => MessageFlag::Cutthrough,
            "*>" => MessageFlag::Suppressed,
            "**" => MessageFlag::Failed,
            "==" => MessageFlag::Deferred,
            "Completed" => MessageFlag::Completed,
            _ => return None,
        };
        Some(flag)
    }

    /// Label value used in exported metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageFlag::Arrived => "arrived",
            MessageFlag::FakeReject => "fakereject",
            MessageFlag::Delivered => "delivered",
            MessageFlag::Additional => "additional",
            MessageFlag::Cutthrough => "cutthrough",
            MessageFlag::Suppressed => "suppressed",
            MessageFlag::Failed => "failed",
            MessageFlag::Deferred => "deferred",
            MessageFlag::Completed => "completed",
        }
    }

    /// Whether lines with this flag carry router/transport annotations.
    fn has_route(self) -> bool {
        matches!(
            self,
            MessageFlag::Delivered | MessageFlag::Failed | MessageFlag::Deferred
        )
    }

    /// Whether lines with this flag may carry an SMTP status code.
    fn has_status(self) -> bool {
        matches!(self, MessageFlag::Failed | MessageFlag::Deferred)
    }
}

impl fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognized reject log reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    SpfCheckFailed,
    RelayNotPermitted,
    AuthenticationFailed,
    Other,
}

impl RejectReason {
    /// Label value used in exported metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::SpfCheckFailed => "spf_check_failed",
            RejectReason::RelayNotPermitted => "relay_not_permitted",
            RejectReason::AuthenticationFailed => "authentication_failed",
            RejectReason::Other => "other",
        }
    }
}

/// Reject reasons in priority order; first match wins.
const REJECT_REASONS: &[(&str, RejectReason)] = &[
    ("SPF check failed", RejectReason::SpfCheckFailed),
    ("relay not permitted", RejectReason::RelayNotPermitted),
    (
        "535 Incorrect authentication data",
        RejectReason::AuthenticationFailed,
    ),
];

/// One classified log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Main log message event. `router` and `transport` are empty unless
    /// the flag is delivered, failed or deferred.
    Message {
        flag: MessageFlag,
        router: String,
        transport: String,
    },
    /// SMTP status found on a failed or deferred line. `enhanced` is empty
    /// when no RFC 3463 code follows the basic code.
    ErrorCode { status: String, enhanced: String },
    /// Reject log entry.
    Reject { reason: RejectReason },
    /// Panic log entry.
    Panic,
    /// The line source reported an I/O error.
    ReadError,
}

/// Result of classifying a main log line: the message event plus the
/// optional companion error-code event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub event: LogEvent,
    pub error_code: Option<LogEvent>,
}

/// Skips the optional leading fields and returns the operation token.
///
/// Fields 0–1 are date and time. Field 2 may be an elapsed-time tag
/// (`+0.1`), the next may be a `[pid]`, then comes the message id and
/// finally the operation token.
fn find_operation<'a>(fields: &[&'a str]) -> Option<&'a str> {
    let mut idx = 2;
    if fields.get(idx)?.starts_with(['+', '-']) {
        idx += 1;
    }
    if fields.get(idx)?.starts_with('[') {
        idx += 1;
    }
    // message id
    idx += 1;
    fields.get(idx).copied()
}

/// Returns the last `R=` and `T=` values on the line.
fn find_route(fields: &[&str]) -> (String, String) {
    let mut router = "";
    let mut transport = "";
    for field in fields {
        if let Some(value) = field.strip_prefix("R=") {
            router = value;
        } else if let Some(value) = field.strip_prefix("T=") {
            transport = value;
        }
    }
    (router.to_string(), transport.to_string())
}

/// Finds the first `": "` followed by a basic SMTP status code and an
/// optional enhanced code.
///
/// Accepted: `: 550`, `: 550 5.1.1`, `: 451-4.7.1`. The basic code is
/// `[2-5][0-9][0-9]` and must not be followed by another digit; the
/// enhanced code is `[2-5].d{1,3}.d{1,3}`.
pub fn parse_status_code(line: &str) -> Option<(String, String)> {
    let mut rest = line;
    while let Some(pos) = rest.find(": ") {
        let candidate = &rest[pos + 2..];
        if let Some(status) = basic_code(candidate) {
            let enhanced = candidate[3..]
                .strip_prefix([' ', '-'])
                .and_then(enhanced_code)
                .unwrap_or("");
            return Some((status.to_string(), enhanced.to_string()));
        }
        rest = &rest[pos + 1..];
    }
    None
}

fn basic_code(s: &str) -> Option<&str> {
    let b = s.as_bytes();
    if b.len() < 3 || !(b'2'..=b'5').contains(&b[0]) {
        return None;
    }
    if !b[1].is_ascii_digit() || !b[2].is_ascii_digit() {
        return None;
    }
    if b.get(3).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    Some(&s[..3])
}

fn enhanced_code(s: &str) -> Option<&str> {
    let b = s.as_bytes();
    if b.is_empty() || !(b'2'..=b'5').contains(&b[0]) || b.get(1) != Some(&b'.') {
        return None;
    }
    let mut end = 2;
    for segment in 0..2 {
        let start = end;
        while end < b.len() && b[end].is_ascii_digit() && end - start < 3 {
            end += 1;
        }
        if end == start {
            return None;
        }
        if segment == 0 {
            if b.get(end) != Some(&b'.') {
                return None;
            }
            end += 1;
        }
    }
    if b.get(end).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    Some(&s[..end])
}

/// Classifies a main log line.
///
/// Returns `None` for lines without a recognized operation token
/// (connection logs, queue-run notices, continuation lines).
pub fn classify_main(line: &str) -> Option<Classified> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let flag = MessageFlag::from_token(find_operation(&fields)?)?;

    let (router, transport) = if flag.has_route() {
        find_route(&fields)
    } else {
        (String::new(), String::new())
    };

    let error_code = if flag.has_status() {
        parse_status_code(line)
            .map(|(status, enhanced)| LogEvent::ErrorCode { status, enhanced })
    } else {
        None
    };

    Some(Classified {
        event: LogEvent::Message {
            flag,
            router,
            transport,
        },
        error_code,
    })
}

/// Classifies a reject log line. Unrecognized lines are `Other`.
pub fn classify_reject(line: &str) -> LogEvent {
    let reason = REJECT_REASONS
        .iter()
        .find(|(needle, _)| line.contains(*needle))
        .map(|&(_, reason)| reason)
        .unwrap_or(RejectReason::Other);
    LogEvent::Reject { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(line: &str) -> (MessageFlag, String, String) {
        match classify_main(line).unwrap().event {
            LogEvent::Message {
                flag,
                router,
                transport,
            } => (flag, router, transport),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_arrival_without_optional_fields() {
        let (flag, router, transport) =
            message("2024-01-01 00:00:00 1a2B3c-000000-aB <= a@b.com");
        assert_eq!(flag, MessageFlag::Arrived);
        assert!(router.is_empty());
        assert!(transport.is_empty());
    }

    #[test]
    fn test_delivery_with_elapsed_and_pid() {
        let line = "2024-01-01 00:00:00 +0.1 [1234] 1a2B3c-000000-aB => a@b.com R=r1 T=t1";
        assert_eq!(
            message(line),
            (MessageFlag::Delivered, "r1".to_string(), "t1".to_string())
        );
    }

    #[test]
    fn test_pid_without_elapsed() {
        let line = "2024-01-01 00:00:00 [1234] 1a2B3c-000000-aB -> b@b.com R=r1 T=t1";
        assert_eq!(message(line).0, MessageFlag::Additional);
    }

    #[test]
    fn test_elapsed_without_pid() {
        let line = "2024-01-01 00:00:00 -0.2 1a2B3c-000000-aB Completed";
        assert_eq!(message(line).0, MessageFlag::Completed);
    }

    #[test]
    fn test_all_operation_tokens() {
        let cases = [
            ("<=", MessageFlag::Arrived),
            ("(=", MessageFlag::FakeReject),
            ("=>", MessageFlag::Delivered),
            ("->", MessageFlag::Additional),
            (">>", MessageFlag::Cutthrough),
            ("*>", MessageFlag::Suppressed),
            ("**", MessageFlag::Failed),
            ("==", MessageFlag::Deferred),
            ("Completed", MessageFlag::Completed),
        ];
        for (token, expected) in cases {
            let line = format!("2024-01-01 00:00:00 1a2B3c-000000-aB {} a@b.com", token);
            assert_eq!(message(&line).0, expected, "token {}", token);
        }
    }

    #[test]
    fn test_route_only_for_routed_flags() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB <= a@b.com R=r1 T=t1";
        let (_, router, transport) = message(line);
        assert!(router.is_empty());
        assert!(transport.is_empty());

        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB -> a@b.com R=r1 T=t1";
        let (_, router, transport) = message(line);
        assert!(router.is_empty());
        assert!(transport.is_empty());
    }

    #[test]
    fn test_last_route_annotation_wins() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB == a@b.com R=first T=first R=second T=second defer (-1): 451 x";
        let (flag, router, transport) = message(line);
        assert_eq!(flag, MessageFlag::Deferred);
        assert_eq!(router, "second");
        assert_eq!(transport, "second");
    }

    #[test]
    fn test_failed_with_enhanced_code() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB ** a@b.com: 550 5.1.1 User unknown";
        let classified = classify_main(line).unwrap();
        assert!(matches!(
            classified.event,
            LogEvent::Message {
                flag: MessageFlag::Failed,
                ..
            }
        ));
        assert_eq!(
            classified.error_code,
            Some(LogEvent::ErrorCode {
                status: "550".to_string(),
                enhanced: "5.1.1".to_string()
            })
        );
    }

    #[test]
    fn test_failed_without_status_code() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB ** a@b.com: Unrouteable address";
        let classified = classify_main(line).unwrap();
        assert!(classified.error_code.is_none());
    }

    #[test]
    fn test_deferred_status_after_colon_in_address() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB == a@b.com R=dnslookup T=remote_smtp \
                    defer (-44) H=mx.b.com [192.0.2.1]: SMTP error from remote mail server \
                    after RCPT TO:<a@b.com>: 451-4.7.1 Greylisted";
        let classified = classify_main(line).unwrap();
        assert_eq!(
            classified.error_code,
            Some(LogEvent::ErrorCode {
                status: "451".to_string(),
                enhanced: "4.7.1".to_string()
            })
        );
    }

    #[test]
    fn test_status_code_without_enhanced() {
        assert_eq!(
            parse_status_code("x: 421 Service not available"),
            Some(("421".to_string(), String::new()))
        );
    }

    #[test]
    fn test_status_code_rejects_out_of_range() {
        assert_eq!(parse_status_code("x: 650 nope"), None);
        assert_eq!(parse_status_code("x: 1999 nope"), None);
        assert_eq!(parse_status_code("x: 5501 nope"), None);
        assert_eq!(parse_status_code("550 no colon"), None);
    }

    #[test]
    fn test_enhanced_code_bounds() {
        assert_eq!(
            parse_status_code("x: 550 5.7.26 DMARC"),
            Some(("550".to_string(), "5.7.26".to_string()))
        );
        assert_eq!(
            parse_status_code("x: 550 6.1.1 bad class"),
            Some(("550".to_string(), String::new()))
        );
        assert_eq!(
            parse_status_code("x: 550 5.1 short"),
            Some(("550".to_string(), String::new()))
        );
    }

    #[test]
    fn test_no_error_code_for_delivered() {
        let line = "2024-01-01 00:00:00 1a2B3c-000000-aB => a@b.com R=r T=t H=mx [192.0.2.1]: 250 2.0.0 OK";
        assert!(classify_main(line).unwrap().error_code.is_none());
    }

    #[test]
    fn test_unclassifiable_lines_ignored() {
        assert!(classify_main("").is_none());
        assert!(classify_main("2024-01-01").is_none());
        assert!(classify_main("2024-01-01 00:00:00").is_none());
        assert!(classify_main("2024-01-01 00:00:00 +0.1 [1234]").is_none());
        assert!(classify_main("2024-01-01 00:00:00 Start queue run: pid=1234").is_none());
        assert!(
            classify_main(
                "2024-01-01 00:00:00 [1234] SMTP connection from [192.0.2.1] lost"
            )
            .is_none()
        );
    }

    #[test]
    fn test_reject_reasons() {
        let cases = [
            (
                "2024-01-01 00:00:00 H=(x) [192.0.2.1] F=<a@b.com> rejected RCPT <c@d.com>: SPF check failed",
                RejectReason::SpfCheckFailed,
            ),
            (
                "2024-01-01 00:00:00 H=(x) [192.0.2.1] F=<a@b.com> rejected RCPT <c@d.com>: relay not permitted",
                RejectReason::RelayNotPermitted,
            ),
            (
                "2024-01-01 00:00:00 login authenticator failed for (x) [192.0.2.1]: 535 Incorrect authentication data (set_id=a@b.com)",
                RejectReason::AuthenticationFailed,
            ),
            (
                "2024-01-01 00:00:00 H=(x) [192.0.2.1] rejected EHLO or HELO x: syntactically invalid",
                RejectReason::Other,
            ),
        ];
        for (line, expected) in cases {
            assert_eq!(classify_reject(line), LogEvent::Reject { reason: expected });
        }
    }

    #[test]
    fn test_reject_priority() {
        let line = "x: relay not permitted; SPF check failed";
        assert_eq!(
            classify_reject(line),
            LogEvent::Reject {
                reason: RejectReason::SpfCheckFailed
            }
        );
    }
}
