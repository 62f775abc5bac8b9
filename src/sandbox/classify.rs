use std::time::Duration;

use super::{CapturedStream, CapturedStreams};

/// Exit status reported for instances killed at the deadline
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// How the instance stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The program exited on its own with this status
    Exited(i32),
    /// The deadline fired first and the instance was killed
    DeadlineExpired,
}

/// Final result of one execution, handed to the caller exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub language_key: String,
    /// `None` when the program ran to completion without writing anything
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Engine-level explanation, set only on timeout
    pub error: Option<String>,
    pub exit_status: i32,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn produced_output(&self) -> bool {
        self.stdout.is_some()
    }
}

/// Maps the raw termination and captured channels into an [`ExecutionOutcome`]
///
/// This is the only place whitespace is trimmed. A non-empty stderr is reported
/// whatever the exit status, so warnings of successful programs are not lost.
pub fn classify(
    language_key: &str,
    termination: Termination,
    streams: &CapturedStreams,
    deadline: Duration,
) -> ExecutionOutcome {
    let stdout = render(&streams.stdout);
    let stderr = render(&streams.stderr);

    match termination {
        Termination::DeadlineExpired => ExecutionOutcome {
            language_key: language_key.to_string(),
            stdout: Some(stdout),
            stderr: non_empty(stderr),
            error: Some(format!(
                "Code execution timed out ({}s limit exceeded)",
                deadline.as_secs_f64()
            )),
            exit_status: TIMEOUT_EXIT_STATUS,
            timed_out: true,
        },
        Termination::Exited(code) => {
            let silent = stdout.is_empty() && stderr.is_empty();
            ExecutionOutcome {
                language_key: language_key.to_string(),
                stdout: if silent { None } else { Some(stdout) },
                stderr: non_empty(stderr),
                error: None,
                exit_status: code,
                timed_out: false,
            }
        }
    }
}

fn render(stream: &CapturedStream) -> String {
    let mut text = String::from_utf8_lossy(&stream.bytes).trim().to_string();
    if stream.truncated {
        text.push_str(&format!(
            "\n[output truncated after {} bytes]",
            stream.bytes.len()
        ));
    }
    text
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn streams(stdout: &str, stderr: &str) -> CapturedStreams {
        let captured = |s: &str| CapturedStream {
            bytes: s.as_bytes().to_vec(),
            total: s.len(),
            truncated: false,
        };
        CapturedStreams {
            stdout: captured(stdout),
            stderr: captured(stderr),
        }
    }

    const DEADLINE: Duration = Duration::from_secs(30);

    #[test]
    fn test_successful_run() {
        let outcome = classify("python", Termination::Exited(0), &streams("4\n", ""), DEADLINE);
        assert_eq!(
            outcome,
            ExecutionOutcome {
                language_key: "python".to_string(),
                stdout: Some("4".to_string()),
                stderr: None,
                error: None,
                exit_status: 0,
                timed_out: false,
            }
        );
    }

    #[test]
    fn test_warning_on_success_is_surfaced() {
        let outcome = classify("python", Termination::Exited(0), &streams("ok\n", "warn"), DEADLINE);
        assert_eq!(outcome.stdout.as_deref(), Some("ok"));
        assert_eq!(outcome.stderr.as_deref(), Some("warn"));
        assert_eq!(outcome.exit_status, 0);
    }

    #[test]
    fn test_failure_without_stderr_is_success_shaped() {
        let outcome = classify("bash", Termination::Exited(3), &streams("partial", "  \n"), DEADLINE);
        assert_eq!(outcome.stderr, None);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.exit_status, 3);
    }

    #[test]
    fn test_silent_run_is_marked() {
        let outcome = classify("bash", Termination::Exited(0), &streams(" \n", ""), DEADLINE);
        assert_eq!(outcome.stdout, None);
        assert!(!outcome.produced_output());
    }

    #[test]
    fn test_timeout_uses_sentinel() {
        let outcome = classify("python", Termination::DeadlineExpired, &streams("", ""), DEADLINE);
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_status, TIMEOUT_EXIT_STATUS);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Code execution timed out (30s limit exceeded)")
        );
        // A timed out run is never reported as silent
        assert_eq!(outcome.stdout.as_deref(), Some(""));
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let outcome = classify(
            "python",
            Termination::DeadlineExpired,
            &streams("step 1\n", "Traceback"),
            Duration::from_millis(1500),
        );
        assert_eq!(outcome.stdout.as_deref(), Some("step 1"));
        assert_eq!(outcome.stderr.as_deref(), Some("Traceback"));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Code execution timed out (1.5s limit exceeded)")
        );
    }

    #[test]
    fn test_trims_both_ends_only() {
        let outcome = classify(
            "bash",
            Termination::Exited(0),
            &streams("\n  a \n\tb  \n\n", ""),
            DEADLINE,
        );
        assert_eq!(outcome.stdout.as_deref(), Some("a \n\tb"));
    }

    #[test]
    fn test_truncated_stream_is_flagged() {
        let mut captured = streams("aaaa", "");
        captured.stdout.truncated = true;
        captured.stdout.total = 10_000;
        let outcome = classify("bash", Termination::Exited(0), &captured, DEADLINE);
        assert_eq!(
            outcome.stdout.as_deref(),
            Some("aaaa\n[output truncated after 4 bytes]")
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let captured = CapturedStreams {
            stdout: CapturedStream {
                bytes: vec![b'o', b'k', 0xff],
                total: 3,
                truncated: false,
            },
            stderr: CapturedStream::default(),
        };
        let outcome = classify("bash", Termination::Exited(0), &captured, DEADLINE);
        assert_eq!(outcome.stdout.as_deref(), Some("ok\u{fffd}"));
    }
}
