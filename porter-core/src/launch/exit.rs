// Turns a raw exit code and run duration into a launch verdict.

use std::time::Duration;

use porter_common::config::Config;
use porter_common::error::PorterError;

/// How long a session must last before a non-zero exit stops counting as a
/// crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    pub tolerance: Duration,
}

impl ExitPolicy {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.exit_tolerance)
    }
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone)]
pub enum ExitVerdict {
    Success,
    /// Non-zero exit after a long enough session.
    Tolerated { code: u32, signed_code: i64 },
    Failed(PorterError),
}

/// Exit codes on Windows are reported as signed 32-bit values.
pub fn signed_exit_code(raw: u32, windows: bool) -> i64 {
    if windows {
        raw as i32 as i64
    } else {
        raw as i64
    }
}

pub fn interpret_exit(
    raw: u32,
    run_duration: Duration,
    policy: &ExitPolicy,
    windows: bool,
    target: &str,
) -> ExitVerdict {
    if raw == 0 {
        return ExitVerdict::Success;
    }
    let signed_code = signed_exit_code(raw, windows);
    if run_duration > policy.tolerance {
        return ExitVerdict::Tolerated {
            code: raw,
            signed_code,
        };
    }
    ExitVerdict::Failed(PorterError::ProcessExit {
        code: raw,
        signed_code,
        target: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success_regardless_of_duration() {
        let verdict = interpret_exit(0, Duration::ZERO, &ExitPolicy::default(), false, "game");
        assert!(matches!(verdict, ExitVerdict::Success));
    }

    #[test]
    fn quick_crash_fails() {
        let verdict = interpret_exit(
            1,
            Duration::from_secs(2),
            &ExitPolicy::default(),
            false,
            "game",
        );
        match verdict {
            ExitVerdict::Failed(PorterError::ProcessExit {
                code, signed_code, ..
            }) => {
                assert_eq!(code, 1);
                assert_eq!(signed_code, 1);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn long_session_is_tolerated() {
        let verdict = interpret_exit(
            1,
            Duration::from_secs(15),
            &ExitPolicy::default(),
            false,
            "game",
        );
        assert!(matches!(verdict, ExitVerdict::Tolerated { code: 1, .. }));
    }

    #[test]
    fn tolerance_boundary_is_exclusive() {
        let policy = ExitPolicy::new(Duration::from_secs(10));
        let verdict = interpret_exit(3, Duration::from_secs(10), &policy, false, "game");
        assert!(matches!(verdict, ExitVerdict::Failed(_)));
    }

    #[test]
    fn windows_codes_are_signed() {
        assert_eq!(signed_exit_code(0xC000_0005, true), -1_073_741_819);
        assert_eq!(signed_exit_code(0xC000_0005, false), 0xC000_0005);
        let verdict = interpret_exit(0xC000_0005, Duration::ZERO, &ExitPolicy::default(), true, "g.exe");
        let err = match verdict {
            ExitVerdict::Failed(e) => e,
            other => panic!("unexpected verdict {other:?}"),
        };
        assert_eq!(err.to_string(), "Exit code 0xc0000005 (-1073741819) for (g.exe)");
    }
}
