//! File logging under `~/.local/share/cc-safeshell/`.
//!
//! Everything here is best effort: a log that cannot be opened never stops
//! a command from running.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};

use crate::error::ShellError;
use crate::exec::ExecResult;

/// Width at which commands are cut in the outcome log.
const MAX_LOGGED_COMMAND_CHARS: usize = 200;

fn log_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let dir = PathBuf::from(home).join(".local/share/cc-safeshell");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Route the `log` facade to `safeshell.log` at `level`.
pub fn init(level: LevelFilter) {
    let Some(dir) = log_dir() else {
        return;
    };
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("safeshell.log"))
    else {
        return;
    };
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let _ = WriteLogger::init(level, config, file);
}

/// One tab-separated line: `outcome`, `command`, `detail`.
pub fn format_outcome(command: &str, outcome: &Result<ExecResult, ShellError>) -> String {
    let command: String = command
        .replace('\n', "; ")
        .chars()
        .take(MAX_LOGGED_COMMAND_CHARS)
        .collect();
    let (label, detail) = match outcome {
        Ok(result) => {
            let mut detail = format!("code={}", result.code);
            if let Some(signal) = &result.signal {
                detail.push_str(&format!(" signal={signal}"));
            }
            if result.truncated {
                detail.push_str(" truncated");
            }
            ("ran".to_string(), detail)
        }
        Err(e) => (format!("rejected:{}", e.stage()), e.to_string().replace('\n', "; ")),
    };
    format!("{label}\t{command}\t{detail}")
}

/// Append one outcome record to `outcomes.log`.
pub fn log_outcome(command: &str, outcome: &Result<ExecResult, ShellError>) {
    let Some(dir) = log_dir() else {
        return;
    };
    let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("outcomes.log"))
    else {
        return;
    };
    let _ = writeln!(file, "{}\t{}", timestamp_now(), format_outcome(command, outcome));
}

/// UTC timestamp, second precision.
fn timestamp_now() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    let rem = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since the Unix epoch to a civil date (Howard Hinnant's algorithm).
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn epoch_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(19_782), (2024, 2, 29));
    }

    #[test]
    fn ran_record() {
        let result = ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            code: 124,
            signal: Some("SIGTERM".into()),
            truncated: false,
        };
        assert_eq!(
            format_outcome("sleep 5", &Ok(result)),
            "ran\tsleep 5\tcode=124 signal=SIGTERM"
        );
    }

    #[test]
    fn rejected_record_names_stage() {
        let err = ShellError::from(ValidationError::CommandNotAllowed {
            command: "rm".into(),
            allowed: "cat".into(),
        });
        let line = format_outcome("rm -rf /", &Err(err));
        assert!(line.starts_with("rejected:validate\trm -rf /\t"));
        assert!(line.ends_with("command not allowed: rm (allowed: cat)"));
    }

    #[test]
    fn long_command_folded_and_cut() {
        let command = format!("echo a\n{}", "x".repeat(500));
        let result = ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            code: 0,
            signal: None,
            truncated: true,
        };
        let line = format_outcome(&command, &Ok(result));
        let logged = line.split('\t').nth(1).unwrap();
        assert!(logged.starts_with("echo a; x"));
        assert_eq!(logged.chars().count(), MAX_LOGGED_COMMAND_CHARS);
        assert!(line.ends_with("code=0 truncated"));
    }
}
