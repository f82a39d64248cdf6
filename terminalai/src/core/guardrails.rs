//! Pattern heuristics applied to command text before execution and logging.

use std::sync::LazyLock;

use regex::Regex;

static DESTRUCTIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Recursive and/or forced removal: rm -rf, rm -fr, rm -r -f, rm --recursive.
        r"(?i)\brm\s+(-[a-z]*[rf][a-z]*\s+)*-[a-z]*[rf][a-z]*\b",
        r"(?i)\brm\s+--(recursive|force)\b",
        r"(?i)\brmdir\s+/s\b",
        r"(?i)\bdel\s+(/s\s+)?(/q\s+)?",
        r"(?i)\bremove-item\b",
        r"(?i)(^|[\s;&|(])format(\.com)?\s+[a-z]:",
        r"(?i)\bformat-volume\b",
        r"(?i)\bmkfs(\.\w+)?\b",
        r"(?i)\bdd\s+.*\bof=/dev/",
        r"(?i)\bdrop\s+(table|database|schema)\b",
        r"(?i)\btruncate\s+table\b",
        r"(?i)\bgit\s+push\s+.*(--force\b|-f\b)",
        r"(?i)\bgit\s+(reset\s+--hard|clean\s+-[a-z]*f)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("destructive pattern should be valid"))
    .collect()
});

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(--?(?:password|passwd|token|secret|api[-_]?key)\s+)(\S+)",
        r"(?i)((?:password|passwd|token|secret|api[-_]?key)\s*=\s*)(\S+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("secret pattern should be valid"))
    .collect()
});

/// Whether `command` matches any destructive-command heuristic.
pub fn is_destructive(command: &str) -> bool {
    DESTRUCTIVE_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(command))
}

/// Replace secret values with `***` for logging. The original command is what runs.
pub fn redact_secrets(command: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(command.to_string(), |acc, pattern| {
            pattern.replace_all(&acc, "${1}***").into_owned()
        })
}
