// SPDX-License-Identifier: PMPL-1.0-or-later
//! User-facing output controls: verbosity, friendly notices, exit codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verbosity levels for user-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent,
    #[default]
    Normal,
    Verbose,
    Debug,
}

/// Kind of friendly notice. Notices are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Warning,
    Hint,
    Deprecation,
}

/// A friendly notice attached to a query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Warning,
            message: message.into(),
        }
    }

    pub fn hint(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Hint,
            message: message.into(),
        }
    }

    pub fn deprecation(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Deprecation,
            message: message.into(),
        }
    }

    /// Whether this notice is shown at the given verbosity.
    pub fn visible_at(&self, verbosity: Verbosity) -> bool {
        match self.kind {
            NoticeKind::Warning | NoticeKind::Deprecation => verbosity >= Verbosity::Normal,
            NoticeKind::Info => verbosity >= Verbosity::Verbose,
            NoticeKind::Hint => verbosity >= Verbosity::Verbose,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            NoticeKind::Info => "info",
            NoticeKind::Warning => "warning",
            NoticeKind::Hint => "hint",
            NoticeKind::Deprecation => "deprecation",
        };
        write!(f, "{tag}: {}", self.message)
    }
}

/// Map a machine-readable error code to a process exit code.
///
/// 0 success; 1 input/parse error; 2 constraint/proof failure; 3 store
/// unavailable; 4 internal invariant broken. Codes are slash-prefixed by
/// taxonomy kind (`parse/...`, `type/...`, `proof/...`, ...).
pub fn exit_code(error_code: Option<&str>) -> i32 {
    let Some(code) = error_code else {
        return 0;
    };
    match code.split('/').next().unwrap_or("") {
        "parse" => 1,
        "type" | "proof" => 2,
        "store" | "federation" => 3,
        "internal" => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(None), 0);
        assert_eq!(exit_code(Some("parse/unexpected-token")), 1);
        assert_eq!(exit_code(Some("type/having-without-group-by")), 2);
        assert_eq!(exit_code(Some("proof/verification-failed")), 2);
        assert_eq!(exit_code(Some("store/unavailable")), 3);
        assert_eq!(exit_code(Some("federation/consensus-timeout")), 3);
        assert_eq!(exit_code(Some("internal/version-regression")), 4);
    }

    #[test]
    fn test_notice_visibility() {
        let warning = Notice::warning("w");
        let info = Notice::info("i");
        assert!(!warning.visible_at(Verbosity::Silent));
        assert!(warning.visible_at(Verbosity::Normal));
        assert!(!info.visible_at(Verbosity::Normal));
        assert!(info.visible_at(Verbosity::Verbose));
    }
}
