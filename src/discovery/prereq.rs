//! Local prerequisites a discovery provider declares, checked before a run

use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{DiscoveryError, Result};

/// What a prerequisite checks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreReqKind {
    /// An executable that must be on `PATH`
    Binary { executable: String },
}

/// A local tool or setting a provider needs before it can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreReq {
    pub name: String,
    pub help: String,
    pub kind: PreReqKind,
}

impl PreReq {
    pub fn binary(name: &str, executable: &str, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: PreReqKind::Binary {
                executable: executable.to_string(),
            },
        }
    }

    pub fn check(&self) -> Result<()> {
        self.check_in(std::env::var_os("PATH"))
    }

    /// Check against an explicit search path
    pub fn check_in(&self, search_path: Option<OsString>) -> Result<()> {
        let satisfied = match &self.kind {
            PreReqKind::Binary { executable } => search_path
                .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(executable))))
                .unwrap_or(false),
        };

        if satisfied {
            debug!(prereq = %self.name, "Prerequisite satisfied");
            Ok(())
        } else {
            warn!(prereq = %self.name, help = %self.help, "Prerequisite not met");
            Err(DiscoveryError::PreReqNotMet {
                name: self.name.clone(),
                help: self.help.clone(),
            })
        }
    }
}

/// Check every prerequisite, stopping at the first unmet one
pub fn check_all(prereqs: &[PreReq]) -> Result<()> {
    prereqs.iter().try_for_each(PreReq::check)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn authenticator() -> PreReq {
        PreReq::binary(
            "aws-iam-authenticator",
            "aws-iam-authenticator",
            "install aws-iam-authenticator and add it to PATH",
        )
    }

    #[test]
    fn test_binary_found_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("aws-iam-authenticator");
        fs::write(&bin, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let path = std::env::join_paths([dir.path()]).unwrap();
        assert!(authenticator().check_in(Some(path)).is_ok());
    }

    #[test]
    fn test_binary_missing_reports_help() {
        let dir = tempfile::tempdir().unwrap();
        let path = std::env::join_paths([dir.path()]).unwrap();

        match authenticator().check_in(Some(path)) {
            Err(DiscoveryError::PreReqNotMet { name, help }) => {
                assert_eq!(name, "aws-iam-authenticator");
                assert!(help.contains("install"));
            }
            other => panic!("expected unmet prereq, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("aws-iam-authenticator"), "data").unwrap();
        let path = std::env::join_paths([dir.path()]).unwrap();

        assert!(authenticator().check_in(Some(path)).is_err());
    }

    #[test]
    fn test_unset_path_is_unmet() {
        assert!(authenticator().check_in(None).is_err());
    }

    #[test]
    fn test_check_all_empty_is_ok() {
        assert!(check_all(&[]).is_ok());
    }
}
