use std::fmt;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, label: &str, check: &CheckResult) -> fmt::Result {
    writeln!(f, "  {label:<20}{:<4}{}", check.icon(), check.detail)
}

// ── Doctor ──

/// Local toolchain diagnostics for `slipway doctor`.
#[derive(Debug, Default)]
pub struct DoctorReport {
    pub docker: CheckResult,
    pub daemon: CheckResult,
    pub buildx: CheckResult,
    pub config_file: CheckResult,
    pub project: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, c)| c.passed)
    }

    fn checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Docker CLI", &self.docker),
            ("Docker daemon", &self.daemon),
            ("BuildKit (buildx)", &self.buildx),
            ("slipway.toml", &self.config_file),
            ("pyproject.toml", &self.project),
        ]
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Slipway Doctor")?;
        for (label, check) in self.checks() {
            write_row(f, label, check)?;
        }
        Ok(())
    }
}

// ── Verify ──

/// Post-build checks of a release image against its definition.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Image config names the non-root application identity.
    pub configured_user: CheckResult,
    /// Exec-form entry point matches and no CMD is attached.
    pub entry_point: CheckResult,
    pub working_dir: CheckResult,
    /// The artifact staging directory is gone from the final filesystem.
    pub staging_removed: CheckResult,
    /// The application is installed and the build tool is not.
    pub installed_surface: CheckResult,
    /// A container process reports the configured non-zero uid.
    pub runtime_identity: CheckResult,
    pub ownership: CheckResult,
    pub log_dir_writable: CheckResult,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, c)| c.passed)
    }

    fn checks(&self) -> [(&'static str, &CheckResult); 8] {
        [
            ("User", &self.configured_user),
            ("Entry point", &self.entry_point),
            ("Working dir", &self.working_dir),
            ("Staging removed", &self.staging_removed),
            ("Installed surface", &self.installed_surface),
            ("Runtime identity", &self.runtime_identity),
            ("Ownership", &self.ownership),
            ("Log dir writable", &self.log_dir_writable),
        ]
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image verification")?;
        for (label, check) in self.checks() {
            write_row(f, label, check)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_report_fails() {
        assert!(!DoctorReport::default().all_passed());
        assert!(!VerifyReport::default().all_passed());
    }

    #[test]
    fn display_marks_each_check() {
        let report = DoctorReport {
            docker: CheckResult::ok("27.1.1"),
            daemon: CheckResult::ok("27.1.1"),
            buildx: CheckResult::ok("github.com/docker/buildx v0.16.2"),
            config_file: CheckResult::fail("Not found"),
            project: CheckResult::ok("databaser 0.7.2"),
        };
        let text = report.to_string();

        assert!(!report.all_passed());
        assert!(text.starts_with("Slipway Doctor\n"));
        assert!(text.contains("Docker CLI"));
        assert!(text.lines().any(|l| l.contains("slipway.toml") && l.contains("NG")));
        assert_eq!(text.matches("OK").count(), 4);
    }
}
