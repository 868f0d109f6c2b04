//! Plugin eligibility checks.
//!
//! Before loading a plugin, its `[requirements]` are validated against the
//! current system.

use crate::manifest::PluginRequirements;

/// Result of eligibility checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub missing_os: bool,
    pub missing_bins: Vec<String>,
    pub missing_env: Vec<String>,
}

impl EligibilityResult {
    /// Human-readable list of unmet requirements.
    pub fn reasons(&self) -> String {
        let mut reasons = Vec::new();
        if self.missing_os {
            reasons.push(format!("unsupported os '{}'", std::env::consts::OS));
        }
        if !self.missing_bins.is_empty() {
            reasons.push(format!("missing binaries: {}", self.missing_bins.join(", ")));
        }
        if !self.missing_env.is_empty() {
            reasons.push(format!("missing env vars: {}", self.missing_env.join(", ")));
        }
        reasons.join("; ")
    }
}

/// Check whether `requirements` are met on the current system.
pub fn check_eligibility(requirements: &PluginRequirements) -> EligibilityResult {
    let missing_os = !requirements.os.is_empty()
        && !requirements
            .os
            .iter()
            .any(|os| os == std::env::consts::OS || (os == "darwin" && cfg!(target_os = "macos")));

    let missing_bins: Vec<String> = requirements
        .bins
        .iter()
        .filter(|bin| which::which(bin.as_str()).is_err())
        .cloned()
        .collect();

    let missing_env: Vec<String> = requirements
        .env
        .iter()
        .filter(|var| std::env::var_os(var.as_str()).is_none())
        .cloned()
        .collect();

    EligibilityResult {
        eligible: !missing_os && missing_bins.is_empty() && missing_env.is_empty(),
        missing_os,
        missing_bins,
        missing_env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_requirements_is_eligible() {
        let result = check_eligibility(&PluginRequirements::default());
        assert!(result.eligible);
        assert!(result.reasons().is_empty());
    }

    #[test]
    fn wrong_os_is_ineligible() {
        let result = check_eligibility(&PluginRequirements {
            os: vec!["nonexistent-os".into()],
            ..Default::default()
        });
        assert!(!result.eligible);
        assert!(result.missing_os);
        assert!(result.reasons().contains("unsupported os"));
    }

    #[test]
    fn current_os_is_eligible() {
        let result = check_eligibility(&PluginRequirements {
            os: vec![std::env::consts::OS.into()],
            ..Default::default()
        });
        assert!(!result.missing_os);
    }

    #[test]
    fn missing_bin_is_ineligible() {
        let result = check_eligibility(&PluginRequirements {
            bins: vec!["sh".into(), "nonexistent_binary_xyz_12345".into()],
            ..Default::default()
        });
        assert!(!result.eligible);
        assert_eq!(result.missing_bins, vec!["nonexistent_binary_xyz_12345"]);
    }

    #[test]
    fn env_requirements() {
        let result = check_eligibility(&PluginRequirements {
            env: vec!["PATH".into(), "TESSERA_TEST_NONEXISTENT_VAR_XYZ".into()],
            ..Default::default()
        });
        assert!(!result.eligible);
        assert_eq!(result.missing_env, vec!["TESSERA_TEST_NONEXISTENT_VAR_XYZ"]);
    }
}
