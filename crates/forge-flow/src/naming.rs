//! Deterministic run-name derivation.
//!
//! Run names are derived from the normalized project and branch (plus a
//! kind suffix for unit and sonar runs): lower-cased, `_` and `.` replaced
//! with `-`, and truncated to the trailing 62 characters to satisfy the
//! platform's name-length limit while keeping the suffix stable.

use crate::error::{Error, Result};

/// Platform limit on generated resource names.
pub const MAX_NAME_LEN: usize = 62;

/// Extracts the project name from a git URL.
///
/// The URL must end in `.git`; the project is the last `/`-separated
/// segment before the suffix. This is a hard precondition of every
/// reconciliation, not retried.
///
/// # Errors
///
/// Returns [`Error::IllegalGitUrl`] when the URL does not end in `.git`.
pub fn extract_project(git_url: &str) -> Result<String> {
    let Some(stripped) = git_url.strip_suffix(".git") else {
        return Err(Error::IllegalGitUrl {
            url: git_url.to_string(),
        });
    };

    let project = stripped.rsplit('/').next().unwrap_or(stripped);
    if project.is_empty() {
        return Err(Error::IllegalGitUrl {
            url: git_url.to_string(),
        });
    }
    Ok(project.to_string())
}

/// Extracts the service name from a digest-pinned image reference, e.g.
/// `registry.example/team/svc@sha256:abcd...` yields `svc`.
///
/// # Errors
///
/// Returns [`Error::IllegalGitUrl`] when the reference carries no digest.
pub fn extract_service(image_ref: &str) -> Result<String> {
    let Some((url, _digest)) = image_ref.split_once("@sha256") else {
        return Err(Error::IllegalGitUrl {
            url: image_ref.to_string(),
        });
    };

    let service = url.rsplit('/').next().unwrap_or(url);
    if service.is_empty() {
        return Err(Error::IllegalGitUrl {
            url: image_ref.to_string(),
        });
    }
    Ok(service.to_string())
}

/// Normalizes a name part: lower-case with `_` and `.` mapped to `-`.
#[must_use]
pub fn normalize(part: &str) -> String {
    part.to_lowercase().replace(['_', '.'], "-")
}

/// Derives the run name from name parts and an optional kind suffix.
///
/// Parts are joined with `-`, normalized, suffixed, and truncated to the
/// trailing [`MAX_NAME_LEN`] characters; truncating from the front keeps
/// the suffix ordering stable.
#[must_use]
pub fn run_name(parts: &[&str], suffix: Option<&str>) -> String {
    let mut name = normalize(&parts.join("-"));
    if let Some(suffix) = suffix {
        name = format!("{name}-{suffix}");
    }
    if name.len() > MAX_NAME_LEN {
        let cut = name.len() - MAX_NAME_LEN;
        name = name[cut..].to_string();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_project_from_http_and_scp_urls() {
        let http = extract_project("http://git.example/org/go-HyperLPR.git").unwrap();
        let scp = extract_project("root@git.example:org/go-HyperLPR.git").unwrap();
        assert_eq!(http, "go-HyperLPR");
        // The scp form has no trailing slash segment past the colon path.
        assert_eq!(scp, "go-HyperLPR");
    }

    #[test]
    fn url_without_git_suffix_is_illegal() {
        let err = extract_project("http://git.example/org/app").unwrap_err();
        assert!(matches!(err, Error::IllegalGitUrl { .. }));
    }

    #[test]
    fn extracts_service_from_digest_reference() {
        let service =
            extract_service("registry.example/team/svc-ui@sha256:fba94e0ce9ea241fa1047e").unwrap();
        assert_eq!(service, "svc-ui");
    }

    #[test]
    fn image_reference_without_digest_is_illegal() {
        assert!(extract_service("registry.example/team/svc-ui:latest").is_err());
    }

    #[test]
    fn run_name_is_deterministic_and_normalized() {
        let a = run_name(&["My_App", "Feature.Branch"], None);
        let b = run_name(&["My_App", "Feature.Branch"], None);
        assert_eq!(a, b);
        assert_eq!(a, "my-app-feature-branch");
    }

    #[test]
    fn suffix_is_appended_after_normalization() {
        assert_eq!(run_name(&["app", "main"], Some("unit")), "app-main-unit");
        assert_eq!(run_name(&["app", "main"], Some("sonar")), "app-main-sonar");
    }

    #[test]
    fn long_names_keep_the_trailing_62_chars() {
        let long = "x".repeat(100);
        let name = run_name(&[&long, "main"], Some("unit"));
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with("-main-unit"));
    }

    #[test]
    fn scenario_app_main() {
        let project = extract_project("http://git.example/org/app.git").unwrap();
        assert_eq!(run_name(&[&project, "main"], None), "app-main");
    }
}
