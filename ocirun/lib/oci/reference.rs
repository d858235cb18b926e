use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{
    config::{DEFAULT_REPO_NAMESPACE, DEFAULT_TAG},
    OcirunError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

static REPOSITORY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:[._-][a-z0-9]+)*)(/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A `(repository, tag)` pair identifying an image on the registry.
///
/// Repositories without a slash are implicitly prefixed with
/// [`DEFAULT_REPO_NAMESPACE`]; an omitted tag defaults to [`DEFAULT_TAG`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    repository: String,
    tag: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reference {
    /// The repository name, already expanded with the default namespace.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, defaulted to [`DEFAULT_TAG`] when not given.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The flattened `<repo>_<tag>` form used as the on-disk directory name
    /// in the image store.
    pub fn flat_name(&self) -> String {
        format!("{}_{}", self.repository.replace('/', "_"), self.tag)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = OcirunError;

    /// Parses `repository[:tag]`, e.g. `busybox`, `busybox:latest`, or
    /// `library/nginx:1.27`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OcirunError::InvalidReference("input is empty".into()));
        }

        let (repo_part, tag_part) = match s.rfind(':') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => (s, DEFAULT_TAG),
        };

        if repo_part.is_empty() {
            return Err(OcirunError::InvalidReference("repository is empty".into()));
        }

        let repository = if repo_part.contains('/') {
            repo_part.to_string()
        } else {
            format!("{}/{}", DEFAULT_REPO_NAMESPACE, repo_part)
        };

        if !REPOSITORY_REGEX.is_match(&repository) {
            return Err(OcirunError::InvalidReference(format!(
                "invalid repository: {}",
                repository
            )));
        }

        if !TAG_REGEX.is_match(tag_part) {
            return Err(OcirunError::InvalidReference(format!(
                "invalid tag: {}",
                tag_part
            )));
        }

        Ok(Reference {
            repository,
            tag: tag_part.to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace_and_tag() {
        let r: Reference = "busybox".parse().unwrap();
        assert_eq!(r.repository(), "library/busybox");
        assert_eq!(r.tag(), "latest");
        assert_eq!(r.flat_name(), "library_busybox_latest");
    }

    #[test]
    fn test_explicit_tag() {
        let r: Reference = "busybox:1.36".parse().unwrap();
        assert_eq!(r.repository(), "library/busybox");
        assert_eq!(r.tag(), "1.36");
    }

    #[test]
    fn test_multi_segment_repository() {
        let r: Reference = "myorg/myapp:v2".parse().unwrap();
        assert_eq!(r.repository(), "myorg/myapp");
        assert_eq!(r.tag(), "v2");
        assert_eq!(r.flat_name(), "myorg_myapp_v2");
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!("".parse::<Reference>().is_err());
    }

    #[test]
    fn test_invalid_repository_rejected() {
        assert!("Library/Alpine".parse::<Reference>().is_err());
    }

    #[test]
    fn test_invalid_tag_rejected() {
        assert!("alpine:t!ag".parse::<Reference>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let r: Reference = "library/busybox:latest".parse().unwrap();
        assert_eq!(r.to_string(), "library/busybox:latest");
    }
}
