/// Selects which repository's record of a multi-repository build is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyFilter<'a> {
    #[default]
    Any,
    /// Substring of the repository key, as configured by `scm_key`.
    Contains(&'a str),
    Exact(&'a str),
}

impl<'a> KeyFilter<'a> {
    /// An absent or blank `scm_key` matches every repository.
    pub fn scm_key(scm_key: Option<&'a str>) -> Self {
        match scm_key.map(str::trim) {
            Some(key) if !key.is_empty() => Self::Contains(key),
            _ => Self::Any,
        }
    }

    pub fn matches(self, repository_key: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Contains(key) => repository_key.contains(key),
            Self::Exact(key) => repository_key == key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_scm_key_matches_everything() {
        assert_eq!(KeyFilter::scm_key(None), KeyFilter::Any);
        assert_eq!(KeyFilter::scm_key(Some("  ")), KeyFilter::Any);
        assert_eq!(KeyFilter::scm_key(Some(" tools ")), KeyFilter::Contains("tools"));
    }

    #[test]
    fn exact_and_substring_matching_differ() {
        assert!(KeyFilter::Contains("app").matches("app-tools"));
        assert!(!KeyFilter::Exact("app").matches("app-tools"));
        assert!(KeyFilter::Exact("app-tools").matches("app-tools"));
        assert!(KeyFilter::Any.matches(""));
    }
}
