use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const SCHEME_SEPARATOR: &str = "://";

/// Bare artifact file name taken from a pacman `--print` listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(String);

impl PackageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageRef {
    fn from(value: &str) -> Self {
        PackageRef(value.to_string())
    }
}

/// Extracts the files a `-Sp`/`-Sup` run would download.
///
/// Only tokens carrying a URI scheme count; everything up to the last `/`
/// after the scheme is dropped. The list is ordered by first appearance, so
/// a repeated name is dropped and keeps its first position.
pub fn parse_fetch_list(stdout: &str) -> Vec<PackageRef> {
    let mut seen = HashSet::new();
    stdout
        .split_whitespace()
        .filter_map(artifact_name)
        .filter(|name| seen.insert(*name))
        .map(PackageRef::from)
        .collect()
}

fn artifact_name(token: &str) -> Option<&str> {
    let scheme_end = token.find(SCHEME_SEPARATOR)? + SCHEME_SEPARATOR.len();
    let rest = &token[scheme_end..];
    let name = match rest.rfind('/') {
        Some(idx) => &rest[idx + 1..],
        None => token,
    };
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(refs: &[PackageRef]) -> Vec<&str> {
        refs.iter().map(PackageRef::as_str).collect()
    }

    #[test]
    fn test_parses_urls_in_order() {
        let out = "resolving dependencies...\nhttp://repo/pkg-a.tar.gz http://repo/pkg-b.tar.gz\n";
        assert_eq!(
            names(&parse_fetch_list(out)),
            vec!["pkg-a.tar.gz", "pkg-b.tar.gz"]
        );
    }

    #[test]
    fn test_no_urls_means_nothing_to_fetch() {
        let out = ":: Synchronizing package databases...\n there is nothing to do\n";
        assert!(parse_fetch_list(out).is_empty());
        assert!(parse_fetch_list("").is_empty());
    }

    #[test]
    fn test_file_scheme_and_nested_paths() {
        let out = "file:///var/cache/pacrelay/repository/mod-host-1.2-1-armv7h.pkg.tar.xz\n\
                   https://mirror.example.org/armv7h/extra/lilv-0.24-2-armv7h.pkg.tar.xz";
        assert_eq!(
            names(&parse_fetch_list(out)),
            vec![
                "mod-host-1.2-1-armv7h.pkg.tar.xz",
                "lilv-0.24-2-armv7h.pkg.tar.xz"
            ]
        );
    }

    #[test]
    fn test_token_without_path_kept_whole() {
        assert_eq!(names(&parse_fetch_list("http://host")), vec!["http://host"]);
    }

    #[test]
    fn test_trailing_slash_dropped() {
        assert!(parse_fetch_list("http://repo/dir/").is_empty());
    }

    #[test]
    fn test_duplicates_keep_first_position() {
        let out = "http://a/x.tar.gz http://a/y.tar.gz http://b/x.tar.gz";
        assert_eq!(names(&parse_fetch_list(out)), vec!["x.tar.gz", "y.tar.gz"]);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let out = "warning: foo\nhttp://r/a.pkg.tar.xz\nhttp://r/b.pkg.tar.xz\n";
        assert_eq!(parse_fetch_list(out), parse_fetch_list(out));
    }

    #[test]
    fn test_serializes_as_plain_strings() {
        let refs = parse_fetch_list("http://r/a.tar.gz");
        assert_eq!(serde_json::to_string(&refs).unwrap(), r#"["a.tar.gz"]"#);
    }
}
