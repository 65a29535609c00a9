//! Translation between server-relative paths and local paths.
//!
//! The server names files relative to the root of the directory it watches
//! (`/ui/main.qml`).  The viewer names the same file under its own *watch
//! root* (`/home/dev/proj/ui/main.qml`).  [`PathMapping`] converts between the
//! two namespaces:
//!
//! ```text
//! to_server_path("file:///home/dev/proj/ui/main.qml") == "/ui/main.qml"
//! to_local_path("/ui/main.qml")                       == "/home/dev/proj/ui/main.qml"
//! ```
//!
//! The conversions are inverses for any path under the watch root without
//! `..` or `.` segments.  Such segments are passed through untouched; the
//! mapping is textual and never touches the filesystem.

/// Prefix of a local `file://` URI in front of an absolute path.
const LOCAL_FILE_URI_PREFIX: &str = "file://";

const SEPARATOR: char = '/';

/// The watch root plus the translation rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathMapping {
    watch_root: String,
}

impl PathMapping {
    /// Creates a mapping for `watch_root`.
    ///
    /// Trailing separators are dropped so `/home/dev/proj/` and
    /// `/home/dev/proj` behave the same.  An empty root maps server paths
    /// onto themselves.
    pub fn new(watch_root: impl Into<String>) -> Self {
        let mut watch_root = watch_root.into();
        while watch_root.ends_with(SEPARATOR) {
            watch_root.pop();
        }
        Self { watch_root }
    }

    /// The normalised watch root.
    pub fn watch_root(&self) -> &str {
        &self.watch_root
    }

    /// Converts a local path (or `file://` URI) to a server-relative path.
    ///
    /// The watch root is only stripped at a path-component boundary, so with
    /// root `/home/dev/proj` the path `/home/dev/proj2/a.qml` is left intact.
    pub fn to_server_path(&self, local: &str) -> String {
        let mut path = local;
        if let Some(rest) = path.strip_prefix(LOCAL_FILE_URI_PREFIX) {
            if rest.starts_with(SEPARATOR) {
                path = rest;
            }
        }
        if let Some(rest) = self.strip_watch_root(path) {
            path = rest;
        }
        with_single_leading_separator(path)
    }

    /// Converts a server-relative path to a local path under the watch root.
    pub fn to_local_path(&self, server_path: &str) -> String {
        format!(
            "{}{}",
            self.watch_root,
            with_single_leading_separator(server_path)
        )
    }

    fn strip_watch_root<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.watch_root.is_empty() {
            return None;
        }
        let rest = path.strip_prefix(self.watch_root.as_str())?;
        if rest.is_empty() || rest.starts_with(SEPARATOR) {
            Some(rest)
        } else {
            None
        }
    }
}

fn with_single_leading_separator(path: &str) -> String {
    format!("{SEPARATOR}{}", path.trim_start_matches(SEPARATOR))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> PathMapping {
        PathMapping::new("/home/dev/proj")
    }

    #[test]
    fn test_to_local_path_prepends_watch_root() {
        assert_eq!(mapping().to_local_path("/a/b.qml"), "/home/dev/proj/a/b.qml");
    }

    #[test]
    fn test_to_local_path_adds_missing_separator() {
        assert_eq!(mapping().to_local_path("a/b.qml"), "/home/dev/proj/a/b.qml");
    }

    #[test]
    fn test_to_local_path_collapses_repeated_leading_separators() {
        assert_eq!(mapping().to_local_path("//a.qml"), "/home/dev/proj/a.qml");
    }

    #[test]
    fn test_to_server_path_strips_watch_root() {
        assert_eq!(mapping().to_server_path("/home/dev/proj/a/b.qml"), "/a/b.qml");
    }

    #[test]
    fn test_to_server_path_strips_file_uri_prefix() {
        assert_eq!(
            mapping().to_server_path("file:///home/dev/proj/main.qml"),
            "/main.qml"
        );
    }

    #[test]
    fn test_to_server_path_outside_root_keeps_path() {
        assert_eq!(mapping().to_server_path("/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn test_to_server_path_relative_gets_leading_separator() {
        assert_eq!(mapping().to_server_path("ui/main.qml"), "/ui/main.qml");
    }

    #[test]
    fn test_to_server_path_only_strips_root_on_component_boundary() {
        assert_eq!(
            mapping().to_server_path("/home/dev/proj2/a.qml"),
            "/home/dev/proj2/a.qml"
        );
    }

    #[test]
    fn test_to_server_path_of_root_itself_is_separator() {
        assert_eq!(mapping().to_server_path("/home/dev/proj"), "/");
    }

    #[test]
    fn test_trailing_separator_on_root_is_normalised() {
        let m = PathMapping::new("/home/dev/proj/");
        assert_eq!(m.watch_root(), "/home/dev/proj");
        assert_eq!(m.to_local_path("/a.qml"), "/home/dev/proj/a.qml");
    }

    #[test]
    fn test_empty_root_maps_paths_onto_themselves() {
        let m = PathMapping::default();
        assert_eq!(m.to_local_path("/a.qml"), "/a.qml");
        assert_eq!(m.to_server_path("/a.qml"), "/a.qml");
    }

    #[test]
    fn test_dot_segments_are_not_canonicalised() {
        assert_eq!(
            mapping().to_local_path("/../secret"),
            "/home/dev/proj/../secret"
        );
    }
}
