use url::Url;

/// Normalized cache key for a fetched resource.
///
/// Fragment-only references (`""`, `"#id"`) name the root document of the
/// current resolution context; everything else is keyed by its path with the
/// fragment stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    Root,
    Path(String),
}

impl ResourceKey {
    pub fn parse(url: &str) -> Self {
        let (path, _fragment) = split_fragment(url);
        let path = path.trim();
        if path.is_empty() {
            ResourceKey::Root
        } else {
            ResourceKey::Path(path.to_string())
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            ResourceKey::Root => None,
            ResourceKey::Path(p) => Some(p.as_str()),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ResourceKey::Root)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKey::Root => write!(f, "<root>"),
            ResourceKey::Path(p) => write!(f, "{p}"),
        }
    }
}

/// Splits `path#fragment`. An empty fragment (`"doc.kml#"`) is reported as `None`.
pub fn split_fragment(url: &str) -> (&str, Option<&str>) {
    match url.find('#') {
        Some(i) => {
            let fragment = &url[i + 1..];
            (&url[..i], (!fragment.is_empty()).then_some(fragment))
        }
        None => (url, None),
    }
}

/// True for `scheme:` prefixed references. Single letters are treated as
/// Windows drive letters, not schemes.
pub fn has_scheme(s: &str) -> bool {
    let Some(colon) = s.find(':') else {
        return false;
    };
    let scheme = &s[..colon];
    scheme.len() > 1
        && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolves `href` relative to the document located at `base`.
pub fn join_href(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return base.to_string();
    }
    if has_scheme(href) {
        return href.to_string();
    }
    // Root-relative hrefs stay on the base URL's origin.
    if has_scheme(base)
        && let Ok(base_url) = Url::parse(base)
        && let Ok(joined) = base_url.join(href)
    {
        return joined.to_string();
    }
    if href.starts_with('/') {
        return normalize_path(href);
    }

    let dir = match base.rfind('/') {
        Some(i) => &base[..=i],
        None => "",
    };
    normalize_path(&format!("{dir}{href}"))
}

/// Collapses `.` and `..` segments. Leading `..` segments of a relative path
/// are kept because there is nothing to pop them against.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if absolute => {}
                _ => out.push(".."),
            },
            s => out.push(s),
        }
    }
    let joined = out.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Archive entry names are relative, slash separated, without a leading `./`.
pub fn normalize_entry_name(href: &str) -> String {
    let trimmed = href.trim().trim_start_matches('/');
    normalize_path(trimmed)
}

/// Cache location of an entry inside an archive (`archive!/entry`).
pub fn archive_entry_location(archive: &str, entry: &str) -> String {
    format!("{archive}!/{}", normalize_entry_name(entry))
}

#[cfg(test)]
mod tests {
    use super::{
        ResourceKey, archive_entry_location, has_scheme, join_href, normalize_path,
        split_fragment,
    };

    #[test]
    fn fragment_only_references_are_root() {
        assert_eq!(ResourceKey::parse(""), ResourceKey::Root);
        assert_eq!(ResourceKey::parse("#style"), ResourceKey::Root);
        assert_eq!(
            ResourceKey::parse("styles.kml#style"),
            ResourceKey::Path("styles.kml".to_string())
        );
    }

    #[test]
    fn split_fragment_separates_id() {
        assert_eq!(split_fragment("a.kml#x"), ("a.kml", Some("x")));
        assert_eq!(split_fragment("#x"), ("", Some("x")));
        assert_eq!(split_fragment("a.kml#"), ("a.kml", None));
        assert_eq!(split_fragment("a.kml"), ("a.kml", None));
    }

    #[test]
    fn scheme_detection_ignores_drive_letters() {
        assert!(has_scheme("https://example.com/a.kml"));
        assert!(has_scheme("file:///tmp/a.kml"));
        assert!(!has_scheme("C:/data/a.kml"));
        assert!(!has_scheme("data/a.kml"));
    }

    #[test]
    fn joins_relative_paths_against_document_directory() {
        assert_eq!(join_href("data/doc.kml", "styles.kml"), "data/styles.kml");
        assert_eq!(join_href("data/sub/doc.kml", "../styles.kml"), "data/styles.kml");
        assert_eq!(join_href("doc.kml", "./files/a.png"), "files/a.png");
        assert_eq!(join_href("/srv/doc.kml", "/abs/x.kml"), "/abs/x.kml");
    }

    #[test]
    fn joins_urls_with_url_semantics() {
        assert_eq!(
            join_href("https://example.com/kml/doc.kml", "styles.kml"),
            "https://example.com/kml/styles.kml"
        );
        assert_eq!(
            join_href("data/doc.kml", "https://example.com/x.kml"),
            "https://example.com/x.kml"
        );
    }

    #[test]
    fn root_relative_hrefs_keep_the_base_origin() {
        assert_eq!(
            join_href("https://example.com/kml/doc.kml", "/styles/s.kml"),
            "https://example.com/styles/s.kml"
        );
        assert_eq!(
            join_href("https://example.com/kml/doc.kml", "/live.kml#id"),
            "https://example.com/live.kml#id"
        );
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize_path("a/./b/../c"), "a/c");
        assert_eq!(normalize_path("../a"), "../a");
        assert_eq!(normalize_path("/../a"), "/a");
    }

    #[test]
    fn archive_locations_use_bang_separator() {
        assert_eq!(
            archive_entry_location("data/a.kmz", "./files/doc.kml"),
            "data/a.kmz!/files/doc.kml"
        );
    }
}
