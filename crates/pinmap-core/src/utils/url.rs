//! URL helpers shared by the lockfile, resolver and import map.

use url::Url;

/// `./x`, `../x`, `/x`, `.` or `..`
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// Parses as an absolute URL
pub fn is_url(specifier: &str) -> bool {
    Url::parse(specifier).is_ok()
}

/// A bare specifier such as `react` or `@scope/pkg/sub`
pub fn is_plain(specifier: &str) -> bool {
    !is_relative(specifier) && !is_url(specifier)
}

/// Append a trailing `/` if missing
pub fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Express `url` relative to the directory URL `base`.
///
/// Same-origin URLs become `./` or `../` paths; anything else is returned
/// absolute. `base.join(&relative_url(url, base)) == url` always holds.
pub fn relative_url(url: &Url, base: &Url) -> String {
    match base.make_relative(url) {
        Some(relative) if relative.starts_with("../") => relative,
        Some(relative) if relative.is_empty() => "./".to_string(),
        Some(relative) if !relative.starts_with('?') && !relative.starts_with('#') => {
            format!("./{}", relative)
        },
        _ => url.to_string(),
    }
}

/// Resolve a stored map value (relative or absolute) against `base`
pub fn resolve_url(value: &str, base: &Url) -> Option<Url> {
    base.join(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specifier_kinds() {
        assert!(is_relative("./a.js"));
        assert!(is_relative("/abs.js"));
        assert!(!is_relative("react"));
        assert!(is_plain("react"));
        assert!(is_plain("@scope/pkg/sub.js"));
        assert!(!is_plain("https://ga.jspm.io/npm:react@18.2.0/index.js"));
        assert!(!is_plain("node:fs"));
    }

    #[test]
    fn test_relative_url() {
        let base = Url::parse("file:///project/app/").unwrap();
        let inside = Url::parse("file:///project/app/src/main.js").unwrap();
        let sibling = Url::parse("file:///project/lib/util.js").unwrap();
        let remote = Url::parse("https://ga.jspm.io/npm:lit@2.0.0/index.js").unwrap();

        assert_eq!(relative_url(&inside, &base), "./src/main.js");
        assert_eq!(relative_url(&sibling, &base), "../lib/util.js");
        assert_eq!(relative_url(&base, &base), "./");
        assert_eq!(relative_url(&remote, &base), remote.to_string());
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(with_trailing_slash("file:///a"), "file:///a/");
        assert_eq!(with_trailing_slash("file:///a/"), "file:///a/");
    }
}
