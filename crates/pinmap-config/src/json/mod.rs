//! package.json parsing and style-preserving serialization
//!
//! [`PackageConfig`] is the lenient, read-only view of any package's
//! package.json used during resolution. [`Manifest`] is the project's own
//! package.json, edited in place and written back in the style it was read in.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use pinmap_core::error::PinmapError;
use pinmap_core::types::DependencyKind;

use crate::ConfigResult;

/// Whitespace conventions detected from an existing JSON file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStyle {
    /// One level of indentation
    pub tab: String,
    pub newline: String,
    /// Base indentation of every line
    pub indent: String,
    pub trailing_newline: bool,
}

impl Default for JsonStyle {
    fn default() -> Self {
        Self {
            tab: "  ".to_string(),
            newline: "\n".to_string(),
            indent: String::new(),
            trailing_newline: true,
        }
    }
}

impl JsonStyle {
    /// Best-effort detection of newline, base indent and tab unit
    pub fn detect(source: &str) -> Self {
        let mut style = JsonStyle::default();

        if let Some(index) = source.find(['\r', '\n']) {
            style.newline = if source[index..].starts_with("\r\n") {
                "\r\n".to_string()
            } else {
                source[index..index + 1].to_string()
            };
        }

        let lines: Vec<&str> = source.split(style.newline.as_str()).collect();
        let leading = |line: &str| -> String {
            line.chars().take_while(|c| *c == ' ' || *c == '\t').collect()
        };

        // Smallest indentation of any non-blank line is the base indent
        if let Some(indent) = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| leading(line))
            .min_by_key(|indent| indent.len())
        {
            style.indent = indent;
        }

        // Most common change in indentation between consecutive lines is one tab
        let spaces: Vec<String> = lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| leading(line).chars().skip(style.indent.chars().count()).collect())
            .collect();
        let mut diff_freqs: IndexMap<usize, usize> = IndexMap::new();
        let mut last_len = 0;
        for space in &spaces {
            let diff = space.len().abs_diff(last_len);
            if diff != 0 {
                *diff_freqs.entry(diff).or_default() += 1;
            }
            last_len = space.len();
        }
        let best_len = diff_freqs
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(len, _)| *len);

        if let Some(best_len) = best_len {
            let mut samples: IndexMap<String, usize> = IndexMap::new();
            for space in spaces.iter().filter(|space| space.len() >= best_len) {
                let sample = space[space.len() - best_len..].to_string();
                *samples.entry(sample).or_default() += 1;
            }
            if let Some((sample, _)) = samples.into_iter().max_by_key(|(_, count)| *count) {
                style.tab = sample;
            }
        }

        style.trailing_newline = !source.is_empty() && source.ends_with(style.newline.as_str());
        style
    }
}

/// Serialize `value` in `style`, or with no whitespace at all when `minify` is set
pub fn stringify_styled<T: Serialize>(value: &T, style: &JsonStyle, minify: bool) -> ConfigResult<String> {
    let to_error = |e: serde_json::Error| PinmapError::internal(format!("Failed to serialize JSON: {}", e));
    if minify {
        return serde_json::to_string(value).map_err(to_error);
    }

    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(style.tab.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer).map_err(to_error)?;
    let pretty = String::from_utf8(buffer)
        .map_err(|e| PinmapError::internal(format!("Serialized JSON is not UTF-8: {}", e)))?;

    let mut output = style.indent.clone();
    output.push_str(&pretty.replace('\n', &format!("{}{}", style.newline, style.indent)));
    if style.trailing_newline {
        output.push_str(&style.newline);
    }
    Ok(output)
}

/// Parse JSON text, stripping a byte order mark, and detect its style
pub fn parse_styled(source: &str, path: &str) -> ConfigResult<(Value, JsonStyle)> {
    let source = source.strip_prefix('\u{FEFF}').unwrap_or(source);
    let style = JsonStyle::detect(source);
    let json = serde_json::from_str(source).map_err(|e| PinmapError::ManifestParse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    Ok((json, style))
}

/// A package.json `exports` tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportsTarget {
    Leaf(String),
    Null,
    /// Condition name to target, in declaration order
    Conditional(IndexMap<String, ExportsTarget>),
    List(Vec<ExportsTarget>),
}

impl ExportsTarget {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(target) => ExportsTarget::Leaf(target.clone()),
            Value::Array(items) => ExportsTarget::List(items.iter().map(Self::from_value).collect()),
            Value::Object(map) => ExportsTarget::Conditional(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_value(value)))
                    .collect(),
            ),
            _ => ExportsTarget::Null,
        }
    }
}

/// The `browser` field: a main replacement or a file remapping table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserField {
    Main(String),
    /// `false` values exclude the file
    Map(IndexMap<String, Option<String>>),
}

/// Parsed package.json of a resolved package.
///
/// Parsing is lenient: fields of unexpected types are ignored rather than
/// failing the whole config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageConfig {
    pub registry: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub main: Option<String>,
    pub module_type: Option<String>,
    pub files: Option<Vec<String>>,
    pub browser: Option<BrowserField>,
    pub exports: Option<ExportsTarget>,
    pub dependencies: IndexMap<String, String>,
    pub peer_dependencies: IndexMap<String, String>,
    pub optional_dependencies: IndexMap<String, String>,
    pub dev_dependencies: IndexMap<String, String>,
}

impl PackageConfig {
    /// Parse package.json text; `None` if it is not a JSON object
    pub fn parse(source: &str) -> Option<Self> {
        let source = source.strip_prefix('\u{FEFF}').unwrap_or(source);
        let value: Value = serde_json::from_str(source).ok()?;
        value.as_object().map(Self::from_object)
    }

    pub fn from_object(object: &Map<String, Value>) -> Self {
        let string = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let deps = |key: &str| -> IndexMap<String, String> {
            object
                .get(key)
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(name, target)| Some((name.clone(), target.as_str()?.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };

        let browser = match object.get("browser") {
            Some(Value::String(main)) => Some(BrowserField::Main(main.clone())),
            Some(Value::Object(map)) => Some(BrowserField::Map(
                map.iter()
                    .filter_map(|(key, value)| match value {
                        Value::String(target) => Some((key.clone(), Some(target.clone()))),
                        Value::Bool(false) => Some((key.clone(), None)),
                        _ => None,
                    })
                    .collect(),
            )),
            _ => None,
        };

        let files = object.get("files").and_then(Value::as_array).map(|files| {
            files.iter().filter_map(Value::as_str).map(str::to_string).collect()
        });

        Self {
            registry: string("registry"),
            name: string("name"),
            version: string("version"),
            main: string("main"),
            module_type: string("type"),
            files,
            browser,
            exports: object.get("exports").filter(|v| !v.is_null()).map(ExportsTarget::from_value),
            dependencies: deps("dependencies"),
            peer_dependencies: deps("peerDependencies"),
            optional_dependencies: deps("optionalDependencies"),
            dev_dependencies: deps("devDependencies"),
        }
    }

    /// Dependency map for a field kind
    pub fn field(&self, kind: DependencyKind) -> &IndexMap<String, String> {
        match kind {
            DependencyKind::Normal => &self.dependencies,
            DependencyKind::Dev => &self.dev_dependencies,
            DependencyKind::Peer => &self.peer_dependencies,
            DependencyKind::Optional => &self.optional_dependencies,
        }
    }

    /// Declared target for `name`, searching fields in lookup order
    pub fn dependency(&self, name: &str) -> Option<(&str, DependencyKind)> {
        DependencyKind::LOOKUP_ORDER
            .iter()
            .find_map(|kind| self.field(*kind).get(name).map(|target| (target.as_str(), *kind)))
    }

    /// Every declared dependency name, de-duplicated
    pub fn dep_list(&self, dev: bool) -> Vec<String> {
        let mut names: indexmap::IndexSet<String> = self.dependencies.keys().cloned().collect();
        if dev {
            names.extend(self.dev_dependencies.keys().cloned());
        }
        names.extend(self.peer_dependencies.keys().cloned());
        names.extend(self.optional_dependencies.keys().cloned());
        names.into_iter().collect()
    }
}

/// The project's package.json, editable with formatting preserved
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: Utf8PathBuf,
    json: Map<String, Value>,
    style: JsonStyle,
}

impl Manifest {
    /// Load from disk; `None` when the file does not exist
    pub async fn load(path: &Utf8Path) -> ConfigResult<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(source) => Self::parse(&source, path).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PinmapError::io(format!("Failed to read {}", path), e)),
        }
    }

    pub fn parse(source: &str, path: &Utf8Path) -> ConfigResult<Self> {
        let (json, style) = parse_styled(source, path.as_str())?;
        match json {
            Value::Object(json) => Ok(Self {
                path: path.to_path_buf(),
                json,
                style,
            }),
            _ => Err(PinmapError::ManifestParse {
                path: path.to_string(),
                message: "expected a JSON object".to_string(),
            }),
        }
    }

    /// Empty manifest that will be created on first save
    pub fn empty(path: &Utf8Path) -> Self {
        Self {
            path: path.to_path_buf(),
            json: Map::new(),
            style: JsonStyle::default(),
        }
    }

    pub fn config(&self) -> PackageConfig {
        PackageConfig::from_object(&self.json)
    }

    pub fn style(&self) -> &JsonStyle {
        &self.style
    }

    /// Declare `name` in the `kind` field, removing it from the other fields.
    /// Returns whether the manifest changed.
    pub fn set_dependency(&mut self, name: &str, target: &str, kind: DependencyKind) -> bool {
        let mut changed = false;
        for other in DependencyKind::LOOKUP_ORDER.iter().filter(|other| **other != kind) {
            if let Some(Value::Object(field)) = self.json.get_mut(other.field_name()) {
                changed |= field.shift_remove(name).is_some();
            }
        }

        let field = self
            .json
            .entry(kind.field_name())
            .or_insert_with(|| Value::Object(Map::new()));
        if !field.is_object() {
            *field = Value::Object(Map::new());
        }
        if let Value::Object(field) = field {
            if field.get(name).and_then(Value::as_str) != Some(target) {
                field.insert(name.to_string(), Value::String(target.to_string()));
                changed = true;
            }
        }
        changed
    }

    pub fn to_styled_string(&self) -> ConfigResult<String> {
        stringify_styled(&self.json, &self.style, false)
    }

    /// Write back if the rendered text differs from the file on disk
    pub async fn save(&self) -> ConfigResult<bool> {
        let rendered = self.to_styled_string()?;
        let existing = tokio::fs::read_to_string(&self.path).await.ok();
        if existing.as_deref() == Some(rendered.as_str()) {
            return Ok(false);
        }
        crate::lock::write_atomic(&self.path, &rendered).await?;
        debug!("Updated {}", self.path);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_style_two_spaces() {
        let style = JsonStyle::detect("{\n  \"a\": {\n    \"b\": 1\n  }\n}\n");
        assert_eq!(style.tab, "  ");
        assert_eq!(style.newline, "\n");
        assert_eq!(style.indent, "");
        assert!(style.trailing_newline);
    }

    #[test]
    fn test_detect_style_tabs_crlf() {
        let style = JsonStyle::detect("{\r\n\t\"a\": {\r\n\t\t\"b\": 1\r\n\t}\r\n}");
        assert_eq!(style.tab, "\t");
        assert_eq!(style.newline, "\r\n");
        assert!(!style.trailing_newline);
    }

    #[test]
    fn test_stringify_round_trips_style() {
        let source = "{\n    \"name\": \"app\",\n    \"dependencies\": {\n        \"a\": \"^1.0.0\"\n    }\n}\n";
        let (json, style) = parse_styled(source, "package.json").unwrap();
        assert_eq!(style.tab, "    ");
        assert_eq!(stringify_styled(&json, &style, false).unwrap(), source);
        assert_eq!(
            stringify_styled(&json, &style, true).unwrap(),
            "{\"name\":\"app\",\"dependencies\":{\"a\":\"^1.0.0\"}}"
        );
    }

    #[test]
    fn test_package_config_lenient_parse() {
        let config = PackageConfig::parse(
            r#"{
                "name": "pkg",
                "main": "lib/index.js",
                "files": "not-an-array",
                "browser": { "./lib/node.js": "./lib/browser.js", "fs": false },
                "exports": { ".": { "browser": "./b.js", "default": "./d.js" } },
                "dependencies": { "a": "^1.0.0", "weird": 5 },
                "devDependencies": { "b": "2" },
                "peerDependencies": { "a": "^1.0.0", "c": "*" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.main.as_deref(), Some("lib/index.js"));
        assert_eq!(config.files, None);
        assert!(!config.dependencies.contains_key("weird"));
        assert_eq!(config.dependency("c"), Some(("*", DependencyKind::Peer)));
        assert_eq!(config.dependency("b"), Some(("2", DependencyKind::Dev)));
        assert_eq!(config.dep_list(false), vec!["a", "c"]);
        assert_eq!(config.dep_list(true), vec!["a", "b", "c"]);

        match config.browser {
            Some(BrowserField::Map(map)) => assert_eq!(map.get("fs"), Some(&None)),
            other => panic!("unexpected browser field {:?}", other),
        }
        match config.exports {
            Some(ExportsTarget::Conditional(map)) => assert!(map.contains_key(".")),
            other => panic!("unexpected exports {:?}", other),
        }
        assert!(PackageConfig::parse("[1, 2]").is_none());
        assert!(PackageConfig::parse("{ nope").is_none());
    }

    #[test]
    fn test_set_dependency_moves_between_fields() {
        let path = Utf8Path::new("package.json");
        let mut manifest = Manifest::parse(
            "{\n\t\"name\": \"app\",\n\t\"devDependencies\": {\n\t\t\"a\": \"^1.0.0\"\n\t}\n}\n",
            path,
        )
        .unwrap();

        assert!(manifest.set_dependency("a", "^1.0.0", DependencyKind::Normal));
        assert!(!manifest.set_dependency("a", "^1.0.0", DependencyKind::Normal));

        let config = manifest.config();
        assert_eq!(config.dependency("a"), Some(("^1.0.0", DependencyKind::Normal)));
        assert!(config.dev_dependencies.is_empty());
        assert!(manifest.to_styled_string().unwrap().contains("\t\"dependencies\": {\n\t\t\"a\": \"^1.0.0\"\n\t}"));
    }

    #[tokio::test]
    async fn test_manifest_save_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("package.json")).unwrap();
        let source = "{\n  \"name\": \"app\"\n}\n";
        tokio::fs::write(&path, source).await.unwrap();

        let mut manifest = Manifest::load(&path).await.unwrap().unwrap();
        assert!(!manifest.save().await.unwrap());

        manifest.set_dependency("lit", "^2.0.0", DependencyKind::Normal);
        assert!(manifest.save().await.unwrap());
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            written,
            "{\n  \"name\": \"app\",\n  \"dependencies\": {\n    \"lit\": \"^2.0.0\"\n  }\n}\n"
        );

        let missing = Utf8PathBuf::from_path_buf(dir.path().join("missing.json")).unwrap();
        assert!(Manifest::load(&missing).await.unwrap().is_none());
    }
}
