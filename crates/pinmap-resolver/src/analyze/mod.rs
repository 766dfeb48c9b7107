//! Static module analysis
//!
//! Turns fetched module source into its dependency specifiers plus size and
//! integrity. ES modules go through [`lexer::scan_imports`]; sources that
//! are a single `System.register` call are read from the register deps array.

pub mod lexer;

use tracing::warn;

use pinmap_core::utils::sri_sha384;

pub use lexer::{ImportRecord, LexError};

/// What a module imports, plus metadata for the import map
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Analysis {
    /// Static import specifiers, first occurrence order, deduplicated
    pub deps: Vec<String>,
    /// Literal `import()` specifiers, first occurrence order, deduplicated
    pub dynamic_deps: Vec<String>,
    /// Source length in bytes
    pub size: usize,
    /// `sha384-` subresource integrity of the source
    pub integrity: String,
    /// Source was in System.register format
    pub system: bool,
}

/// Analyze module source fetched from `url`.
///
/// Non-literal dynamic imports cannot be followed; each is logged and
/// skipped.
pub fn analyze_source(source: &[u8], url: &str) -> Result<Analysis, LexError> {
    let text = String::from_utf8_lossy(source);
    let mut analysis = Analysis {
        size: source.len(),
        integrity: sri_sha384(source),
        ..Analysis::default()
    };

    if let Some(deps) = lexer::scan_system_register(&text) {
        analysis.system = true;
        for dep in deps {
            push_unique(&mut analysis.deps, dep);
        }
        return Ok(analysis);
    }

    for record in lexer::scan_imports(&text)? {
        match (record.specifier, record.dynamic) {
            (Some(specifier), false) => push_unique(&mut analysis.deps, specifier),
            (Some(specifier), true) => push_unique(&mut analysis.dynamic_deps, specifier),
            (None, _) => warn!("Unable to trace non-literal dynamic import in {}", url),
        }
    }
    Ok(analysis)
}

fn push_unique(list: &mut Vec<String>, specifier: String) {
    if !list.contains(&specifier) {
        list.push(specifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_module() {
        let source = b"import { a } from './a.js';\nimport './a.js';\nexport * from 'lit';\nconst b = await import('./b.js');\nimport(`./${name}.js`);\n";
        let analysis = analyze_source(source, "file:///app/main.js").unwrap();

        assert_eq!(analysis.deps, vec!["./a.js", "lit"]);
        assert_eq!(analysis.dynamic_deps, vec!["./b.js"]);
        assert_eq!(analysis.size, source.len());
        assert!(analysis.integrity.starts_with("sha384-"));
        assert!(!analysis.system);
    }

    #[test]
    fn test_analyze_system_register() {
        let source = b"System.register(['react', './util.js'], function (_export) { return {}; });";
        let analysis = analyze_source(source, "https://cdn.test/app.js").unwrap();
        assert!(analysis.system);
        assert_eq!(analysis.deps, vec!["react", "./util.js"]);
        assert!(analysis.dynamic_deps.is_empty());
    }

    #[test]
    fn test_analyze_reports_lex_errors() {
        let err = analyze_source(b"import 'unterminated", "file:///app/bad.js").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
