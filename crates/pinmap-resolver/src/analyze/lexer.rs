//! Import scanner for ES module sources
//!
//! This is not a parser. It walks the source once, skipping comments,
//! strings, template literals and regular expressions, and records every
//! `import`/`export ... from` specifier plus `import()` calls. Anything it
//! cannot make sense of structurally (an unterminated string, comment,
//! template or regex) is a [`LexError`].

use std::fmt;

/// One import found in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    /// Literal specifier; `None` for `import()` with a computed argument
    pub specifier: Option<String>,
    pub dynamic: bool,
    /// Byte offset of the `import`/`export` keyword
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: &'static str,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.message, self.line, self.column)
    }
}

impl std::error::Error for LexError {}

/// Previous significant token, for telling regexes from division
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    /// Punctuator after which an expression starts
    Operator,
    /// Identifier, literal, `]` or a `)` not closing a statement head: a `/` here divides
    Value,
    /// `.` member access: a following `import` is a property name
    Dot,
}

/// Keywords after which `/` starts a regular expression
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Statement keywords whose parenthesized head is followed by a statement,
/// so `if (x) /re/` starts a regex
const PAREN_KEYWORDS: &[&str] = &["if", "while", "for", "with"];

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    prev: Prev,
    /// Open `{` count
    depth: usize,
    /// Brace depths at which a template `${` was opened
    templates: Vec<usize>,
    /// Open `(`, true for a statement keyword head
    parens: Vec<bool>,
    /// Last token was `if`/`while`/`for`/`with`
    keyword_head: bool,
    imports: Vec<ImportRecord>,
}

/// Scan `source` for static and dynamic imports, in source order
pub fn scan_imports(source: &str) -> Result<Vec<ImportRecord>, LexError> {
    let mut scanner = Scanner::new(source);
    scanner.run()?;
    Ok(scanner.imports)
}

/// Dependencies of a `System.register([...], ...)` module.
///
/// Returns `None` when the source does not start with a register call.
pub fn scan_system_register(source: &str) -> Option<Vec<String>> {
    let mut scanner = Scanner::new(source);
    scanner.skip_trivia().ok()?;
    scanner.expect_word("System")?;
    scanner.expect_byte(b'.')?;
    scanner.expect_word("register")?;
    scanner.expect_byte(b'(')?;

    // Named registration: System.register('name', [...])
    scanner.skip_trivia().ok()?;
    if matches!(scanner.peek(), Some(b'\'' | b'"')) {
        scanner.read_string().ok()?;
        scanner.expect_byte(b',')?;
    }
    scanner.expect_byte(b'[')?;

    let mut deps = Vec::new();
    loop {
        scanner.skip_trivia().ok()?;
        match scanner.peek()? {
            b']' => return Some(deps),
            b',' => scanner.pos += 1,
            b'\'' | b'"' => deps.push(scanner.read_string().ok()?),
            _ => return None,
        }
    }
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            prev: Prev::Start,
            depth: 0,
            templates: Vec::new(),
            parens: Vec::new(),
            keyword_head: false,
            imports: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\n' | b'\r' => {
                    self.pos += 1;
                    continue;
                },
                b'/' if self.peek_at(1) == Some(b'/') => {
                    self.skip_line_comment();
                    continue;
                },
                b'/' if self.peek_at(1) == Some(b'*') => {
                    self.skip_block_comment()?;
                    continue;
                },
                _ => {},
            }

            let keyword_head = std::mem::take(&mut self.keyword_head);
            match c {
                b'/' => {
                    if self.prev == Prev::Value {
                        self.pos += 1;
                        self.prev = Prev::Operator;
                    } else {
                        self.skip_regex()?;
                        self.prev = Prev::Value;
                    }
                },
                b'\'' | b'"' => {
                    self.read_string()?;
                    self.prev = Prev::Value;
                },
                b'`' => {
                    self.pos += 1;
                    self.skip_template()?;
                },
                b'{' => {
                    self.depth += 1;
                    self.pos += 1;
                    self.prev = Prev::Operator;
                },
                b'}' => {
                    self.pos += 1;
                    if self.depth > 0 && self.templates.last() == Some(&(self.depth - 1)) {
                        self.templates.pop();
                        self.depth -= 1;
                        self.skip_template()?;
                    } else {
                        self.depth = self.depth.saturating_sub(1);
                        // Usually a block end, after which an expression may start
                        self.prev = Prev::Operator;
                    }
                },
                b'(' => {
                    self.parens.push(keyword_head);
                    self.pos += 1;
                    self.prev = Prev::Operator;
                },
                b')' => {
                    self.pos += 1;
                    self.prev = if self.parens.pop().unwrap_or(false) {
                        Prev::Operator
                    } else {
                        Prev::Value
                    };
                },
                b']' => {
                    self.pos += 1;
                    self.prev = Prev::Value;
                },
                b'.' if !self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) => {
                    self.pos += 1;
                    self.prev = Prev::Dot;
                },
                c if c.is_ascii_digit() || c == b'.' => {
                    self.skip_number();
                    self.prev = Prev::Value;
                },
                c if is_ident_start(c) => self.identifier(keyword_head)?,
                _ => {
                    self.pos += 1;
                    self.prev = Prev::Operator;
                },
            }
        }

        if !self.templates.is_empty() {
            return Err(self.error(self.src.len(), "unterminated template literal"));
        }
        Ok(())
    }

    fn identifier(&mut self, keyword_head: bool) -> Result<(), LexError> {
        let offset = self.pos;
        let word = self.read_word();
        let after_dot = self.prev == Prev::Dot;
        // `for await (...)` keeps the head open
        let head = !after_dot && (PAREN_KEYWORDS.contains(&word) || (keyword_head && word == "await"));

        match word {
            "import" if !after_dot => self.import_statement(offset)?,
            "export" if !after_dot => self.export_statement(offset)?,
            _ if !after_dot && EXPRESSION_KEYWORDS.contains(&word) => self.prev = Prev::Operator,
            _ => self.prev = Prev::Value,
        }
        self.keyword_head = head;
        Ok(())
    }

    fn import_statement(&mut self, offset: usize) -> Result<(), LexError> {
        self.skip_trivia()?;

        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                self.parens.push(false);
                let argument = self.pos;
                self.skip_trivia()?;
                let specifier = if matches!(self.peek(), Some(b'\'' | b'"')) {
                    let value = self.read_string()?;
                    self.skip_trivia()?;
                    matches!(self.peek(), Some(b')' | b',')).then_some(value)
                } else {
                    None
                };
                // The argument is scanned again as ordinary code
                self.pos = argument;
                self.prev = Prev::Operator;
                self.push(specifier, true, offset);
            },
            // import.meta
            Some(b'.') => self.prev = Prev::Value,
            Some(b'\'' | b'"') => {
                let specifier = self.read_string()?;
                self.push(Some(specifier), false, offset);
                self.prev = Prev::Value;
            },
            _ => {
                if let Some(specifier) = self.from_clause()? {
                    self.push(Some(specifier), false, offset);
                }
                self.prev = Prev::Value;
            },
        }
        Ok(())
    }

    fn export_statement(&mut self, offset: usize) -> Result<(), LexError> {
        self.skip_trivia()?;

        if matches!(self.peek(), Some(b'{' | b'*')) {
            if let Some(specifier) = self.from_clause()? {
                self.push(Some(specifier), false, offset);
            }
            self.prev = Prev::Value;
        } else {
            // export default /re/, export const ...
            self.prev = Prev::Operator;
        }
        Ok(())
    }

    /// Consume bindings up to `from '<specifier>'`.
    ///
    /// Stops without a specifier at the first token that cannot be part of an
    /// import or export clause.
    fn from_clause(&mut self) -> Result<Option<String>, LexError> {
        let mut in_braces = false;
        loop {
            self.skip_trivia()?;
            match self.peek() {
                Some(b'{') => {
                    in_braces = true;
                    self.pos += 1;
                },
                Some(b'}') => {
                    in_braces = false;
                    self.pos += 1;
                },
                Some(b',' | b'*') => self.pos += 1,
                // Arbitrary module namespace names: { "a-b" as c }
                Some(b'\'' | b'"') if in_braces => {
                    self.read_string()?;
                },
                Some(c) if is_ident_start(c) => {
                    let word = self.read_word();
                    if word == "from" && !in_braces {
                        self.skip_trivia()?;
                        if matches!(self.peek(), Some(b'\'' | b'"')) {
                            return self.read_string().map(Some);
                        }
                    }
                },
                _ => return Ok(None),
            }
        }
    }

    fn push(&mut self, specifier: Option<String>, dynamic: bool, offset: usize) {
        self.imports.push(ImportRecord {
            specifier,
            dynamic,
            offset,
        });
    }

    fn read_word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    fn expect_word(&mut self, word: &str) -> Option<()> {
        self.skip_trivia().ok()?;
        (self.read_word() == word).then_some(())
    }

    fn expect_byte(&mut self, byte: u8) -> Option<()> {
        self.skip_trivia().ok()?;
        if self.peek() == Some(byte) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn skip_number(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                Some(b'/') if self.peek_at(1) == Some(b'*') => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        match self.src[self.pos..].find('\n') {
            Some(end) => self.pos += end,
            None => self.pos = self.src.len(),
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        match self.src[self.pos + 2..].find("*/") {
            Some(end) => {
                self.pos += 2 + end + 2;
                Ok(())
            },
            None => Err(self.error(self.pos, "unterminated comment")),
        }
    }

    /// Read a quoted string starting at the quote and return its value
    fn read_string(&mut self) -> Result<String, LexError> {
        let start = self.pos;
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let mut value = String::new();
        let mut chunk = self.pos;

        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.error(start, "unterminated string literal")),
                Some(c) if c == quote => {
                    value.push_str(&self.src[chunk..self.pos]);
                    self.pos += 1;
                    return Ok(value);
                },
                Some(b'\\') => {
                    value.push_str(&self.src[chunk..self.pos]);
                    self.pos += 1;
                    self.read_escape(&mut value, start)?;
                    chunk = self.pos;
                },
                Some(_) => self.pos += 1,
            }
        }
    }

    fn read_escape(&mut self, value: &mut String, string_start: usize) -> Result<(), LexError> {
        let Some(escaped) = self.next_char() else {
            return Err(self.error(string_start, "unterminated string literal"));
        };
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            // Line continuation
            '\n' => {},
            '\r' => {
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            },
            'u' => {
                let (hex, len) = if self.peek() == Some(b'{') {
                    let end = self.src[self.pos..].find('}').unwrap_or(1);
                    (self.src.get(self.pos + 1..self.pos + end).unwrap_or(""), end + 1)
                } else {
                    (self.src.get(self.pos..self.pos + 4).unwrap_or(""), 4)
                };
                match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => {
                        value.push(c);
                        self.pos += len;
                    },
                    None => value.push('u'),
                }
            },
            'x' => {
                let hex = self.src.get(self.pos..self.pos + 2).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        value.push(char::from(byte));
                        self.pos += 2;
                    },
                    Err(_) => value.push('x'),
                }
            },
            other => value.push(other),
        }
        Ok(())
    }

    /// Skip template text up to the closing backtick or the next `${`
    fn skip_template(&mut self) -> Result<(), LexError> {
        let start = self.pos.saturating_sub(1);
        loop {
            match self.peek() {
                None => return Err(self.error(start, "unterminated template literal")),
                Some(b'`') => {
                    self.pos += 1;
                    self.prev = Prev::Value;
                    return Ok(());
                },
                Some(b'\\') => {
                    self.pos += 1;
                    self.next_char();
                },
                Some(b'$') if self.peek_at(1) == Some(b'{') => {
                    self.pos += 2;
                    self.templates.push(self.depth);
                    self.depth += 1;
                    self.prev = Prev::Operator;
                    return Ok(());
                },
                Some(_) => self.pos += 1,
            }
        }
    }

    fn skip_regex(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.error(start, "unterminated regular expression")),
                Some(b'\\') => {
                    self.pos += 1;
                    self.next_char();
                },
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                },
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                },
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    // Flags
                    self.read_word();
                    return Ok(());
                },
                Some(_) => self.pos += 1,
            }
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.src.get(self.pos..)?.chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, offset: usize, message: &'static str) -> LexError {
        let before = self.src.get(..offset).unwrap_or(self.src);
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        LexError { line, column, message }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_specifiers(source: &str) -> Vec<String> {
        scan_imports(source)
            .unwrap()
            .into_iter()
            .filter(|record| !record.dynamic)
            .filter_map(|record| record.specifier)
            .collect()
    }

    #[test]
    fn test_static_forms() {
        let source = r#"
            import a from 'a';
            import { b, c as d } from "b";
            import * as e from './e.js';
            import './side.js';
            import f, { g } from 'fg';
            export { h } from 'h';
            export * from 'star';
            export * as ns from 'ns';
            export const local = 1;
            export { local as other };
        "#;
        assert_eq!(
            static_specifiers(source),
            vec!["a", "b", "./e.js", "./side.js", "fg", "h", "star", "ns"]
        );
    }

    #[test]
    fn test_from_as_binding_name() {
        assert_eq!(static_specifiers("import { from } from 'x';"), vec!["x"]);
        assert_eq!(static_specifiers("import from from 'y';"), vec!["y"]);
        assert_eq!(static_specifiers("import { 'a-b' as ab } from 'z';"), vec!["z"]);
    }

    #[test]
    fn test_dynamic_imports() {
        let records = scan_imports("import('./lazy.js'); import(name); import('./x' + y); import(\"./opts.js\", { with: {} });").unwrap();
        let specifiers: Vec<_> = records.iter().map(|r| (r.specifier.as_deref(), r.dynamic)).collect();
        assert_eq!(
            specifiers,
            vec![
                (Some("./lazy.js"), true),
                (None, true),
                (None, true),
                (Some("./opts.js"), true),
            ]
        );
    }

    #[test]
    fn test_skips_comments_strings_and_templates() {
        let source = "// import 'no1'\n/* import 'no2' */\nconst s = \"import 'no3'\";\nconst t = `import '${x}' ${ {a: 1}.a } import 'no4'`;\nimport 'yes';";
        assert_eq!(static_specifiers(source), vec!["yes"]);
    }

    #[test]
    fn test_regex_and_division() {
        let source = "const r = /import 'no'/g; const d = a / b / c; const q = (x) / 2; const k = /[/]import/.test(s); import 'yes';";
        assert_eq!(static_specifiers(source), vec!["yes"]);
    }

    #[test]
    fn test_regex_after_statement_head() {
        assert_eq!(static_specifiers("if (ok) /'/.test(s);\nimport 'y';\n"), vec!["y"]);

        let source = "while (next()) /\"/g.exec(s);\nfor (const c of cs) /`/.test(c);\nfor await (const x of xs) /'/.test(x);\nimport 'loops';";
        assert_eq!(static_specifiers(source), vec!["loops"]);
    }

    #[test]
    fn test_division_after_call_paren() {
        // Only keyword heads open a regex; plain calls and groups still divide
        let source = "const a = f(x) / 2;\nconst b = obj.if(x) / 3;\nimport 'after';";
        assert_eq!(static_specifiers(source), vec!["after"]);
        let dynamic = "const m = import('./m.js') / 1;\nimport 'z';";
        assert_eq!(static_specifiers(dynamic), vec!["z"]);
    }

    #[test]
    fn test_import_as_property_and_meta() {
        let source = "obj.import('x'); const o = { import: 1 }; console.log(import.meta.url);";
        assert!(scan_imports(source).unwrap().is_empty());
    }

    #[test]
    fn test_escaped_specifier() {
        assert_eq!(static_specifiers(r"import 'a\x62';"), vec!["ab"]);
    }

    #[test]
    fn test_unterminated_string_position() {
        let err = scan_imports("import a from 'a';\nconst s = 'oops").unwrap_err();
        assert_eq!((err.line, err.column), (2, 11));
        assert_eq!(err.message, "unterminated string literal");
    }

    #[test]
    fn test_unterminated_comment_and_template() {
        assert_eq!(scan_imports("/* open").unwrap_err().message, "unterminated comment");
        assert_eq!(scan_imports("const t = `abc ${x").unwrap_err().message, "unterminated template literal");
    }

    #[test]
    fn test_system_register() {
        let source = "/* header */ System.register(['./a.js', \"b\"], function (_export, _context) {});";
        assert_eq!(
            scan_system_register(source),
            Some(vec!["./a.js".to_string(), "b".to_string()])
        );
        assert_eq!(
            scan_system_register("System.register('named', [], function () {});"),
            Some(vec![])
        );
        assert_eq!(scan_system_register("import 'a';"), None);
    }
}
