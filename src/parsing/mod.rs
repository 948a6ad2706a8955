//! Polyglot source parsing.
//!
//! Uses tree-sitter for incremental, error-tolerant parsing. Language
//! detection is a closed extension map; extraction is table-driven by
//! [`languages::LanguageSpec`]. Parsing is best-effort: syntax errors become
//! diagnostics, never failures, and a missing grammar skips the file instead
//! of breaking the pipeline.

pub mod languages;

use crate::types::{CallType, UnitType, MAX_CONTENT_BYTES};
use languages::{DocStyle, LanguageSpec};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Language, Node, Parser};

/// Default ceiling for parseable files.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Non-fatal parse outcome annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// File could not be read.
    IoError(String),
    /// File skipped (binary, oversized, or no grammar installed).
    Skipped(String),
    /// Grammar recovered from a syntax error at this line.
    Syntax { line: usize },
    /// A unit exceeded the content ceiling and was dropped.
    OversizeUnit { name: String },
}

/// A function/class-scale element extracted from one file.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    pub unit_type: UnitType,
    pub name: String,
    pub qualified_name: String,
    pub signature: String,
    pub content: String,
    pub doc: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub is_exported: bool,
    pub is_async: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
}

/// An import declaration.
#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub module: String,
    pub line: usize,
}

/// A call site inside some function body.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub caller_qualified_name: String,
    pub line: usize,
    pub callee_name: String,
    pub call_type: CallType,
}

/// Result of parsing a single file. Never an error.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub language: Option<String>,
    pub units: Vec<ParsedUnit>,
    pub imports: Vec<ParsedImport>,
    pub calls: Vec<ParsedCall>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    fn skipped(language: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            language,
            diagnostics: vec![Diagnostic::Skipped(reason.into())],
            ..Default::default()
        }
    }
}

/// Registry of loadable grammars, built once at startup.
///
/// A grammar that fails its load probe is logged and treated as absent; the
/// registry stays functional for the remaining languages.
pub struct ParserRegistry {
    by_extension: HashMap<&'static str, &'static LanguageSpec>,
    loaded: HashMap<&'static str, Language>,
    pub max_file_bytes: u64,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::with_max_file_bytes(DEFAULT_MAX_FILE_BYTES)
    }

    pub fn with_max_file_bytes(max_file_bytes: u64) -> Self {
        let mut by_extension = HashMap::new();
        let mut loaded = HashMap::new();

        for spec in languages::ALL {
            for ext in spec.extensions {
                by_extension.insert(*ext, *spec);
            }
            if let Some(grammar) = spec.grammar {
                let language = grammar();
                let mut probe = Parser::new();
                match probe.set_language(&language) {
                    Ok(()) => {
                        loaded.insert(spec.name, language);
                    }
                    Err(e) => {
                        tracing::warn!(language = spec.name, "grammar failed to load: {e}");
                    }
                }
            }
        }

        Self {
            by_extension,
            loaded,
            max_file_bytes,
        }
    }

    /// Closed-map language detection. Unknown extensions yield None.
    pub fn detect(&self, path: &Path) -> Option<&'static LanguageSpec> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(ext.as_str()).copied()
    }

    /// Languages with a working grammar.
    pub fn available_languages(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.loaded.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Whether a path would produce units at all.
    pub fn handles(&self, path: &Path) -> bool {
        self.detect(path)
            .map(|spec| self.loaded.contains_key(spec.name))
            .unwrap_or(false)
    }

    /// Read and parse a file from disk.
    pub fn parse_file(&self, path: &Path) -> ParseResult {
        let Some(spec) = self.detect(path) else {
            return ParseResult::default();
        };
        let language = Some(spec.name.to_string());

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                return ParseResult {
                    language,
                    diagnostics: vec![Diagnostic::IoError(e.to_string())],
                    ..Default::default()
                };
            }
        };
        if meta.len() > self.max_file_bytes {
            return ParseResult::skipped(language, format!("file exceeds {} bytes", self.max_file_bytes));
        }

        match std::fs::read(path) {
            Ok(bytes) => self.parse(path, &bytes),
            Err(e) => ParseResult {
                language,
                diagnostics: vec![Diagnostic::IoError(e.to_string())],
                ..Default::default()
            },
        }
    }

    /// Parse already-read source bytes.
    pub fn parse(&self, path: &Path, source_bytes: &[u8]) -> ParseResult {
        let Some(spec) = self.detect(path) else {
            return ParseResult::default();
        };
        let language = Some(spec.name.to_string());

        let Some(ts_language) = self.loaded.get(spec.name) else {
            return ParseResult::skipped(language, format!("no grammar installed for {}", spec.name));
        };

        if source_bytes.len() as u64 > self.max_file_bytes {
            return ParseResult::skipped(language, format!("file exceeds {} bytes", self.max_file_bytes));
        }
        if looks_binary(source_bytes) {
            return ParseResult::skipped(language, "binary file");
        }

        let source = String::from_utf8_lossy(source_bytes);

        let mut parser = Parser::new();
        if parser.set_language(ts_language).is_err() {
            return ParseResult::skipped(language, format!("grammar unavailable for {}", spec.name));
        }
        let Some(tree) = parser.parse(source.as_ref(), None) else {
            return ParseResult::skipped(language, "parser produced no tree");
        };

        let mut walker = Walker {
            spec,
            source: source.as_ref(),
            result: ParseResult {
                language,
                ..Default::default()
            },
            scope: Vec::new(),
            fn_scope: Vec::new(),
        };

        let root = tree.root_node();
        if root.has_error() {
            if let Some(line) = first_error_line(root) {
                walker.result.diagnostics.push(Diagnostic::Syntax { line });
            }
        }
        walker.walk(root);
        walker.result
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tree walking
// ============================================================================

struct Walker<'a> {
    spec: &'static LanguageSpec,
    source: &'a str,
    result: ParseResult,
    /// Enclosing named scopes (classes, modules, impls).
    scope: Vec<String>,
    /// Enclosing function qualified names, for call-site attribution.
    fn_scope: Vec<String>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self, node: Node<'a>) {
        let kind = node.kind();

        if self.spec.import_kinds.contains(&kind) {
            if let Some(module) = extract_import(self.text(node), self.spec.name) {
                self.result.imports.push(ParsedImport {
                    module,
                    line: node.start_position().row + 1,
                });
            }
        }

        if let Some(&(_, unit_type)) = self.spec.type_kinds.iter().find(|(k, _)| *k == kind) {
            self.emit_unit(node, unit_type);
            return;
        }

        if self.spec.function_kinds.contains(&kind) {
            let unit_type = if self.inside_method_container(node) {
                UnitType::Method
            } else {
                UnitType::Function
            };
            self.emit_unit(node, unit_type);
            return;
        }

        if self.spec.call_kinds.contains(&kind) || self.spec.constructor_kinds.contains(&kind) {
            self.emit_call(node);
            // Arguments may contain further calls and lambdas.
        }

        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        for child in children {
            self.walk(child);
        }
    }

    fn emit_unit(&mut self, node: Node<'a>, unit_type: UnitType) {
        let Some(name) = self.unit_name(node) else {
            // Anonymous (e.g. a bare lambda): still descend for call sites.
            self.descend_into(node);
            return;
        };

        let qualified_name = self.qualify(&name);
        let content = self.text(node).to_string();
        if content.len() > MAX_CONTENT_BYTES {
            self.result
                .diagnostics
                .push(Diagnostic::OversizeUnit { name: name.clone() });
            self.descend_scoped(node, &name, &qualified_name, unit_type);
            return;
        }

        let signature = self.signature_of(node, &content);
        let doc = self.doc_of(node);
        let parameters = self.parameters_of(node);
        let return_type = node
            .child_by_field_name("return_type")
            .map(|n| self.text(n).trim().to_string());
        let is_async = signature.contains("async ") || signature.starts_with("async");

        self.result.units.push(ParsedUnit {
            unit_type,
            name: name.clone(),
            qualified_name: qualified_name.clone(),
            is_exported: self.is_exported(&name, &signature),
            is_async,
            parameters,
            return_type,
            signature,
            content,
            doc,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
        });

        self.descend_scoped(node, &name, &qualified_name, unit_type);
    }

    /// Recurse into a unit body with updated scope stacks.
    fn descend_scoped(
        &mut self,
        node: Node<'a>,
        name: &str,
        qualified_name: &str,
        unit_type: UnitType,
    ) {
        let is_callable = matches!(unit_type, UnitType::Function | UnitType::Method);
        self.scope.push(name.to_string());
        if is_callable {
            self.fn_scope.push(qualified_name.to_string());
        }
        self.descend_into(node);
        if is_callable {
            self.fn_scope.pop();
        }
        self.scope.pop();
    }

    fn descend_into(&mut self, node: Node<'a>) {
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        for child in children {
            self.walk(child);
        }
    }

    fn emit_call(&mut self, node: Node<'a>) {
        // Call sites outside any function body are not attributable.
        let Some(caller) = self.fn_scope.last() else {
            return;
        };

        let callee_node = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("name"))
            .or_else(|| node.child_by_field_name("constructor"))
            .or_else(|| node.named_child(0));
        let Some(callee_node) = callee_node else {
            return;
        };

        let callee_text = self.text(callee_node);
        let Some(callee_name) = last_identifier(callee_text) else {
            return;
        };

        let call_type = if self.spec.constructor_kinds.contains(&node.kind()) {
            CallType::Constructor
        } else if node
            .parent()
            .map(|p| p.kind() == "await_expression" || p.kind() == "await")
            .unwrap_or(false)
        {
            CallType::Async
        } else if is_member_access(callee_node.kind()) {
            CallType::Method
        } else {
            CallType::Direct
        };

        self.result.calls.push(ParsedCall {
            caller_qualified_name: caller.clone(),
            line: node.start_position().row + 1,
            callee_name,
            call_type,
        });
    }

    fn unit_name(&self, node: Node<'a>) -> Option<String> {
        if let Some(name_node) = node.child_by_field_name("name") {
            let text = self.text(name_node).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        // Arrow functions and similar pick up the variable they bind to.
        let mut current = node;
        while let Some(parent) = current.parent() {
            match parent.kind() {
                "variable_declarator" | "assignment_expression" | "pair" | "let_declaration" => {
                    let named = parent
                        .child_by_field_name("name")
                        .or_else(|| parent.child_by_field_name("left"))
                        .or_else(|| parent.child_by_field_name("key"));
                    if let Some(n) = named {
                        return last_identifier(self.text(n));
                    }
                    return None;
                }
                "parenthesized_expression" => current = parent,
                _ => return None,
            }
        }
        None
    }

    fn qualify(&self, name: &str) -> String {
        if self.scope.is_empty() {
            name.to_string()
        } else {
            format!(
                "{}{}{}",
                self.scope.join(self.spec.scope_separator),
                self.spec.scope_separator,
                name
            )
        }
    }

    fn inside_method_container(&self, node: Node<'a>) -> bool {
        let mut current = node;
        while let Some(parent) = current.parent() {
            if self.spec.method_containers.contains(&parent.kind()) {
                return true;
            }
            // Stop at the nearest enclosing function: a nested fn is local.
            if self.spec.function_kinds.contains(&parent.kind()) {
                return false;
            }
            current = parent;
        }
        false
    }

    /// Header text: node start up to its body, collapsed to one line.
    fn signature_of(&self, node: Node<'a>, content: &str) -> String {
        let header = match node.child_by_field_name("body") {
            Some(body) if body.start_byte() > node.start_byte() => {
                &self.source[node.start_byte()..body.start_byte()]
            }
            _ => content.lines().next().unwrap_or(""),
        };
        header.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn parameters_of(&self, node: Node<'a>) -> Vec<String> {
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let text = self.text(params);
        let inner = text
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim();
        if inner.is_empty() {
            return Vec::new();
        }
        split_top_level(inner)
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn is_exported(&self, name: &str, signature: &str) -> bool {
        match self.spec.name {
            "python" | "ruby" => !name.starts_with('_'),
            "rust" => signature.starts_with("pub"),
            "go" => name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false),
            "java" | "c_sharp" | "php" => signature.contains("public"),
            "javascript" | "typescript" | "tsx" => signature.contains("export"),
            _ => true,
        }
    }

    fn doc_of(&self, node: Node<'a>) -> Option<String> {
        match self.spec.doc_style {
            DocStyle::Docstring => self.docstring_of(node),
            DocStyle::Preceding => self.preceding_comments_of(node),
        }
    }

    /// First string expression statement inside the body.
    fn docstring_of(&self, node: Node<'a>) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let raw = self.text(string);
        let cleaned = raw
            .trim_start_matches("r\"\"\"")
            .trim_start_matches("\"\"\"")
            .trim_start_matches("'''")
            .trim_end_matches("\"\"\"")
            .trim_end_matches("'''")
            .trim();
        (!cleaned.is_empty()).then(|| cleaned.to_string())
    }

    /// Contiguous comment siblings immediately above the definition.
    fn preceding_comments_of(&self, node: Node<'a>) -> Option<String> {
        let mut lines = Vec::new();
        let mut current = node;
        while let Some(prev) = current.prev_sibling() {
            if !prev.kind().contains("comment") {
                break;
            }
            // Only adjacent comments count as documentation.
            if node.start_position().row > prev.end_position().row + lines.len() + 1 {
                break;
            }
            lines.push(clean_comment(self.text(prev)));
            current = prev;
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        let joined = lines.join("\n");
        let trimmed = joined.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn text(&self, node: Node<'a>) -> &'a str {
        &self.source[node.start_byte()..node.end_byte()]
    }
}

// ============================================================================
// Text helpers
// ============================================================================

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(1024).any(|&b| b == 0)
}

fn first_error_line(root: Node<'_>) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                stack.push(child);
            }
        }
    }
    None
}

/// Rightmost identifier in an expression like `self.store.upsert`.
fn last_identifier(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()))
        .next_back()
        .map(|s| s.to_string())
}

fn is_member_access(kind: &str) -> bool {
    matches!(
        kind,
        "attribute"
            | "member_expression"
            | "field_expression"
            | "scoped_identifier"
            | "navigation_expression"
            | "member_access_expression"
    )
}

/// Split a parameter list on commas that are not nested in brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn clean_comment(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("///")
                .trim_start_matches("//!")
                .trim_start_matches("//")
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches('*')
                .trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the imported module out of one declaration's text.
fn extract_import(text: &str, language: &str) -> Option<String> {
    let text = text.trim();

    // Quoted module path wins when present (js/ts/go/c includes).
    if let Some(start) = text.find(['"', '\'']) {
        let quote = text.as_bytes()[start] as char;
        let rest = &text[start + 1..];
        if let Some(end) = rest.find(quote) {
            let module = &rest[..end];
            if !module.is_empty() {
                return Some(module.to_string());
            }
        }
    }
    if language == "c" || language == "cpp" {
        // #include <header.h>
        let start = text.find('<')?;
        let end = text.find('>')?;
        return (start + 1 < end).then(|| text[start + 1..end].to_string());
    }

    let stripped = text
        .trim_start_matches("from")
        .trim_start_matches("import")
        .trim_start_matches("use")
        .trim_start_matches("using")
        .trim();
    let module = stripped
        .split_whitespace()
        .next()?
        .trim_end_matches(';')
        .trim_end_matches(',');
    (!module.is_empty() && module != "import").then(|| module.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry() -> ParserRegistry {
        ParserRegistry::new()
    }

    #[test]
    fn detects_known_extensions_only() {
        let r = registry();
        assert!(r.detect(&PathBuf::from("a.py")).is_some());
        assert!(r.detect(&PathBuf::from("a.rs")).is_some());
        assert!(r.detect(&PathBuf::from("a.xyz")).is_none());
        assert!(r.detect(&PathBuf::from("noext")).is_none());
    }

    #[test]
    fn unknown_extension_is_empty_not_error() {
        let r = registry();
        let result = r.parse(&PathBuf::from("a.xyz"), b"whatever");
        assert!(result.units.is_empty());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn grammarless_language_is_skipped_gracefully() {
        let r = registry();
        let result = r.parse(&PathBuf::from("schema.sql"), b"SELECT 1;");
        assert!(result.units.is_empty());
        assert!(matches!(result.diagnostics.first(), Some(Diagnostic::Skipped(_))));
    }

    #[test]
    fn python_functions_and_docstrings() {
        let r = registry();
        let source = br#"def foo(a, b):
    """Adds things."""
    return a + b

class Greeter:
    def greet(self):
        return "hi"
"#;
        let result = r.parse(&PathBuf::from("a.py"), source);
        assert_eq!(result.language.as_deref(), Some("python"));

        let foo = result.units.iter().find(|u| u.name == "foo").unwrap();
        assert_eq!(foo.unit_type, UnitType::Function);
        assert_eq!(foo.doc.as_deref(), Some("Adds things."));
        assert_eq!(foo.parameters, vec!["a", "b"]);
        assert!(foo.start_line <= foo.end_line);

        let greet = result.units.iter().find(|u| u.name == "greet").unwrap();
        assert_eq!(greet.unit_type, UnitType::Method);
        assert_eq!(greet.qualified_name, "Greeter.greet");

        let class = result.units.iter().find(|u| u.name == "Greeter").unwrap();
        assert_eq!(class.unit_type, UnitType::Class);
    }

    #[test]
    fn python_call_extraction() {
        let r = registry();
        let source = b"def a():\n    b()\n\ndef b():\n    c()\n\ndef c():\n    pass\n";
        let result = r.parse(&PathBuf::from("calls.py"), source);

        let callees: Vec<_> = result
            .calls
            .iter()
            .map(|c| (c.caller_qualified_name.as_str(), c.callee_name.as_str()))
            .collect();
        assert!(callees.contains(&("a", "b")));
        assert!(callees.contains(&("b", "c")));
    }

    #[test]
    fn python_imports() {
        let r = registry();
        let source = b"import os\nfrom pathlib import Path\n\ndef f():\n    pass\n";
        let result = r.parse(&PathBuf::from("i.py"), source);
        let modules: Vec<_> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert!(modules.contains(&"os"));
        assert!(modules.contains(&"pathlib"));
    }

    #[test]
    fn rust_units() {
        let r = registry();
        let source = br#"
/// Doubles a number.
pub fn double(x: i32) -> i32 {
    x * 2
}

struct Point {
    x: i32,
}

impl Point {
    fn norm(&self) -> i32 {
        self.x.abs()
    }
}
"#;
        let result = r.parse(&PathBuf::from("lib.rs"), source);
        let double = result.units.iter().find(|u| u.name == "double").unwrap();
        assert!(double.is_exported);
        assert_eq!(double.doc.as_deref(), Some("Doubles a number."));
        assert_eq!(double.return_type.as_deref(), Some("i32"));

        let norm = result.units.iter().find(|u| u.name == "norm").unwrap();
        assert_eq!(norm.unit_type, UnitType::Method);
    }

    #[test]
    fn syntax_error_is_diagnostic_not_failure() {
        let r = registry();
        let source = b"def good():\n    return 1\n\ndef broken(:\n";
        let result = r.parse(&PathBuf::from("bad.py"), source);
        assert!(result.units.iter().any(|u| u.name == "good"));
        assert!(result
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Syntax { .. })));
    }

    #[test]
    fn binary_content_is_skipped() {
        let r = registry();
        let result = r.parse(&PathBuf::from("a.py"), b"\x00\x01\x02def f(): pass");
        assert!(result.units.is_empty());
        assert!(matches!(result.diagnostics.first(), Some(Diagnostic::Skipped(_))));
    }

    #[test]
    fn typescript_class_and_interface() {
        let r = registry();
        let source = br#"
export interface Shape {
    area(): number;
}

export class Circle {
    radius: number;
    area(): number {
        return Math.PI * this.radius * this.radius;
    }
}
"#;
        let result = r.parse(&PathBuf::from("shapes.ts"), source);
        assert!(result
            .units
            .iter()
            .any(|u| u.name == "Shape" && u.unit_type == UnitType::Interface));
        assert!(result
            .units
            .iter()
            .any(|u| u.name == "Circle" && u.unit_type == UnitType::Class));
        assert!(result
            .units
            .iter()
            .any(|u| u.name == "area" && u.unit_type == UnitType::Method));
    }

    #[test]
    fn last_identifier_extracts_rightmost() {
        assert_eq!(last_identifier("self.store.upsert"), Some("upsert".into()));
        assert_eq!(last_identifier("foo"), Some("foo".into()));
        assert_eq!(last_identifier("a::b::c"), Some("c".into()));
        assert_eq!(last_identifier("123"), None);
    }

    #[test]
    fn split_params_respects_nesting() {
        let parts = split_top_level("a: Map<K, V>, b: int");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].trim(), "a: Map<K, V>");
    }
}
