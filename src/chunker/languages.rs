//! Per-language extraction policy.
//!
//! Each supported language maps tree-sitter node kinds to definition kinds
//! and provides rules for signature, docstring, visibility, and decorator
//! extraction. Dart deliberately has no grammar binding and is indexed as
//! module chunks and files only.

use tree_sitter::Node;

/// Supported source languages. `from_extension` routes everything else to
/// the module-chunk fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Rust,
    Java,
    Kotlin,
    CSharp,
    Swift,
    Php,
    /// Grammar binding unavailable; module chunks and file rows only.
    Dart,
    Markdown,
}

impl Lang {
    pub fn from_extension(ext: &str) -> Option<Lang> {
        match ext {
            "py" => Some(Lang::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
            "ts" | "mts" | "cts" => Some(Lang::TypeScript),
            "tsx" => Some(Lang::Tsx),
            "go" => Some(Lang::Go),
            "rs" => Some(Lang::Rust),
            "java" => Some(Lang::Java),
            "kt" | "kts" => Some(Lang::Kotlin),
            "cs" => Some(Lang::CSharp),
            "swift" => Some(Lang::Swift),
            "php" => Some(Lang::Php),
            "dart" => Some(Lang::Dart),
            "md" | "markdown" => Some(Lang::Markdown),
            _ => None,
        }
    }

    /// Hint string stored on rows and used for ranking display.
    pub fn hint(&self) -> &'static str {
        match self {
            Lang::Python => "python",
            Lang::JavaScript => "javascript",
            Lang::TypeScript => "typescript",
            Lang::Tsx => "tsx",
            Lang::Go => "go",
            Lang::Rust => "rust",
            Lang::Java => "java",
            Lang::Kotlin => "kotlin",
            Lang::CSharp => "csharp",
            Lang::Swift => "swift",
            Lang::Php => "php",
            Lang::Dart => "dart",
            Lang::Markdown => "markdown",
        }
    }

    /// The compiled grammar, when one is linked for this language.
    pub fn grammar(&self) -> Option<tree_sitter::Language> {
        match self {
            Lang::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Lang::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Lang::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Lang::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Lang::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Lang::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Lang::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Lang::Kotlin => Some(tree_sitter_kotlin::LANGUAGE.into()),
            Lang::CSharp => Some(tree_sitter_c_sharp::LANGUAGE.into()),
            Lang::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            Lang::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Lang::Dart | Lang::Markdown => None,
        }
    }
}

/// What a definition node resolves to before method promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Func,
    Class,
}

/// Classify a node as a definition under this language's policy.
///
/// JS/TS arrow functions and function expressions are classified at the
/// `variable_declarator` whose value is the function node, so they pick up
/// the binding name.
pub fn classify(lang: Lang, node: Node) -> Option<DefKind> {
    let kind = node.kind();
    match lang {
        Lang::Python => match kind {
            "function_definition" => Some(DefKind::Func),
            "class_definition" => Some(DefKind::Class),
            _ => None,
        },
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => match kind {
            "function_declaration" | "generator_function_declaration" | "method_definition" => {
                Some(DefKind::Func)
            }
            "class_declaration" => Some(DefKind::Class),
            "variable_declarator" => {
                let value = node.child_by_field_name("value")?;
                matches!(
                    value.kind(),
                    "arrow_function" | "function_expression" | "function"
                )
                .then_some(DefKind::Func)
            }
            _ => None,
        },
        Lang::Go => match kind {
            "function_declaration" | "method_declaration" => Some(DefKind::Func),
            "type_declaration" => Some(DefKind::Class),
            _ => None,
        },
        Lang::Rust => match kind {
            "function_item" => Some(DefKind::Func),
            "struct_item" | "impl_item" | "enum_item" | "trait_item" => Some(DefKind::Class),
            _ => None,
        },
        Lang::Java => match kind {
            "method_declaration" | "constructor_declaration" => Some(DefKind::Func),
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                Some(DefKind::Class)
            }
            _ => None,
        },
        Lang::Kotlin => match kind {
            "function_declaration" => Some(DefKind::Func),
            "class_declaration" | "object_declaration" => Some(DefKind::Class),
            _ => None,
        },
        Lang::CSharp => match kind {
            "method_declaration" | "constructor_declaration" | "local_function_statement" => {
                Some(DefKind::Func)
            }
            "class_declaration" | "interface_declaration" | "struct_declaration"
            | "enum_declaration" => Some(DefKind::Class),
            _ => None,
        },
        Lang::Swift => match kind {
            "function_declaration" | "init_declaration" => Some(DefKind::Func),
            "class_declaration" | "protocol_declaration" => Some(DefKind::Class),
            _ => None,
        },
        Lang::Php => match kind {
            "function_definition" | "method_declaration" => Some(DefKind::Func),
            "class_declaration" | "interface_declaration" | "trait_declaration" => {
                Some(DefKind::Class)
            }
            _ => None,
        },
        Lang::Dart | Lang::Markdown => None,
    }
}

/// The name of a definition node, per language field conventions.
pub fn name_of(lang: Lang, node: Node, src: &[u8]) -> Option<String> {
    let name_node = match (lang, node.kind()) {
        (Lang::Rust, "impl_item") => node.child_by_field_name("type"),
        (Lang::Go, "type_declaration") => {
            // type_declaration -> type_spec -> name
            let mut cursor = node.walk();
            let spec = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "type_spec");
            spec.and_then(|s| s.child_by_field_name("name"))
        }
        _ => node.child_by_field_name("name"),
    }?;
    name_node.utf8_text(src).ok().map(|s| s.to_string())
}

/// The outermost node whose span should become the chunk text: walks up
/// through wrapper nodes (decorated definitions, export statements, variable
/// declarations holding a function value).
pub fn span_node(lang: Lang, node: Node) -> Node {
    let mut current = node;
    while let Some(parent) = current.parent() {
        let wraps = match lang {
            Lang::Python => parent.kind() == "decorated_definition",
            Lang::JavaScript | Lang::TypeScript | Lang::Tsx => matches!(
                parent.kind(),
                "export_statement" | "lexical_declaration" | "variable_declaration"
            ),
            Lang::Php => false,
            _ => false,
        };
        if wraps {
            current = parent;
        } else {
            break;
        }
    }
    current
}

/// Node field that holds the body, used to cut the signature.
fn body_of(node: Node) -> Option<Node> {
    node.child_by_field_name("body")
        .or_else(|| node.child_by_field_name("block"))
}

/// One-line signature: the node's text up to its body, whitespace-collapsed.
pub fn signature_of(node: Node, content: &str) -> Option<String> {
    let start = node.start_byte();
    let end = match body_of(node) {
        Some(body) => body.start_byte(),
        None => {
            // Bodyless declarations (interfaces, trait methods): first line.
            let text = content.get(node.start_byte()..node.end_byte())?;
            let first = text.lines().next().unwrap_or(text);
            return Some(collapse_ws(first));
        }
    };
    let text = content.get(start..end)?;
    let sig = collapse_ws(text);
    (!sig.is_empty()).then_some(sig)
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ═══════════════════════════════════════════════════════════════════════
// Docstrings
// ═══════════════════════════════════════════════════════════════════════

/// Extract the documentation string for a definition node.
pub fn docstring_of(lang: Lang, node: Node, src: &[u8], content: &str) -> Option<String> {
    match lang {
        Lang::Python => python_docstring(node, src),
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx | Lang::Java | Lang::Kotlin
        | Lang::Php => preceding_block_comment(lang, node, content, "/**"),
        Lang::Go => preceding_line_comments(lang, node, content, "//"),
        Lang::Rust => preceding_line_comments(lang, node, content, "///"),
        Lang::CSharp => {
            preceding_line_comments(lang, node, content, "///").map(|d| strip_xml_tags(&d))
        }
        Lang::Swift => preceding_line_comments(lang, node, content, "///")
            .or_else(|| preceding_block_comment(lang, node, content, "/**")),
        Lang::Dart | Lang::Markdown => None,
    }
}

/// Python: first string literal in the body.
fn python_docstring(node: Node, src: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = expr.utf8_text(src).ok()?;
    Some(strip_python_quotes(raw))
}

fn strip_python_quotes(raw: &str) -> String {
    let trimmed = raw
        .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F'])
        .trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Preceding `/** */` block comment, walking through wrapper nodes.
fn preceding_block_comment(lang: Lang, node: Node, content: &str, open: &str) -> Option<String> {
    let anchor = span_node(lang, node);
    let prev = anchor.prev_named_sibling()?;
    if !prev.kind().contains("comment") {
        return None;
    }
    // Must sit immediately above (no blank-line gap beyond one newline).
    if !adjacent_above(prev.end_byte(), anchor.start_byte(), content) {
        return None;
    }
    let text = content.get(prev.start_byte()..prev.end_byte())?;
    if !text.starts_with(open) {
        return None;
    }
    Some(strip_block_comment(text))
}

/// Contiguous preceding line comments with the given prefix (`//` or `///`).
fn preceding_line_comments(
    lang: Lang,
    node: Node,
    content: &str,
    prefix: &str,
) -> Option<String> {
    let anchor = span_node(lang, node);
    let mut lines: Vec<String> = Vec::new();
    let mut cursor = anchor.prev_named_sibling();
    let mut below_start = anchor.start_byte();

    while let Some(prev) = cursor {
        if !prev.kind().contains("comment")
            || !adjacent_above(prev.end_byte(), below_start, content)
        {
            break;
        }
        let text = content.get(prev.start_byte()..prev.end_byte())?;
        let trimmed = text.trim_start();
        if !trimmed.starts_with(prefix) || (prefix == "//" && trimmed.starts_with("///")) {
            break;
        }
        lines.push(trimmed.trim_start_matches(prefix).trim().to_string());
        below_start = prev.start_byte();
        cursor = prev.prev_named_sibling();
    }

    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    Some(lines.join("\n"))
}

/// True when only whitespace with at most one newline separates the spans.
fn adjacent_above(end: usize, start: usize, content: &str) -> bool {
    match content.get(end..start) {
        Some(gap) => gap.chars().all(char::is_whitespace) && gap.matches('\n').count() <= 1,
        None => false,
    }
}

fn strip_block_comment(text: &str) -> String {
    let inner = text
        .trim_start_matches("/**")
        .trim_start_matches("/*")
        .trim_end_matches("*/");
    inner
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_xml_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    collapse_ws(&out)
}

// ═══════════════════════════════════════════════════════════════════════
// Visibility
// ═══════════════════════════════════════════════════════════════════════

/// Whether a definition is exported, per language rule.
pub fn is_exported(lang: Lang, node: Node, name: &str, src: &[u8], in_class: bool) -> bool {
    match lang {
        Lang::Python => !name.starts_with('_'),
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => has_export_ancestor(node),
        Lang::Go => name.chars().next().is_some_and(|c| c.is_uppercase()),
        Lang::Rust => {
            has_child_text_prefix(node, "visibility_modifier", "pub", src)
        }
        Lang::Java | Lang::CSharp | Lang::Swift => has_modifier(node, "public", src),
        Lang::Kotlin => {
            !has_modifier(node, "private", src)
                && !has_modifier(node, "internal", src)
                && !has_modifier(node, "protected", src)
        }
        Lang::Php => has_modifier(node, "public", src) || !in_class,
        Lang::Dart => !name.starts_with('_'),
        Lang::Markdown => false,
    }
}

fn has_export_ancestor(node: Node) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n.kind() == "export_statement" {
            return true;
        }
        // Only pass through wrappers; function bodies end the walk.
        if !matches!(
            n.kind(),
            "export_statement"
                | "lexical_declaration"
                | "variable_declaration"
                | "variable_declarator"
                | "function_declaration"
                | "generator_function_declaration"
                | "class_declaration"
                | "class_body"
                | "method_definition"
                | "arrow_function"
                | "function_expression"
        ) {
            return false;
        }
        current = n.parent();
    }
    false
}

fn has_child_text_prefix(node: Node, child_kind: &str, prefix: &str, src: &[u8]) -> bool {
    let mut cursor = node.walk();
    let result = node.children(&mut cursor).any(|c| {
        c.kind() == child_kind
            && c.utf8_text(src)
                .is_ok_and(|t| t.starts_with(prefix))
    });
    result
}

/// Scan the node's modifier region (direct `modifiers` child or leading
/// keyword children) for a modifier keyword.
fn has_modifier(node: Node, modifier: &str, src: &[u8]) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let kind = child.kind();
        if kind == "modifiers" || kind == "modifier_list" {
            if child.utf8_text(src).is_ok_and(|t| {
                t.split(|c: char| !c.is_alphanumeric())
                    .any(|w| w == modifier)
            }) {
                return true;
            }
            continue;
        }
        if kind == modifier {
            return true;
        }
        // Stop scanning once we hit the name or body.
        if kind == "identifier" || kind == "block" {
            break;
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════
// Decorators
// ═══════════════════════════════════════════════════════════════════════

/// Decorator / annotation / attribute names attached to a definition.
pub fn decorators_of(lang: Lang, node: Node, src: &[u8], content: &str) -> Vec<String> {
    match lang {
        Lang::Python => python_decorators(node, src),
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => sibling_decorators(
            lang,
            node,
            content,
            &["decorator"],
            |t| t.to_string(),
        ),
        Lang::Rust => sibling_decorators(lang, node, content, &["attribute_item"], |t| {
            t.to_string()
        }),
        Lang::Java | Lang::Kotlin => annotation_decorators(node, src),
        Lang::CSharp => sibling_or_child_decorators(node, src, "attribute_list"),
        Lang::Swift => sibling_or_child_decorators(node, src, "attribute"),
        Lang::Php => sibling_or_child_decorators(node, src, "attribute_list"),
        Lang::Go | Lang::Dart | Lang::Markdown => Vec::new(),
    }
}

/// Python decorators live on the wrapping `decorated_definition`.
fn python_decorators(node: Node, src: &[u8]) -> Vec<String> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    if parent.kind() != "decorated_definition" {
        return Vec::new();
    }
    let mut cursor = parent.walk();
    parent
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .filter_map(|c| c.utf8_text(src).ok())
        .map(|t| t.trim().to_string())
        .collect()
}

/// Decorators appearing as preceding named siblings (walking through export
/// wrappers via `span_node`).
fn sibling_decorators(
    lang: Lang,
    node: Node,
    content: &str,
    kinds: &[&str],
    render: impl Fn(&str) -> String,
) -> Vec<String> {
    let anchor = span_node(lang, node);
    let mut out = Vec::new();
    let mut cursor = anchor.prev_named_sibling();
    while let Some(prev) = cursor {
        if !kinds.contains(&prev.kind()) {
            break;
        }
        if let Some(text) = content.get(prev.start_byte()..prev.end_byte()) {
            out.push(render(text.trim()));
        }
        cursor = prev.prev_named_sibling();
    }
    out.reverse();
    out
}

/// Java/Kotlin annotations, including inside a `modifiers` group.
fn annotation_decorators(node: Node, src: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "modifiers" => {
                let mut inner = child.walk();
                for m in child.named_children(&mut inner) {
                    if m.kind().contains("annotation") {
                        if let Ok(t) = m.utf8_text(src) {
                            out.push(t.trim().to_string());
                        }
                    }
                }
            }
            k if k.contains("annotation") => {
                if let Ok(t) = child.utf8_text(src) {
                    out.push(t.trim().to_string());
                }
            }
            _ => {}
        }
    }
    out
}

/// Attributes that may appear either as preceding siblings or leading
/// children of the declaration node (C#, Swift, PHP grammars differ here).
fn sibling_or_child_decorators(node: Node, src: &[u8], kind: &str) -> Vec<String> {
    let mut out = Vec::new();

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == kind {
            if let Ok(t) = child.utf8_text(src) {
                out.push(t.trim().to_string());
            }
        }
    }

    let mut prev = node.prev_named_sibling();
    let mut leading = Vec::new();
    while let Some(p) = prev {
        if p.kind() != kind {
            break;
        }
        if let Ok(t) = p.utf8_text(src) {
            leading.push(t.trim().to_string());
        }
        prev = p.prev_named_sibling();
    }
    leading.reverse();
    leading.extend(out);
    leading
}

// ═══════════════════════════════════════════════════════════════════════
// Imports and top-level doc
// ═══════════════════════════════════════════════════════════════════════

/// Node kinds whose text is collected as an import line.
pub fn import_kinds(lang: Lang) -> &'static [&'static str] {
    match lang {
        Lang::Python => &["import_statement", "import_from_statement"],
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => &["import_statement"],
        Lang::Go => &["import_declaration"],
        Lang::Rust => &["use_declaration"],
        Lang::Java => &["import_declaration"],
        Lang::Kotlin => &["import", "import_header"],
        Lang::CSharp => &["using_directive"],
        Lang::Swift => &["import_declaration"],
        Lang::Php => &["namespace_use_declaration"],
        Lang::Dart | Lang::Markdown => &[],
    }
}

/// Module-level documentation: Python module docstring, Rust `//!` block,
/// otherwise the leading comment block of the file.
pub fn top_level_doc(lang: Lang, root: Node, src: &[u8], content: &str) -> Option<String> {
    match lang {
        Lang::Python => {
            let first = root.named_child(0)?;
            if first.kind() != "expression_statement" {
                return None;
            }
            let expr = first.named_child(0)?;
            if expr.kind() != "string" {
                return None;
            }
            Some(strip_python_quotes(expr.utf8_text(src).ok()?))
        }
        Lang::Rust => {
            let mut lines = Vec::new();
            for line in content.lines() {
                let trimmed = line.trim_start();
                if let Some(rest) = trimmed.strip_prefix("//!") {
                    lines.push(rest.trim().to_string());
                } else if trimmed.is_empty() && lines.is_empty() {
                    continue;
                } else {
                    break;
                }
            }
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        Lang::Markdown | Lang::Dart => None,
        _ => {
            let first = root.named_child(0)?;
            if !first.kind().contains("comment") || first.start_position().row > 2 {
                return None;
            }
            let text = content.get(first.start_byte()..first.end_byte())?;
            if text.starts_with("/*") {
                Some(strip_block_comment(text))
            } else {
                let doc = text
                    .lines()
                    .map(|l| l.trim_start().trim_start_matches('/').trim())
                    .collect::<Vec<_>>()
                    .join("\n");
                (!doc.is_empty()).then_some(doc)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_routing() {
        assert_eq!(Lang::from_extension("py"), Some(Lang::Python));
        assert_eq!(Lang::from_extension("tsx"), Some(Lang::Tsx));
        assert_eq!(Lang::from_extension("kt"), Some(Lang::Kotlin));
        assert_eq!(Lang::from_extension("dart"), Some(Lang::Dart));
        assert_eq!(Lang::from_extension("zig"), None);
    }

    #[test]
    fn dart_and_markdown_have_no_grammar() {
        assert!(Lang::Dart.grammar().is_none());
        assert!(Lang::Markdown.grammar().is_none());
        assert!(Lang::Python.grammar().is_some());
    }

    #[test]
    fn python_quote_stripping() {
        assert_eq!(strip_python_quotes("\"\"\"Adds.\"\"\""), "Adds.");
        assert_eq!(strip_python_quotes("'''x'''"), "x");
        assert_eq!(strip_python_quotes("\"one\""), "one");
    }

    #[test]
    fn block_comment_stripping() {
        let doc = strip_block_comment("/**\n * Adds two numbers.\n * @param a first\n */");
        assert!(doc.contains("Adds two numbers."));
        assert!(doc.contains("@param a first"));
        assert!(!doc.contains("/**"));
    }

    #[test]
    fn xml_tag_stripping() {
        assert_eq!(
            strip_xml_tags("<summary>Adds numbers.</summary>"),
            "Adds numbers."
        );
    }
}
