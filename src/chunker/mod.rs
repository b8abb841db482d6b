//! Multi-language AST chunker.
//!
//! Parses source files with tree-sitter and extracts one chunk per named
//! definition (function, class, method), each with a context header, a
//! one-line signature, docstring, visibility, decorators, and deterministic
//! token facts. Files without a usable grammar — unknown extensions, Dart,
//! and files whose parse fails — fall back to a single module-level chunk.
//! Oversized chunks are split along line boundaries with a configurable
//! overlap; markdown files are chunked at heading boundaries.
//!
//! The chunker owns one parser per language. Parser state is not thread-safe,
//! so `chunk_file` takes `&mut self` and callers serialize access.

pub mod languages;
pub mod markdown;
pub mod tokens;

use std::collections::HashMap;
use tracing::warn;
use tree_sitter::{Node, Parser};

use crate::config::ChunkingTuning;
use crate::model::{sha256_hex, TokenFacts};
use languages::{DefKind, Lang};

/// Chunk type as produced by the chunker (before fact extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Module,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Module => "module",
        }
    }
}

/// One extracted chunk. Line numbers are 1-indexed and inclusive.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub chunk_type: ChunkType,
    pub name: String,
    /// `Class.method` for methods, otherwise the plain name.
    pub qualname: String,
    pub text: String,
    pub context_header: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub is_exported: bool,
    pub decorators: Vec<String>,
    /// True for continuation pieces produced by size splitting.
    pub is_continuation: bool,
    pub facts: TokenFacts,
    /// SHA-256 of `context_header + "\n" + text`; the chunk's identity.
    pub content_hash: String,
}

/// Chunker output for one file.
#[derive(Debug, Clone, Default)]
pub struct ChunkedFile {
    pub chunks: Vec<RawChunk>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub top_level_doc: Option<String>,
    pub language_hint: String,
    /// True when the file was chunked as markdown sections.
    pub is_markdown: bool,
}

/// Multi-language chunker holding per-language parser instances.
pub struct Chunker {
    parsers: HashMap<Lang, Parser>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Chunk one file. Never fails: parse and grammar problems degrade to a
    /// module-level chunk.
    pub fn chunk_file(&mut self, path: &str, content: &str, tuning: &ChunkingTuning) -> ChunkedFile {
        let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
        let lang = Lang::from_extension(&ext);

        let mut out = match lang {
            Some(Lang::Markdown) => chunk_markdown(path, content, tuning),
            Some(lang) if lang.grammar().is_some() => {
                match self.parse(lang, content) {
                    Some(tree) => extract_definitions(lang, &tree, path, content),
                    None => {
                        warn!(path, lang = lang.hint(), "parse failed; module-chunk fallback");
                        module_fallback(path, content, lang.hint())
                    }
                }
            }
            Some(lang) => module_fallback(path, content, lang.hint()),
            None => module_fallback(path, content, "unknown"),
        };

        out.chunks = out
            .chunks
            .into_iter()
            .flat_map(|c| split_oversized(c, tuning))
            .collect();
        out
    }

    fn parse(&mut self, lang: Lang, content: &str) -> Option<tree_sitter::Tree> {
        let parser = match self.parsers.entry(lang) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let mut parser = Parser::new();
                let grammar = lang.grammar()?;
                if parser.set_language(&grammar).is_err() {
                    return None;
                }
                e.insert(parser)
            }
        };
        parser.parse(content, None)
    }
}

/// Render the context header for a definition.
fn context_header(path: &str, class: Option<&str>, function: Option<&str>) -> String {
    let mut header = format!("// File: {}", path);
    if let Some(c) = class {
        header.push_str(&format!(", Class: {}", c));
    }
    if let Some(f) = function {
        header.push_str(&format!(", Function: {}", f));
    }
    header
}

fn finish_chunk(mut chunk: RawChunk) -> RawChunk {
    chunk.facts = tokens::token_facts(&chunk.text);
    chunk.content_hash =
        sha256_hex(format!("{}\n{}", chunk.context_header, chunk.text).as_bytes());
    chunk
}

// ═══════════════════════════════════════════════════════════════════════
// AST extraction
// ═══════════════════════════════════════════════════════════════════════

fn extract_definitions(
    lang: Lang,
    tree: &tree_sitter::Tree,
    path: &str,
    content: &str,
) -> ChunkedFile {
    let src = content.as_bytes();
    let root = tree.root_node();

    let mut out = ChunkedFile {
        language_hint: lang.hint().to_string(),
        top_level_doc: languages::top_level_doc(lang, root, src, content),
        ..Default::default()
    };

    collect_imports(lang, root, content, &mut out.imports);

    let mut class_stack: Vec<String> = Vec::new();
    walk(lang, root, path, content, src, &mut class_stack, &mut out.chunks);

    out.exports = out
        .chunks
        .iter()
        .filter(|c| c.is_exported && c.chunk_type != ChunkType::Method)
        .map(|c| c.name.clone())
        .collect();

    // A parsed file with no definitions still gets a module chunk so its
    // content stays searchable.
    if out.chunks.is_empty() && !content.trim().is_empty() {
        let fallback = module_fallback(path, content, lang.hint());
        out.chunks = fallback.chunks;
    }

    out
}

fn collect_imports(lang: Lang, root: Node, content: &str, imports: &mut Vec<String>) {
    let kinds = languages::import_kinds(lang);
    if kinds.is_empty() {
        return;
    }
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            if let Some(text) = content.get(child.start_byte()..child.end_byte()) {
                for line in text.lines() {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && trimmed != "(" && trimmed != ")" {
                        imports.push(trimmed.to_string());
                    }
                }
            }
        }
    }
}

fn walk(
    lang: Lang,
    node: Node,
    path: &str,
    content: &str,
    src: &[u8],
    class_stack: &mut Vec<String>,
    chunks: &mut Vec<RawChunk>,
) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();

    for child in children {
        match languages::classify(lang, child) {
            Some(def_kind) => {
                let name = definition_name(lang, child, src);
                let Some(name) = name else {
                    walk(lang, child, path, content, src, class_stack, chunks);
                    continue;
                };

                let in_class = !class_stack.is_empty();
                let chunk_type = match def_kind {
                    DefKind::Class => ChunkType::Class,
                    DefKind::Func if in_class => ChunkType::Method,
                    DefKind::Func => ChunkType::Function,
                };

                emit_definition(
                    lang,
                    child,
                    chunk_type,
                    &name,
                    path,
                    content,
                    src,
                    class_stack,
                    chunks,
                );

                if def_kind == DefKind::Class {
                    class_stack.push(name);
                    walk(lang, child, path, content, src, class_stack, chunks);
                    class_stack.pop();
                } else {
                    walk(lang, child, path, content, src, class_stack, chunks);
                }
            }
            None => walk(lang, child, path, content, src, class_stack, chunks),
        }
    }
}

fn definition_name(lang: Lang, node: Node, src: &[u8]) -> Option<String> {
    if let Some(name) = languages::name_of(lang, node, src) {
        return Some(name);
    }
    // Unnamed-by-field declarations with conventional names.
    match node.kind() {
        "init_declaration" => Some("init".to_string()),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_definition(
    lang: Lang,
    node: Node,
    chunk_type: ChunkType,
    name: &str,
    path: &str,
    content: &str,
    src: &[u8],
    class_stack: &[String],
    chunks: &mut Vec<RawChunk>,
) {
    let span = languages::span_node(lang, node);
    let Some(text) = content.get(span.start_byte()..span.end_byte()) else {
        return;
    };

    let enclosing_class = match chunk_type {
        ChunkType::Method => class_stack.last().cloned().or_else(|| go_receiver(lang, node, src)),
        _ => go_receiver(lang, node, src),
    };
    let (class_part, func_part, qualname) = match chunk_type {
        ChunkType::Class => (Some(name), None, name.to_string()),
        ChunkType::Method | ChunkType::Function => {
            let qual = match &enclosing_class {
                Some(c) => format!("{}.{}", c, name),
                None => name.to_string(),
            };
            (enclosing_class.as_deref(), Some(name), qual)
        }
        ChunkType::Module => (None, None, name.to_string()),
    };

    // Go free functions on a receiver are methods even without a class node
    // on the stack.
    let chunk_type = if chunk_type == ChunkType::Function && enclosing_class.is_some() {
        ChunkType::Method
    } else {
        chunk_type
    };

    let header = context_header(path, class_part, func_part);
    let in_class = matches!(chunk_type, ChunkType::Method);

    let chunk = RawChunk {
        chunk_type,
        name: name.to_string(),
        qualname,
        text: text.to_string(),
        context_header: header,
        start_line: span.start_position().row + 1,
        end_line: span.end_position().row + 1,
        start_byte: span.start_byte(),
        end_byte: span.end_byte(),
        signature: languages::signature_of(node, content),
        docstring: languages::docstring_of(lang, node, src, content),
        is_exported: languages::is_exported(lang, node, name, src, in_class),
        decorators: languages::decorators_of(lang, node, src, content),
        is_continuation: false,
        facts: TokenFacts::default(),
        content_hash: String::new(),
    };
    chunks.push(finish_chunk(chunk));
}

/// Receiver type of a Go method declaration, e.g. `func (s *Server) Run()`
/// → `Server`.
fn go_receiver(lang: Lang, node: Node, src: &[u8]) -> Option<String> {
    if lang != Lang::Go || node.kind() != "method_declaration" {
        return None;
    }
    let receiver = node.child_by_field_name("receiver")?;
    let text = receiver.utf8_text(src).ok()?;
    let ty = text
        .trim_matches(['(', ')'])
        .split_whitespace()
        .last()?
        .trim_start_matches(['*', '&']);
    (!ty.is_empty()).then(|| ty.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Fallbacks and markdown
// ═══════════════════════════════════════════════════════════════════════

/// Single module-level chunk covering the entire file.
fn module_fallback(path: &str, content: &str, hint: &str) -> ChunkedFile {
    let mut out = ChunkedFile {
        language_hint: hint.to_string(),
        ..Default::default()
    };
    if content.is_empty() {
        return out;
    }

    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    let chunk = RawChunk {
        chunk_type: ChunkType::Module,
        name: name.clone(),
        qualname: name,
        text: content.to_string(),
        context_header: context_header(path, None, None),
        start_line: 1,
        end_line: content.lines().count().max(1),
        start_byte: 0,
        end_byte: content.len(),
        signature: None,
        docstring: None,
        is_exported: false,
        decorators: Vec::new(),
        is_continuation: false,
        facts: TokenFacts::default(),
        content_hash: String::new(),
    };
    out.chunks.push(finish_chunk(chunk));
    out
}

fn chunk_markdown(path: &str, content: &str, tuning: &ChunkingTuning) -> ChunkedFile {
    let mut out = ChunkedFile {
        language_hint: "markdown".to_string(),
        is_markdown: true,
        ..Default::default()
    };

    let mut byte_offsets = vec![0usize];
    for line in content.lines() {
        byte_offsets.push(byte_offsets.last().unwrap() + line.len() + 1);
    }

    for section in markdown::split_markdown(content, tuning) {
        let name = if section.title.is_empty() {
            path.rsplit('/').next().unwrap_or(path).to_string()
        } else {
            section.title.clone()
        };
        let header = format!("// File: {}, Section: {}", path, name);
        let start_byte = byte_offsets
            .get(section.start_line)
            .copied()
            .unwrap_or(0);
        let end_byte = byte_offsets
            .get(section.end_line)
            .copied()
            .unwrap_or(content.len())
            .min(content.len());

        let chunk = RawChunk {
            chunk_type: ChunkType::Module,
            name: name.clone(),
            qualname: name,
            text: section.text,
            context_header: header,
            start_line: section.start_line + 1,
            end_line: section.end_line.max(section.start_line + 1),
            start_byte,
            end_byte,
            signature: None,
            docstring: None,
            is_exported: false,
            decorators: Vec::new(),
            is_continuation: false,
            facts: TokenFacts::default(),
            content_hash: String::new(),
        };
        out.chunks.push(finish_chunk(chunk));
    }

    // First section doubles as the top-level doc for the file summary.
    out.top_level_doc = out.chunks.first().map(|c| {
        c.text.chars().take(400).collect::<String>()
    });

    out
}

// ═══════════════════════════════════════════════════════════════════════
// Size enforcement
// ═══════════════════════════════════════════════════════════════════════

/// Split a chunk exceeding `max_chunk_size` along line boundaries, carrying
/// `split_overlap_lines` of context into each continuation. Continuations
/// inherit type/name/visibility but clear signature, docstring, and
/// decorators; their header is suffixed `(continued)`.
fn split_oversized(chunk: RawChunk, tuning: &ChunkingTuning) -> Vec<RawChunk> {
    if chunk.text.len() <= tuning.max_chunk_size {
        return vec![chunk];
    }

    let lines: Vec<&str> = chunk.text.lines().collect();
    let mut pieces: Vec<(usize, usize)> = Vec::new(); // (start_line_idx, end_line_idx)
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut size = 0usize;
        while end < lines.len() {
            let add = lines[end].len() + 1;
            if size + add > tuning.max_chunk_size && end > start {
                break;
            }
            size += add;
            end += 1;
        }
        pieces.push((start, end));
        if end >= lines.len() {
            break;
        }
        // Overlap must leave forward progress.
        let overlap = tuning.split_overlap_lines.min(end - start - 1);
        start = end - overlap;
    }

    // Byte offset of each line within the chunk text.
    let mut line_starts = vec![0usize];
    for line in &lines {
        line_starts.push(line_starts.last().unwrap() + line.len() + 1);
    }

    let mut out = Vec::with_capacity(pieces.len());
    for (i, &(ls, le)) in pieces.iter().enumerate() {
        let text = lines[ls..le].join("\n");
        let piece_start = chunk.start_byte + line_starts[ls];
        let piece_end = (chunk.start_byte + line_starts[le]).min(chunk.end_byte);
        let continuation = i > 0;
        let header = if continuation {
            format!("{} (continued)", chunk.context_header)
        } else {
            chunk.context_header.clone()
        };

        let piece = RawChunk {
            chunk_type: chunk.chunk_type,
            name: chunk.name.clone(),
            qualname: chunk.qualname.clone(),
            text,
            context_header: header,
            start_line: chunk.start_line + ls,
            end_line: chunk.start_line + le.saturating_sub(1),
            start_byte: piece_start,
            end_byte: piece_end,
            signature: if continuation { None } else { chunk.signature.clone() },
            docstring: if continuation { None } else { chunk.docstring.clone() },
            is_exported: chunk.is_exported,
            decorators: if continuation {
                Vec::new()
            } else {
                chunk.decorators.clone()
            },
            is_continuation: continuation,
            facts: TokenFacts::default(),
            content_hash: String::new(),
        };
        out.push(finish_chunk(piece));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> ChunkingTuning {
        ChunkingTuning::default()
    }

    fn chunk(path: &str, content: &str) -> ChunkedFile {
        Chunker::new().chunk_file(path, content, &tuning())
    }

    #[test]
    fn python_function_and_docstring() {
        let out = chunk(
            "math.py",
            "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n",
        );
        let add = out
            .chunks
            .iter()
            .find(|c| c.name == "add")
            .expect("add chunk");
        assert_eq!(add.chunk_type, ChunkType::Function);
        assert_eq!(add.docstring.as_deref(), Some("Add two numbers."));
        assert!(add.is_exported);
        assert_eq!(add.start_line, 1);
        assert!(add.context_header.contains("File: math.py"));
        assert!(add.context_header.contains("Function: add"));
    }

    #[test]
    fn python_private_not_exported() {
        let out = chunk("m.py", "def _hidden():\n    pass\n");
        assert!(!out.chunks.iter().find(|c| c.name == "_hidden").unwrap().is_exported);
    }

    #[test]
    fn python_method_qualname_and_decorators() {
        let src = "class Greeter:\n    @staticmethod\n    def greet(self):\n        return 'hi'\n";
        let out = chunk("g.py", src);
        let class = out.chunks.iter().find(|c| c.name == "Greeter").unwrap();
        assert_eq!(class.chunk_type, ChunkType::Class);
        let method = out.chunks.iter().find(|c| c.name == "greet").unwrap();
        assert_eq!(method.chunk_type, ChunkType::Method);
        assert_eq!(method.qualname, "Greeter.greet");
        assert_eq!(method.decorators, vec!["@staticmethod"]);
        assert!(method.context_header.contains("Class: Greeter"));
    }

    #[test]
    fn typescript_exported_class() {
        let src = "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n";
        let out = chunk("http_client.ts", src);
        let class = out.chunks.iter().find(|c| c.name == "HttpClient").unwrap();
        assert_eq!(class.chunk_type, ChunkType::Class);
        assert!(class.is_exported);
        assert!(out.exports.contains(&"HttpClient".to_string()));
        let method = out.chunks.iter().find(|c| c.name == "get").unwrap();
        assert_eq!(method.qualname, "HttpClient.get");
    }

    #[test]
    fn javascript_arrow_function_binding() {
        let src = "export const handler = async (req) => {\n  return req.body;\n};\n";
        let out = chunk("handler.js", src);
        let handler = out.chunks.iter().find(|c| c.name == "handler");
        assert!(handler.is_some(), "arrow function binding extracted");
        assert!(handler.unwrap().is_exported);
    }

    #[test]
    fn go_exported_by_case() {
        let src = "package main\n\n// Add adds.\nfunc Add(a, b int) int {\n\treturn a + b\n}\n\nfunc helper() {}\n";
        let out = chunk("main.go", src);
        let add = out.chunks.iter().find(|c| c.name == "Add").unwrap();
        assert!(add.is_exported);
        assert_eq!(add.docstring.as_deref(), Some("Add adds."));
        let helper = out.chunks.iter().find(|c| c.name == "helper").unwrap();
        assert!(!helper.is_exported);
    }

    #[test]
    fn go_method_receiver_qualname() {
        let src = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Run() error {\n\treturn nil\n}\n";
        let out = chunk("srv.go", src);
        let run = out.chunks.iter().find(|c| c.name == "Run").unwrap();
        assert_eq!(run.chunk_type, ChunkType::Method);
        assert_eq!(run.qualname, "Server.Run");
    }

    #[test]
    fn rust_pub_and_doc_comments() {
        let src = "/// Adds two numbers.\npub fn add(a: i64, b: i64) -> i64 {\n    a + b\n}\n\nfn private_helper() {}\n";
        let out = chunk("lib.rs", src);
        let add = out.chunks.iter().find(|c| c.name == "add").unwrap();
        assert!(add.is_exported);
        assert_eq!(add.docstring.as_deref(), Some("Adds two numbers."));
        let helper = out.chunks.iter().find(|c| c.name == "private_helper").unwrap();
        assert!(!helper.is_exported);
    }

    #[test]
    fn rust_impl_methods() {
        let src = "pub struct Engine;\n\nimpl Engine {\n    pub fn start(&self) {}\n}\n";
        let out = chunk("e.rs", src);
        let start = out.chunks.iter().find(|c| c.name == "start").unwrap();
        assert_eq!(start.chunk_type, ChunkType::Method);
        assert_eq!(start.qualname, "Engine.start");
    }

    #[test]
    fn dart_is_module_only() {
        let out = chunk("app.dart", "class App {\n  void run() {}\n}\n");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_type, ChunkType::Module);
        assert_eq!(out.language_hint, "dart");
    }

    #[test]
    fn unknown_extension_is_module_fallback() {
        let out = chunk("data.xyz", "whatever content\n");
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_type, ChunkType::Module);
        assert_eq!(out.chunks[0].start_line, 1);
    }

    #[test]
    fn empty_file_yields_no_chunks() {
        let out = chunk("empty.py", "");
        assert!(out.chunks.is_empty());
    }

    #[test]
    fn syntax_error_still_chunks() {
        // tree-sitter is resilient; worst case the file falls back to a
        // module chunk, so something is always searchable.
        let out = chunk("broken.py", "def broken(:\n    ???\n");
        assert!(!out.chunks.is_empty());
    }

    #[test]
    fn oversized_chunk_splits_with_overlap() {
        let mut t = tuning();
        t.max_chunk_size = 200;
        t.split_overlap_lines = 2;
        let body: String = (0..60).map(|i| format!("    line_{:02} = {}\n", i, i)).collect();
        let src = format!("def big():\n{}", body);
        let out = Chunker::new().chunk_file("big.py", &src, &t);

        let pieces: Vec<_> = out.chunks.iter().filter(|c| c.name == "big").collect();
        assert!(pieces.len() > 1, "expected split, got {}", pieces.len());
        assert!(!pieces[0].is_continuation);
        assert!(pieces[1].is_continuation);
        assert!(pieces[1].context_header.ends_with("(continued)"));
        assert!(pieces[1].signature.is_none());
        assert!(pieces[1].decorators.is_empty());
        assert_eq!(pieces[1].chunk_type, pieces[0].chunk_type);

        // Overlap: the continuation starts before the previous piece ends.
        assert!(pieces[1].start_line < pieces[0].end_line + 1);
    }

    #[test]
    fn split_pieces_cover_all_lines() {
        let mut t = tuning();
        t.max_chunk_size = 150;
        t.split_overlap_lines = 1;
        let src: String = (0..40).map(|i| format!("line number {}\n", i)).collect();
        let out = Chunker::new().chunk_file("notes.xyz", &src, &t);

        let mut covered: Vec<bool> = vec![false; 40];
        for c in &out.chunks {
            for line in c.start_line..=c.end_line.min(40) {
                covered[line - 1] = true;
            }
        }
        assert!(covered.iter().all(|&c| c), "every line covered by a piece");
    }

    #[test]
    fn markdown_heading_chunks() {
        let md = "# Title\n\nIntro text.\n\n## Install\n\nRun the installer.\n\n## Usage\n\nCall the API with a client and a token to get going.\n";
        let out = chunk("README.md", md);
        assert!(out.is_markdown);
        assert!(out.chunks.len() >= 2);
        assert!(out.chunks.iter().all(|c| c.chunk_type == ChunkType::Module));
        assert!(out.chunks[0].context_header.contains("Section:"));
        assert!(out.top_level_doc.is_some());
    }

    #[test]
    fn content_hash_is_deterministic_and_header_sensitive() {
        let a = chunk("m.py", "def f():\n    return 1\n");
        let b = chunk("m.py", "def f():\n    return 1\n");
        assert_eq!(a.chunks[0].content_hash, b.chunks[0].content_hash);

        let c = chunk("other.py", "def f():\n    return 1\n");
        assert_ne!(a.chunks[0].content_hash, c.chunks[0].content_hash);
    }

    #[test]
    fn imports_collected() {
        let out = chunk("app.py", "import os\nfrom sys import path\n\ndef main():\n    pass\n");
        assert!(out.imports.iter().any(|i| i == "import os"));
        assert!(out.imports.iter().any(|i| i.contains("from sys import path")));
    }

    #[test]
    fn top_level_doc_python() {
        let out = chunk("mod.py", "\"\"\"Module doc.\"\"\"\n\ndef f():\n    pass\n");
        assert_eq!(out.top_level_doc.as_deref(), Some("Module doc."));
    }
}
