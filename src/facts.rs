//! Fact extraction: chunker output → entity rows.
//!
//! Builds symbol, chunk, file, and ref rows for one file, assigns stable
//! content-derived IDs, wires method → class parent links, and prepares the
//! embed inputs whose SHA-256 hashes key the embedding cache. Vector columns
//! are left empty here; the indexer joins embedding results back in by
//! `embed_hash` before persisting.

use std::collections::HashMap;

use crate::chunker::tokens::{scan_occurrences, OccurrenceKind};
use crate::chunker::{ChunkType, ChunkedFile, RawChunk};
use crate::config::ChunkingTuning;
use crate::model::{
    sha256_hex, stable_id, ChunkKind, ChunkRow, FileRow, RefKind, RefRow, SymbolKind, SymbolRow,
};

/// One embedding work item: the exact input text and its cache key.
#[derive(Debug, Clone)]
pub struct EmbedItem {
    pub hash: String,
    pub text: String,
}

/// All rows extracted from one file.
#[derive(Debug, Clone)]
pub struct FileExtraction {
    pub file: FileRow,
    pub symbols: Vec<SymbolRow>,
    pub chunks: Vec<ChunkRow>,
    pub refs: Vec<RefRow>,
    pub embed_items: Vec<EmbedItem>,
}

/// Extract entity rows from a chunked file.
pub fn extract_facts(
    repo_id: &str,
    revision: &str,
    path: &str,
    content: &str,
    file_hash: &str,
    chunked: &ChunkedFile,
    tuning: &ChunkingTuning,
) -> FileExtraction {
    let extension = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    let mut embed_items = Vec::new();

    let mut symbols = build_symbols(
        repo_id, revision, path, &extension, file_hash, chunked, &mut embed_items,
    );
    attach_parent_symbols(&mut symbols);

    let chunks = build_chunks(
        repo_id, revision, path, &extension, file_hash, chunked, &symbols, tuning,
        &mut embed_items,
    );

    let file = build_file_row(repo_id, path, &extension, file_hash, chunked, &mut embed_items);

    let refs = build_refs(path, &extension, file_hash, content, chunked);

    FileExtraction {
        file,
        symbols,
        chunks,
        refs,
        embed_items,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Symbols
// ═══════════════════════════════════════════════════════════════════════

fn symbol_kind(chunk_type: ChunkType) -> Option<SymbolKind> {
    match chunk_type {
        ChunkType::Function => Some(SymbolKind::Function),
        ChunkType::Method => Some(SymbolKind::Method),
        ChunkType::Class => Some(SymbolKind::Class),
        ChunkType::Module => None,
    }
}

/// Embed input for a symbol: signature, docstring, and context header with
/// missing parts omitted.
fn symbol_embed_input(chunk: &RawChunk) -> String {
    let mut parts = Vec::new();
    if let Some(sig) = &chunk.signature {
        parts.push(sig.as_str());
    }
    if let Some(doc) = &chunk.docstring {
        parts.push(doc.as_str());
    }
    parts.push(chunk.context_header.as_str());
    parts.join("\n")
}

fn build_symbols(
    repo_id: &str,
    revision: &str,
    path: &str,
    extension: &str,
    file_hash: &str,
    chunked: &ChunkedFile,
    embed_items: &mut Vec<EmbedItem>,
) -> Vec<SymbolRow> {
    let mut symbols = Vec::new();
    let mut seen_ids: HashMap<String, usize> = HashMap::new();

    for chunk in &chunked.chunks {
        if chunk.is_continuation {
            continue;
        }
        let Some(kind) = symbol_kind(chunk.chunk_type) else {
            continue;
        };

        // Positional key keeps overload collisions apart deterministically.
        let sig_key = chunk
            .signature
            .clone()
            .unwrap_or_else(|| format!("@{}", chunk.start_byte));
        let mut symbol_id = stable_id(&[repo_id, path, kind.as_str(), &chunk.qualname, &sig_key]);
        if seen_ids.contains_key(&symbol_id) {
            // Identical qualname and signature: break the tie by byte offset.
            symbol_id = stable_id(&[
                repo_id,
                path,
                kind.as_str(),
                &chunk.qualname,
                &sig_key,
                &chunk.start_byte.to_string(),
            ]);
        }
        seen_ids.insert(symbol_id.clone(), symbols.len());

        let embed_input = symbol_embed_input(chunk);
        let embed_hash = sha256_hex(embed_input.as_bytes());
        embed_items.push(EmbedItem {
            hash: embed_hash.clone(),
            text: embed_input,
        });

        let search_text = [
            chunk.name.as_str(),
            chunk.qualname.as_str(),
            chunk.signature.as_deref().unwrap_or(""),
            chunk.docstring.as_deref().unwrap_or(""),
            &chunk.facts.identifiers.join(" "),
            &chunk.facts.identifier_parts.join(" "),
        ]
        .join("\n");

        symbols.push(SymbolRow {
            symbol_id,
            repo_id: repo_id.to_string(),
            revision: revision.to_string(),
            file_path: path.to_string(),
            extension: extension.to_string(),
            language_hint: chunked.language_hint.clone(),
            start_line: chunk.start_line as i64,
            end_line: chunk.end_line as i64,
            start_byte: chunk.start_byte as i64,
            end_byte: chunk.end_byte as i64,
            symbol_kind: kind,
            symbol_name: chunk.name.clone(),
            qualname: chunk.qualname.clone(),
            parent_symbol_id: None,
            signature: chunk.signature.clone(),
            docstring: chunk.docstring.clone(),
            is_exported: chunk.is_exported,
            decorator_names: chunk.decorators.clone(),
            context_header: chunk.context_header.clone(),
            code_text: chunk.text.clone(),
            search_text,
            facts: chunk.facts.clone(),
            content_hash: chunk.content_hash.clone(),
            file_hash: file_hash.to_string(),
            embed_hash,
            vec_summary: Vec::new(),
        });
    }

    symbols
}

/// Second pass: map `Class.method` qualnames to the class symbol's ID within
/// the same file.
fn attach_parent_symbols(symbols: &mut [SymbolRow]) {
    let class_ids: HashMap<String, String> = symbols
        .iter()
        .filter(|s| s.symbol_kind == SymbolKind::Class)
        .map(|s| (s.qualname.clone(), s.symbol_id.clone()))
        .collect();

    for symbol in symbols.iter_mut() {
        if symbol.symbol_kind != SymbolKind::Method {
            continue;
        }
        if let Some((class, _method)) = symbol.qualname.rsplit_once('.') {
            symbol.parent_symbol_id = class_ids.get(class).cloned();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Chunks
// ═══════════════════════════════════════════════════════════════════════

#[allow(clippy::too_many_arguments)]
fn build_chunks(
    repo_id: &str,
    revision: &str,
    path: &str,
    extension: &str,
    file_hash: &str,
    chunked: &ChunkedFile,
    symbols: &[SymbolRow],
    tuning: &ChunkingTuning,
    embed_items: &mut Vec<EmbedItem>,
) -> Vec<ChunkRow> {
    let symbol_by_content: HashMap<&str, &SymbolRow> = symbols
        .iter()
        .map(|s| (s.content_hash.as_str(), s))
        .collect();
    let symbol_by_qualname: HashMap<&str, &SymbolRow> = symbols
        .iter()
        .map(|s| (s.qualname.as_str(), s))
        .collect();

    let mut rows = Vec::new();

    for chunk in &chunked.chunks {
        let (owner, kind) = match chunk.chunk_type {
            ChunkType::Module if chunked.is_markdown => (None, ChunkKind::MarkdownSection),
            ChunkType::Module => (None, ChunkKind::Block),
            _ if chunk.is_continuation => {
                // Continuations always get a chunk row, owned by the symbol
                // emitted from the first piece.
                let owner = symbol_by_qualname
                    .get(chunk.qualname.as_str())
                    .map(|s| s.symbol_id.clone());
                (owner, ChunkKind::StatementGroup)
            }
            _ => {
                // The symbol row is the canonical representation for small
                // bodies; only oversized ones get a duplicate chunk row.
                if chunk.text.len() <= tuning.min_chunk_row_body {
                    continue;
                }
                let owner = symbol_by_content
                    .get(chunk.content_hash.as_str())
                    .map(|s| s.symbol_id.clone());
                (owner, ChunkKind::Block)
            }
        };

        let embed_input = format!("{}\n{}", chunk.context_header, chunk.text);
        let embed_hash = sha256_hex(embed_input.as_bytes());
        embed_items.push(EmbedItem {
            hash: embed_hash.clone(),
            text: embed_input,
        });

        let chunk_id = stable_id(&[
            owner.as_deref().unwrap_or(""),
            path,
            &chunk.start_byte.to_string(),
            &chunk.end_byte.to_string(),
            &chunk.content_hash,
        ]);

        let search_text = [
            chunk.context_header.as_str(),
            &chunk.facts.identifiers.join(" "),
            &chunk.facts.identifier_parts.join(" "),
        ]
        .join("\n");

        rows.push(ChunkRow {
            chunk_id,
            repo_id: repo_id.to_string(),
            revision: revision.to_string(),
            file_path: path.to_string(),
            extension: extension.to_string(),
            language_hint: chunked.language_hint.clone(),
            start_line: chunk.start_line as i64,
            end_line: chunk.end_line as i64,
            start_byte: chunk.start_byte as i64,
            end_byte: chunk.end_byte as i64,
            owner_symbol_id: owner,
            chunk_kind: kind,
            context_header: chunk.context_header.clone(),
            code_text: chunk.text.clone(),
            search_text,
            facts: chunk.facts.clone(),
            content_hash: chunk.content_hash.clone(),
            file_hash: file_hash.to_string(),
            embed_hash,
            vec_code: Vec::new(),
        });
    }

    rows
}

// ═══════════════════════════════════════════════════════════════════════
// Files
// ═══════════════════════════════════════════════════════════════════════

fn build_file_row(
    repo_id: &str,
    path: &str,
    extension: &str,
    file_hash: &str,
    chunked: &ChunkedFile,
    embed_items: &mut Vec<EmbedItem>,
) -> FileRow {
    let mut summary = format!("File: {}", path);
    if !chunked.exports.is_empty() {
        summary.push_str(&format!("\nExports: {}", chunked.exports.join(", ")));
    }
    if !chunked.imports.is_empty() {
        summary.push_str(&format!("\nImports: {}", chunked.imports.join(", ")));
    }
    if let Some(doc) = &chunked.top_level_doc {
        summary.push_str(&format!("\nDoc: {}", doc));
    }

    let embed_hash = sha256_hex(summary.as_bytes());
    embed_items.push(EmbedItem {
        hash: embed_hash.clone(),
        text: summary.clone(),
    });

    FileRow {
        file_id: stable_id(&[repo_id, path]),
        file_path: path.to_string(),
        extension: extension.to_string(),
        file_hash: file_hash.to_string(),
        imports: chunked.imports.clone(),
        exports: chunked.exports.clone(),
        top_level_doc: chunked.top_level_doc.clone(),
        file_summary_text: summary,
        embed_hash,
        vec_file: Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Refs
// ═══════════════════════════════════════════════════════════════════════

/// A parsed import occurrence before ref-row assembly.
struct ImportOccurrence {
    start: usize,
    end: usize,
    token: String,
    module_name: Option<String>,
    imported_name: Option<String>,
}

fn build_refs(
    path: &str,
    extension: &str,
    file_hash: &str,
    content: &str,
    chunked: &ChunkedFile,
) -> Vec<RefRow> {
    if chunked.is_markdown {
        return Vec::new();
    }

    let line_starts = build_line_index(content);

    // (start, end, token) → best (kind, import metadata); higher priority wins.
    type Key = (usize, usize, String);
    let mut best: HashMap<Key, (RefKind, Option<String>, Option<String>)> = HashMap::new();
    let mut insert = |start: usize,
                      end: usize,
                      token: String,
                      kind: RefKind,
                      module: Option<String>,
                      imported: Option<String>| {
        let key = (start, end, token);
        let outranked = best
            .get(&key)
            .is_some_and(|(existing, _, _)| existing.priority() >= kind.priority());
        if !outranked {
            best.insert(key, (kind, module, imported));
        }
    };

    for imp in parse_imports(content, extension) {
        insert(
            imp.start,
            imp.end,
            imp.token,
            RefKind::Import,
            imp.module_name,
            imp.imported_name,
        );
    }

    for occ in scan_occurrences(content) {
        let kind = match occ.kind {
            OccurrenceKind::Call => RefKind::Call,
            OccurrenceKind::Identifier => RefKind::Identifier,
            OccurrenceKind::StringLiteral => RefKind::StringLiteral,
        };
        insert(occ.start, occ.end, occ.token, kind, None, None);
    }

    let mut entries: Vec<(Key, (RefKind, Option<String>, Option<String>))> =
        best.into_iter().collect();
    entries.sort_by(|a, b| (a.0 .0, a.0 .1).cmp(&(b.0 .0, b.0 .1)));

    entries
        .into_iter()
        .map(|((start, end, token), (kind, module_name, imported_name))| {
            let start_line = line_for_offset(&line_starts, start) as i64 + 1;
            RefRow {
                ref_id: stable_id(&[
                    path,
                    &start.to_string(),
                    &end.to_string(),
                    kind.as_str(),
                    &token,
                ]),
                file_path: path.to_string(),
                extension: extension.to_string(),
                file_hash: file_hash.to_string(),
                start_line,
                start_byte: start as i64,
                end_byte: end as i64,
                ref_kind: kind,
                token_text: token,
                context_snippet: context_snippet(content, start, end),
                module_name,
                imported_name,
            }
        })
        .collect()
}

/// Byte offset of each line start, for offset → line translation.
pub fn build_line_index(content: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 0-based line containing the byte offset.
pub fn line_for_offset(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(line) => line,
        Err(insert) => insert.saturating_sub(1),
    }
}

/// ±80 chars around the occurrence, whitespace-normalized.
fn context_snippet(content: &str, start: usize, end: usize) -> String {
    let from = start.saturating_sub(80);
    let to = (end + 80).min(content.len());
    let from = ceil_char_boundary(content, from);
    let to = floor_char_boundary(content, to);
    content[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Parse the import surface of a file into `{module, imported, local}`
/// occurrences. Line-oriented and language-specific; the token is the local
/// binding name so usage search joins against identifiers.
fn parse_imports(content: &str, extension: &str) -> Vec<ImportOccurrence> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_start();
        let indent = line.len() - line.trim_start().len();

        match extension {
            "py" => parse_python_import(trimmed, line_start + indent, &mut out),
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => {
                parse_js_import(trimmed, line_start + indent, &mut out)
            }
            "go" => parse_go_import(trimmed, line_start + indent, &mut out),
            "rs" => parse_rust_use(trimmed, line_start + indent, &mut out),
            "java" | "kt" | "kts" | "swift" | "dart" => {
                parse_dotted_import(trimmed, "import ", line_start + indent, &mut out)
            }
            "cs" => parse_dotted_import(trimmed, "using ", line_start + indent, &mut out),
            "php" => parse_php_use(trimmed, line_start + indent, &mut out),
            _ => {}
        }
    }

    out
}

fn push_import(
    out: &mut Vec<ImportOccurrence>,
    line_offset: usize,
    line: &str,
    local: &str,
    module: &str,
    imported: Option<&str>,
) {
    // The local binding is the last occurrence on the line (`X as Y` puts
    // the alias after the imported name).
    let Some(pos) = line.rfind(local) else { return };
    out.push(ImportOccurrence {
        start: line_offset + pos,
        end: line_offset + pos + local.len(),
        token: local.to_string(),
        module_name: Some(module.to_string()),
        imported_name: imported.map(|s| s.to_string()),
    });
}

fn parse_python_import(line: &str, offset: usize, out: &mut Vec<ImportOccurrence>) {
    if let Some(rest) = line.strip_prefix("from ") {
        let Some((module, names)) = rest.split_once(" import ") else {
            return;
        };
        let module = module.trim();
        for part in names.split(',') {
            let part = part.trim().trim_end_matches(['(', ')']).trim();
            if part.is_empty() || part == "*" {
                continue;
            }
            let (imported, local) = match part.split_once(" as ") {
                Some((i, l)) => (i.trim(), l.trim()),
                None => (part, part),
            };
            push_import(out, offset, line, local, module, Some(imported));
        }
    } else if let Some(rest) = line.strip_prefix("import ") {
        for part in rest.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (module, local) = match part.split_once(" as ") {
                Some((m, l)) => (m.trim(), l.trim()),
                None => (part, part.rsplit('.').next().unwrap_or(part)),
            };
            push_import(out, offset, line, local, module, None);
        }
    }
}

fn parse_js_import(line: &str, offset: usize, out: &mut Vec<ImportOccurrence>) {
    if !line.starts_with("import ") && !line.starts_with("import{") {
        return;
    }
    let module = line
        .split_once(" from ")
        .map(|(_, m)| m.trim().trim_end_matches(';').trim_matches(['"', '\'', '`']))
        .unwrap_or("");

    let clause = line
        .strip_prefix("import ")
        .unwrap_or(line)
        .split(" from ")
        .next()
        .unwrap_or("");

    if let Some(open) = clause.find('{') {
        let inner = clause[open + 1..].split('}').next().unwrap_or("");
        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (imported, local) = match part.split_once(" as ") {
                Some((i, l)) => (i.trim(), l.trim()),
                None => (part, part),
            };
            push_import(out, offset, line, local, module, Some(imported));
        }
        // Default import before the brace: `import D, {x} from 'm'`.
        let default = clause[..open].trim().trim_end_matches(',').trim();
        if !default.is_empty() {
            push_import(out, offset, line, default, module, Some("default"));
        }
    } else if let Some(rest) = clause.strip_prefix("* as ") {
        let local = rest.trim();
        push_import(out, offset, line, local, module, Some("*"));
    } else {
        let local = clause.trim();
        if !local.is_empty() && !local.starts_with(['"', '\'', '`']) {
            push_import(out, offset, line, local, module, Some("default"));
        }
    }
}

fn parse_go_import(line: &str, offset: usize, out: &mut Vec<ImportOccurrence>) {
    // `import "pkg"`, or a bare `"pkg"` / `alias "pkg"` line inside a block.
    let rest = line.strip_prefix("import ").unwrap_or(line);
    let rest = rest.trim();
    let (alias, quoted) = match rest.split_once(' ') {
        Some((a, q)) if q.trim_start().starts_with('"') => (Some(a.trim()), q.trim()),
        _ => (None, rest),
    };
    if !quoted.starts_with('"') || !quoted.trim_end().ends_with('"') {
        return;
    }
    let module = quoted.trim().trim_matches('"');
    if module.is_empty() {
        return;
    }
    let local = alias.unwrap_or_else(|| module.rsplit('/').next().unwrap_or(module));
    push_import(out, offset, line, local, module, None);
}

fn parse_rust_use(line: &str, offset: usize, out: &mut Vec<ImportOccurrence>) {
    let Some(rest) = line
        .strip_prefix("use ")
        .or_else(|| line.strip_prefix("pub use "))
    else {
        return;
    };
    let rest = rest.trim_end().trim_end_matches(';');
    if let Some((module, group)) = rest.split_once('{') {
        let module = module.trim_end_matches("::").trim();
        for part in group.trim_end_matches('}').split(',') {
            let part = part.trim();
            if part.is_empty() || part == "*" {
                continue;
            }
            let (imported, local) = match part.split_once(" as ") {
                Some((i, l)) => (i.trim(), l.trim()),
                None => (part, part),
            };
            push_import(out, offset, line, local, module, Some(imported));
        }
    } else {
        let (path, local) = match rest.split_once(" as ") {
            Some((p, l)) => (p.trim(), l.trim()),
            None => (rest, rest.rsplit("::").next().unwrap_or(rest)),
        };
        if local == "*" {
            return;
        }
        let module = path.rsplit_once("::").map(|(m, _)| m).unwrap_or("");
        push_import(out, offset, line, local, module, None);
    }
}

/// `import a.b.C` (Java/Kotlin/Swift/Dart) and `using A.B;` (C#).
fn parse_dotted_import(
    line: &str,
    keyword: &str,
    offset: usize,
    out: &mut Vec<ImportOccurrence>,
) {
    let Some(rest) = line.strip_prefix(keyword) else {
        return;
    };
    let path = rest.trim().trim_end_matches(';').trim();
    if path.is_empty() || path.contains('(') {
        return;
    }
    let local = path.rsplit('.').next().unwrap_or(path);
    if local == "*" {
        return;
    }
    let module = path.rsplit_once('.').map(|(m, _)| m).unwrap_or(path);
    push_import(out, offset, line, local, module, None);
}

fn parse_php_use(line: &str, offset: usize, out: &mut Vec<ImportOccurrence>) {
    let Some(rest) = line.strip_prefix("use ") else {
        return;
    };
    let path = rest.trim().trim_end_matches(';').trim();
    if path.is_empty() {
        return;
    }
    let (path, local) = match path.split_once(" as ") {
        Some((p, l)) => (p.trim(), l.trim()),
        None => (path, path.rsplit('\\').next().unwrap_or(path)),
    };
    let module = path.rsplit_once('\\').map(|(m, _)| m).unwrap_or("");
    push_import(out, offset, line, local, module, None);
}
