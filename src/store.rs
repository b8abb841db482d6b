//! Storage layer: entity tables, FTS provisioning, and vector search.
//!
//! Owns the SQLite database under `.viberag/`. Four entity tables (symbols,
//! chunks, files, refs) carry the extracted facts; each full-text-searchable
//! column gets an FTS5 shadow table named `<table>_fts_<column>` maintained
//! alongside upserts and deletes. Embedding vectors are stored as
//! little-endian `f32` BLOBs and searched with a brute-force cosine scan.
//!
//! Note: the cosine scan is O(rows × dims). For repositories beyond a few
//! hundred thousand rows an ANN index would be the next step.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::{
    ChunkKind, ChunkRow, FileRow, RefKind, RefRow, SymbolKind, SymbolRow, TokenFacts,
};

/// FTS tokenizer selection, compiled to an FTS5 tokenizer clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtsTokenizer {
    /// Plain unicode61 word tokens.
    Simple,
    /// Word tokens that keep identifier underscores intact.
    Whitespace,
    /// Substring matching via trigrams; `prefix_only` adds prefix indexes.
    Ngram { min: usize, max: usize, prefix_only: bool },
}

/// Options for [`Store::ensure_fts_index`].
#[derive(Debug, Clone)]
pub struct FtsOptions {
    pub tokenizer: FtsTokenizer,
    pub lowercase: bool,
}

impl FtsOptions {
    pub fn simple() -> Self {
        Self {
            tokenizer: FtsTokenizer::Simple,
            lowercase: true,
        }
    }
    pub fn whitespace() -> Self {
        Self {
            tokenizer: FtsTokenizer::Whitespace,
            lowercase: true,
        }
    }
    pub fn ngram(min: usize, max: usize, prefix_only: bool) -> Self {
        Self {
            tokenizer: FtsTokenizer::Ngram { min, max, prefix_only },
            lowercase: true,
        }
    }

    fn tokenizer_clause(&self) -> String {
        match &self.tokenizer {
            FtsTokenizer::Simple => "tokenize = 'unicode61'".to_string(),
            FtsTokenizer::Whitespace => "tokenize = \"unicode61 tokenchars '_'\"".to_string(),
            // FTS5's trigram tokenizer provides substring and prefix
            // matching; n-gram bounds beyond 3 are satisfied by phrase
            // queries over trigrams.
            FtsTokenizer::Ngram { .. } => "tokenize = 'trigram'".to_string(),
        }
    }
}

fn name_ngram() -> FtsOptions {
    FtsOptions::ngram(2, 8, true)
}
fn qualname_ngram() -> FtsOptions {
    FtsOptions::ngram(2, 12, true)
}
fn code_ngram() -> FtsOptions {
    FtsOptions::ngram(3, 3, false)
}

/// The FTS shadow tables maintained for each entity table, with the
/// tokenizer each one is provisioned with.
fn fts_columns(table: &str) -> &'static [(&'static str, fn() -> FtsOptions)] {
    match table {
        "symbols" => &[
            ("symbol_name", name_ngram),
            ("qualname", qualname_ngram),
            ("identifiers_text", FtsOptions::whitespace),
        ],
        "chunks" => &[
            ("identifiers_text", FtsOptions::whitespace),
            ("search_text", FtsOptions::simple),
            ("code_text", code_ngram),
        ],
        "files" => &[("file_summary_text", FtsOptions::simple)],
        "refs" => &[("token_text", FtsOptions::whitespace)],
        _ => &[],
    }
}

fn fts_table_name(table: &str, column: &str) -> String {
    format!("{}_fts_{}", table, column)
}

/// Primary key column per entity table.
fn pk_column(table: &str) -> &'static str {
    match table {
        "symbols" => "symbol_id",
        "chunks" => "chunk_id",
        "files" => "file_id",
        "refs" => "ref_id",
        other => panic!("unknown entity table: {}", other),
    }
}

/// Per-table delete counts returned by [`Store::delete_all_rows_for_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerTableCounts {
    pub symbols: u64,
    pub chunks: u64,
    pub files: u64,
    pub refs: u64,
}

impl PerTableCounts {
    pub fn total(&self) -> u64 {
        self.symbols + self.chunks + self.files + self.refs
    }
}

/// One candidate from an FTS or vector channel, pre-hydration.
#[derive(Debug, Clone)]
pub struct ChannelCandidate {
    pub id: String,
    pub file_path: String,
    pub raw_score: f64,
}

/// Encode a float vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; `0.0` for mismatched or empty vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Storage handle. Cloneable; the pool is internally reference-counted.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the index database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Store> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| Error::Internal(e.into()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Store { pool })
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Store> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Internal(e.into()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Store { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create all tables and FTS indexes. Idempotent. `dims` records the
    /// active vector dimensionality; a mismatch against a previously
    /// provisioned value is an error directing to a forced reindex.
    pub async fn init_schema(&self, dims: usize) -> Result<()> {
        self.create_entity_tables().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_cache (
                input_hash TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT value FROM meta WHERE key = 'vector_dims'")
                .fetch_optional(&self.pool)
                .await?;
        match existing {
            Some(v) if v != dims.to_string() => {
                return Err(Error::ReindexRequired {
                    current: v.parse().unwrap_or(0),
                    required: dims as u32,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO meta (key, value) VALUES ('vector_dims', ?)")
                    .bind(dims.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn create_entity_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbols (
                symbol_id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                file_path TEXT NOT NULL,
                extension TEXT NOT NULL,
                language_hint TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                symbol_kind TEXT NOT NULL,
                symbol_name TEXT NOT NULL,
                qualname TEXT NOT NULL,
                parent_symbol_id TEXT,
                signature TEXT,
                docstring TEXT,
                is_exported INTEGER NOT NULL,
                decorator_names TEXT NOT NULL DEFAULT '[]',
                context_header TEXT NOT NULL,
                code_text TEXT NOT NULL,
                search_text TEXT NOT NULL,
                identifiers_text TEXT NOT NULL DEFAULT '',
                facts TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                embed_hash TEXT NOT NULL,
                vec_summary BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                repo_id TEXT NOT NULL,
                revision TEXT NOT NULL,
                file_path TEXT NOT NULL,
                extension TEXT NOT NULL,
                language_hint TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                owner_symbol_id TEXT,
                chunk_kind TEXT NOT NULL,
                context_header TEXT NOT NULL,
                code_text TEXT NOT NULL,
                search_text TEXT NOT NULL,
                identifiers_text TEXT NOT NULL DEFAULT '',
                facts TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                embed_hash TEXT NOT NULL,
                vec_code BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                extension TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                imports TEXT NOT NULL DEFAULT '[]',
                exports TEXT NOT NULL DEFAULT '[]',
                top_level_doc TEXT,
                file_summary_text TEXT NOT NULL,
                embed_hash TEXT NOT NULL,
                vec_file BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS refs (
                ref_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                extension TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                ref_kind TEXT NOT NULL,
                token_text TEXT NOT NULL,
                context_snippet TEXT NOT NULL,
                module_name TEXT,
                imported_name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for table in ["symbols", "chunks", "files", "refs"] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_file_path ON {t}(file_path)",
                t = table
            ))
            .execute(&self.pool)
            .await?;

            for (column, options) in fts_columns(table) {
                self.ensure_fts_index(table, column, &options()).await?;
            }
        }

        Ok(())
    }

    /// Idempotently create the FTS5 shadow table for one column.
    pub async fn ensure_fts_index(
        &self,
        table: &str,
        column: &str,
        options: &FtsOptions,
    ) -> Result<()> {
        let name = fts_table_name(table, column);
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(&name)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            return Ok(());
        }

        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {name} USING fts5(id UNINDEXED, {column}, {tok})",
            name = name,
            column = column,
            tok = options.tokenizer_clause(),
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Upserts
    // ═══════════════════════════════════════════════════════════════════

    pub async fn upsert_symbols(&self, rows: &[SymbolRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            delete_fts_entries(&mut tx, "symbols", &row.symbol_id).await?;
            sqlx::query("DELETE FROM symbols WHERE symbol_id = ?")
                .bind(&row.symbol_id)
                .execute(&mut *tx)
                .await?;

            let identifiers_text = row.facts.identifiers.join(" ");
            sqlx::query(
                r#"
                INSERT INTO symbols (
                    symbol_id, repo_id, revision, file_path, extension, language_hint,
                    start_line, end_line, start_byte, end_byte,
                    symbol_kind, symbol_name, qualname, parent_symbol_id,
                    signature, docstring, is_exported, decorator_names,
                    context_header, code_text, search_text, identifiers_text,
                    facts, content_hash, file_hash, embed_hash, vec_summary
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.symbol_id)
            .bind(&row.repo_id)
            .bind(&row.revision)
            .bind(&row.file_path)
            .bind(&row.extension)
            .bind(&row.language_hint)
            .bind(row.start_line)
            .bind(row.end_line)
            .bind(row.start_byte)
            .bind(row.end_byte)
            .bind(row.symbol_kind.as_str())
            .bind(&row.symbol_name)
            .bind(&row.qualname)
            .bind(&row.parent_symbol_id)
            .bind(&row.signature)
            .bind(&row.docstring)
            .bind(row.is_exported as i64)
            .bind(serde_json::to_string(&row.decorator_names)?)
            .bind(&row.context_header)
            .bind(&row.code_text)
            .bind(&row.search_text)
            .bind(&identifiers_text)
            .bind(serde_json::to_string(&row.facts)?)
            .bind(&row.content_hash)
            .bind(&row.file_hash)
            .bind(&row.embed_hash)
            .bind(vec_to_blob(&row.vec_summary))
            .execute(&mut *tx)
            .await?;

            insert_fts_entry(&mut tx, "symbols", "symbol_name", &row.symbol_id, &row.symbol_name)
                .await?;
            insert_fts_entry(&mut tx, "symbols", "qualname", &row.symbol_id, &row.qualname)
                .await?;
            insert_fts_entry(
                &mut tx,
                "symbols",
                "identifiers_text",
                &row.symbol_id,
                &identifiers_text,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn upsert_chunks(&self, rows: &[ChunkRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            delete_fts_entries(&mut tx, "chunks", &row.chunk_id).await?;
            sqlx::query("DELETE FROM chunks WHERE chunk_id = ?")
                .bind(&row.chunk_id)
                .execute(&mut *tx)
                .await?;

            let identifiers_text = row.facts.identifiers.join(" ");
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    chunk_id, repo_id, revision, file_path, extension, language_hint,
                    start_line, end_line, start_byte, end_byte,
                    owner_symbol_id, chunk_kind, context_header, code_text,
                    search_text, identifiers_text, facts, content_hash,
                    file_hash, embed_hash, vec_code
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.chunk_id)
            .bind(&row.repo_id)
            .bind(&row.revision)
            .bind(&row.file_path)
            .bind(&row.extension)
            .bind(&row.language_hint)
            .bind(row.start_line)
            .bind(row.end_line)
            .bind(row.start_byte)
            .bind(row.end_byte)
            .bind(&row.owner_symbol_id)
            .bind(row.chunk_kind.as_str())
            .bind(&row.context_header)
            .bind(&row.code_text)
            .bind(&row.search_text)
            .bind(&identifiers_text)
            .bind(serde_json::to_string(&row.facts)?)
            .bind(&row.content_hash)
            .bind(&row.file_hash)
            .bind(&row.embed_hash)
            .bind(vec_to_blob(&row.vec_code))
            .execute(&mut *tx)
            .await?;

            insert_fts_entry(
                &mut tx,
                "chunks",
                "identifiers_text",
                &row.chunk_id,
                &identifiers_text,
            )
            .await?;
            insert_fts_entry(&mut tx, "chunks", "search_text", &row.chunk_id, &row.search_text)
                .await?;
            insert_fts_entry(&mut tx, "chunks", "code_text", &row.chunk_id, &row.code_text)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn upsert_files(&self, rows: &[FileRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            delete_fts_entries(&mut tx, "files", &row.file_id).await?;
            sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(&row.file_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO files (
                    file_id, file_path, extension, file_hash, imports, exports,
                    top_level_doc, file_summary_text, embed_hash, vec_file
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.file_id)
            .bind(&row.file_path)
            .bind(&row.extension)
            .bind(&row.file_hash)
            .bind(serde_json::to_string(&row.imports)?)
            .bind(serde_json::to_string(&row.exports)?)
            .bind(&row.top_level_doc)
            .bind(&row.file_summary_text)
            .bind(&row.embed_hash)
            .bind(vec_to_blob(&row.vec_file))
            .execute(&mut *tx)
            .await?;

            insert_fts_entry(
                &mut tx,
                "files",
                "file_summary_text",
                &row.file_id,
                &row.file_summary_text,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn upsert_refs(&self, rows: &[RefRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            delete_fts_entries(&mut tx, "refs", &row.ref_id).await?;
            sqlx::query("DELETE FROM refs WHERE ref_id = ?")
                .bind(&row.ref_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO refs (
                    ref_id, file_path, extension, file_hash, start_line,
                    start_byte, end_byte, ref_kind, token_text,
                    context_snippet, module_name, imported_name
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.ref_id)
            .bind(&row.file_path)
            .bind(&row.extension)
            .bind(&row.file_hash)
            .bind(row.start_line)
            .bind(row.start_byte)
            .bind(row.end_byte)
            .bind(row.ref_kind.as_str())
            .bind(&row.token_text)
            .bind(&row.context_snippet)
            .bind(&row.module_name)
            .bind(&row.imported_name)
            .execute(&mut *tx)
            .await?;

            insert_fts_entry(&mut tx, "refs", "token_text", &row.ref_id, &row.token_text)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Deletes and resets
    // ═══════════════════════════════════════════════════════════════════

    /// Remove every row for a file path across all four tables and their
    /// FTS shadows, in one transaction.
    pub async fn delete_all_rows_for_file(&self, file_path: &str) -> Result<PerTableCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = PerTableCounts::default();

        for table in ["symbols", "chunks", "files", "refs"] {
            let pk = pk_column(table);
            for (column, _) in fts_columns(table) {
                sqlx::query(&format!(
                    "DELETE FROM {fts} WHERE id IN (SELECT {pk} FROM {t} WHERE file_path = ?)",
                    fts = fts_table_name(table, column),
                    pk = pk,
                    t = table
                ))
                .bind(file_path)
                .execute(&mut *tx)
                .await?;
            }
            let result = sqlx::query(&format!("DELETE FROM {} WHERE file_path = ?", table))
                .bind(file_path)
                .execute(&mut *tx)
                .await?;
            let n = result.rows_affected();
            match table {
                "symbols" => counts.symbols = n,
                "chunks" => counts.chunks = n,
                "files" => counts.files = n,
                _ => counts.refs = n,
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Record a new vector dimensionality (forced reindex path).
    pub async fn set_vector_dims(&self, dims: usize) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('vector_dims', ?)")
            .bind(dims.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop and recreate the entity tables and their FTS shadows (force
    /// mode). The embedding cache survives.
    pub async fn reset_entity_tables(&self) -> Result<()> {
        for table in ["symbols", "chunks", "files", "refs"] {
            for (column, _) in fts_columns(table) {
                sqlx::query(&format!(
                    "DROP TABLE IF EXISTS {}",
                    fts_table_name(table, column)
                ))
                .execute(&self.pool)
                .await?;
            }
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await?;
        }
        self.create_entity_tables().await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Embedding cache
    // ═══════════════════════════════════════════════════════════════════

    /// Bulk cache lookup; absent hashes are simply missing from the map.
    pub async fn get_cached_embeddings(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut out = HashMap::new();
        for batch in hashes.chunks(400) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT input_hash, vector FROM embedding_cache WHERE input_hash IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for hash in batch {
                query = query.bind(hash);
            }
            for row in query.fetch_all(&self.pool).await? {
                let hash: String = row.get("input_hash");
                let blob: Vec<u8> = row.get("vector");
                out.insert(hash, blob_to_vec(&blob));
            }
        }
        Ok(out)
    }

    /// Purge every cached vector. Used when the provider dimensionality
    /// changes, which invalidates the whole cache.
    pub async fn clear_embedding_cache(&self) -> Result<()> {
        sqlx::query("DELETE FROM embedding_cache")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bulk insert; the cache is append-only within a revision.
    pub async fn cache_embeddings(&self, rows: &[(String, Vec<f32>)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (hash, vector) in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO embedding_cache (input_hash, vector, created_at) VALUES (?, ?, ?)",
            )
            .bind(hash)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Retrieval channels
    // ═══════════════════════════════════════════════════════════════════

    /// BM25-ranked full-text search over one provisioned FTS column.
    /// `scope_sql` is a pre-compiled predicate over the entity alias `e`
    /// (or empty).
    pub async fn fts_search(
        &self,
        table: &str,
        column: &str,
        match_expr: &str,
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelCandidate>> {
        if match_expr.trim().is_empty() {
            return Ok(Vec::new());
        }
        let fts = fts_table_name(table, column);
        let pk = pk_column(table);
        let scope = if scope_sql.is_empty() {
            String::new()
        } else {
            format!("AND {}", scope_sql)
        };

        let sql = format!(
            r#"
            SELECT f.id AS id, f.rank AS rank, e.file_path AS file_path
            FROM {fts} f
            JOIN {table} e ON e.{pk} = f.id
            WHERE f.{column} MATCH ? {scope}
            ORDER BY rank
            LIMIT ?
            "#,
            fts = fts,
            table = table,
            pk = pk,
            column = column,
            scope = scope,
        );

        let rows = match sqlx::query(&sql)
            .bind(match_expr)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            // A syntactically hostile MATCH expression is a miss, not a
            // failure.
            Err(sqlx::Error::Database(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChannelCandidate {
                    id: row.get("id"),
                    file_path: row.get("file_path"),
                    // FTS5 rank is negative-is-better; negate to a positive
                    // score.
                    raw_score: -rank,
                }
            })
            .collect())
    }

    /// Brute-force cosine scan over one vector column.
    pub async fn vector_search(
        &self,
        table: &str,
        vec_column: &str,
        query_vec: &[f32],
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelCandidate>> {
        if query_vec.is_empty() {
            return Ok(Vec::new());
        }
        let pk = pk_column(table);
        let scope = if scope_sql.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", scope_sql)
        };
        let sql = format!(
            "SELECT e.{pk} AS id, e.file_path AS file_path, e.{col} AS vec FROM {table} e {scope}",
            pk = pk,
            col = vec_column,
            table = table,
            scope = scope,
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut candidates: Vec<ChannelCandidate> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("vec");
                if blob.is_empty() {
                    return None;
                }
                let vec = blob_to_vec(&blob);
                let similarity = cosine_similarity(query_vec, &vec) as f64;
                Some(ChannelCandidate {
                    id: row.get("id"),
                    file_path: row.get("file_path"),
                    raw_score: similarity,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Hydration and navigation queries
    // ═══════════════════════════════════════════════════════════════════

    pub async fn get_symbols_by_ids(&self, ids: &[String]) -> Result<Vec<SymbolRow>> {
        self.fetch_by_ids("symbols", ids, symbol_from_row).await
    }

    pub async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<ChunkRow>> {
        self.fetch_by_ids("chunks", ids, chunk_from_row).await
    }

    pub async fn get_files_by_ids(&self, ids: &[String]) -> Result<Vec<FileRow>> {
        self.fetch_by_ids("files", ids, file_from_row).await
    }

    pub async fn get_refs_by_ids(&self, ids: &[String]) -> Result<Vec<RefRow>> {
        self.fetch_by_ids("refs", ids, ref_from_row).await
    }

    async fn fetch_by_ids<T>(
        &self,
        table: &str,
        ids: &[String],
        from_row: fn(&sqlx::sqlite::SqliteRow) -> T,
    ) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let pk = pk_column(table);
        let mut out = Vec::with_capacity(ids.len());
        for batch in ids.chunks(400) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT * FROM {} WHERE {} IN ({})",
                table, pk, placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in batch {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                out.push(from_row(&row));
            }
        }
        Ok(out)
    }

    pub async fn get_symbol(&self, symbol_id: &str) -> Result<Option<SymbolRow>> {
        Ok(self
            .get_symbols_by_ids(&[symbol_id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    pub async fn symbols_in_file(&self, file_path: &str, limit: usize) -> Result<Vec<SymbolRow>> {
        let rows = sqlx::query("SELECT * FROM symbols WHERE file_path = ? ORDER BY start_line LIMIT ?")
            .bind(file_path)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(symbol_from_row).collect())
    }

    pub async fn chunks_in_file(&self, file_path: &str, limit: usize) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE file_path = ? ORDER BY start_line LIMIT ?")
            .bind(file_path)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    pub async fn chunks_owned_by(&self, symbol_id: &str, limit: usize) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE owner_symbol_id = ? ORDER BY start_line LIMIT ?",
        )
        .bind(symbol_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    pub async fn file_by_path(&self, file_path: &str) -> Result<Option<FileRow>> {
        let row = sqlx::query("SELECT * FROM files WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    /// Row count per entity table for one file path (tests and status).
    pub async fn count_rows_for_file(&self, file_path: &str) -> Result<PerTableCounts> {
        let mut counts = PerTableCounts::default();
        for table in ["symbols", "chunks", "files", "refs"] {
            let n: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE file_path = ?", table))
                    .bind(file_path)
                    .fetch_one(&self.pool)
                    .await?;
            match table {
                "symbols" => counts.symbols = n as u64,
                "chunks" => counts.chunks = n as u64,
                "files" => counts.files = n as u64,
                _ => counts.refs = n as u64,
            }
        }
        Ok(counts)
    }

    pub async fn table_counts(&self) -> Result<PerTableCounts> {
        let mut counts = PerTableCounts::default();
        for table in ["symbols", "chunks", "files", "refs"] {
            let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
            match table {
                "symbols" => counts.symbols = n as u64,
                "chunks" => counts.chunks = n as u64,
                "files" => counts.files = n as u64,
                _ => counts.refs = n as u64,
            }
        }
        Ok(counts)
    }

    /// All symbols, for the eval harness's query generation.
    pub async fn sample_symbols(&self, limit: usize) -> Result<Vec<SymbolRow>> {
        let rows = sqlx::query("SELECT * FROM symbols ORDER BY symbol_id LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(symbol_from_row).collect())
    }
}

async fn delete_fts_entries(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    id: &str,
) -> Result<()> {
    for (column, _) in fts_columns(table) {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ?",
            fts_table_name(table, column)
        ))
        .bind(id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_fts_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    column: &str,
    id: &str,
    value: &str,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} (id, {}) VALUES (?, ?)",
        fts_table_name(table, column),
        column
    ))
    .bind(id)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════

fn parse_kind(s: &str) -> SymbolKind {
    match s {
        "method" => SymbolKind::Method,
        "class" => SymbolKind::Class,
        _ => SymbolKind::Function,
    }
}

fn parse_chunk_kind(s: &str) -> ChunkKind {
    match s {
        "markdown_section" => ChunkKind::MarkdownSection,
        "statement_group" => ChunkKind::StatementGroup,
        _ => ChunkKind::Block,
    }
}

fn parse_ref_kind(s: &str) -> RefKind {
    match s {
        "import" => RefKind::Import,
        "call" => RefKind::Call,
        "string_literal" => RefKind::StringLiteral,
        _ => RefKind::Identifier,
    }
}

fn json_list(s: String) -> Vec<String> {
    serde_json::from_str(&s).unwrap_or_default()
}

fn symbol_from_row(row: &sqlx::sqlite::SqliteRow) -> SymbolRow {
    let kind: String = row.get("symbol_kind");
    let facts_json: String = row.get("facts");
    let blob: Vec<u8> = row.get("vec_summary");
    SymbolRow {
        symbol_id: row.get("symbol_id"),
        repo_id: row.get("repo_id"),
        revision: row.get("revision"),
        file_path: row.get("file_path"),
        extension: row.get("extension"),
        language_hint: row.get("language_hint"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        symbol_kind: parse_kind(&kind),
        symbol_name: row.get("symbol_name"),
        qualname: row.get("qualname"),
        parent_symbol_id: row.get("parent_symbol_id"),
        signature: row.get("signature"),
        docstring: row.get("docstring"),
        is_exported: row.get::<i64, _>("is_exported") != 0,
        decorator_names: json_list(row.get("decorator_names")),
        context_header: row.get("context_header"),
        code_text: row.get("code_text"),
        search_text: row.get("search_text"),
        facts: serde_json::from_str::<TokenFacts>(&facts_json).unwrap_or_default(),
        content_hash: row.get("content_hash"),
        file_hash: row.get("file_hash"),
        embed_hash: row.get("embed_hash"),
        vec_summary: blob_to_vec(&blob),
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> ChunkRow {
    let kind: String = row.get("chunk_kind");
    let facts_json: String = row.get("facts");
    let blob: Vec<u8> = row.get("vec_code");
    ChunkRow {
        chunk_id: row.get("chunk_id"),
        repo_id: row.get("repo_id"),
        revision: row.get("revision"),
        file_path: row.get("file_path"),
        extension: row.get("extension"),
        language_hint: row.get("language_hint"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        owner_symbol_id: row.get("owner_symbol_id"),
        chunk_kind: parse_chunk_kind(&kind),
        context_header: row.get("context_header"),
        code_text: row.get("code_text"),
        search_text: row.get("search_text"),
        facts: serde_json::from_str::<TokenFacts>(&facts_json).unwrap_or_default(),
        content_hash: row.get("content_hash"),
        file_hash: row.get("file_hash"),
        embed_hash: row.get("embed_hash"),
        vec_code: blob_to_vec(&blob),
    }
}

fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> FileRow {
    let blob: Vec<u8> = row.get("vec_file");
    FileRow {
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        extension: row.get("extension"),
        file_hash: row.get("file_hash"),
        imports: json_list(row.get("imports")),
        exports: json_list(row.get("exports")),
        top_level_doc: row.get("top_level_doc"),
        file_summary_text: row.get("file_summary_text"),
        embed_hash: row.get("embed_hash"),
        vec_file: blob_to_vec(&blob),
    }
}

fn ref_from_row(row: &sqlx::sqlite::SqliteRow) -> RefRow {
    let kind: String = row.get("ref_kind");
    RefRow {
        ref_id: row.get("ref_id"),
        file_path: row.get("file_path"),
        extension: row.get("extension"),
        file_hash: row.get("file_hash"),
        start_line: row.get("start_line"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        ref_kind: parse_ref_kind(&kind),
        token_text: row.get("token_text"),
        context_snippet: row.get("context_snippet"),
        module_name: row.get("module_name"),
        imported_name: row.get("imported_name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stable_id;

    fn sample_symbol(id: &str, path: &str, name: &str) -> SymbolRow {
        SymbolRow {
            symbol_id: id.to_string(),
            repo_id: "repo".to_string(),
            revision: "rev".to_string(),
            file_path: path.to_string(),
            extension: "py".to_string(),
            language_hint: "python".to_string(),
            start_line: 1,
            end_line: 2,
            start_byte: 0,
            end_byte: 10,
            symbol_kind: SymbolKind::Function,
            symbol_name: name.to_string(),
            qualname: name.to_string(),
            parent_symbol_id: None,
            signature: Some(format!("def {}():", name)),
            docstring: None,
            is_exported: true,
            decorator_names: vec![],
            context_header: format!("// File: {}", path),
            code_text: format!("def {}(): pass", name),
            search_text: name.to_string(),
            facts: TokenFacts {
                identifiers: vec![name.to_string()],
                ..Default::default()
            },
            content_hash: stable_id(&[name]),
            file_hash: "fh".to_string(),
            embed_hash: stable_id(&[name, "embed"]),
            vec_summary: vec![0.5, 0.5],
        }
    }

    fn sample_ref(id: &str, path: &str, token: &str) -> RefRow {
        RefRow {
            ref_id: id.to_string(),
            file_path: path.to_string(),
            extension: "py".to_string(),
            file_hash: "fh".to_string(),
            start_line: 1,
            start_byte: 0,
            end_byte: token.len() as i64,
            ref_kind: RefKind::Call,
            token_text: token.to_string(),
            context_snippet: format!("{}()", token),
            module_name: None,
            imported_name: None,
        }
    }

    async fn store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.init_schema(2).await.unwrap();
        store
    }

    #[test]
    fn blob_round_trip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let store = store().await;
        store.init_schema(2).await.unwrap();
    }

    #[tokio::test]
    async fn dims_mismatch_requires_reindex() {
        let store = store().await;
        let err = store.init_schema(3).await.unwrap_err();
        assert!(matches!(err, Error::ReindexRequired { .. }));
    }

    #[tokio::test]
    async fn upsert_is_delete_then_insert() {
        let store = store().await;
        let mut sym = sample_symbol("s1", "a.py", "add");
        store.upsert_symbols(&[sym.clone()]).await.unwrap();

        sym.docstring = Some("updated".to_string());
        store.upsert_symbols(&[sym.clone()]).await.unwrap();

        let rows = store.get_symbols_by_ids(&["s1".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].docstring.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn delete_all_rows_for_file_zeroes_every_table() {
        let store = store().await;
        store
            .upsert_symbols(&[sample_symbol("s1", "a.py", "add")])
            .await
            .unwrap();
        store
            .upsert_refs(&[sample_ref("r1", "a.py", "add")])
            .await
            .unwrap();
        store
            .upsert_symbols(&[sample_symbol("s2", "b.py", "keep")])
            .await
            .unwrap();

        let counts = store.delete_all_rows_for_file("a.py").await.unwrap();
        assert_eq!(counts.symbols, 1);
        assert_eq!(counts.refs, 1);

        let after = store.count_rows_for_file("a.py").await.unwrap();
        assert_eq!(after.total(), 0);

        // Unrelated file untouched.
        let keep = store.count_rows_for_file("b.py").await.unwrap();
        assert_eq!(keep.symbols, 1);
    }

    #[tokio::test]
    async fn fts_search_finds_symbol_names() {
        let store = store().await;
        store
            .upsert_symbols(&[
                sample_symbol("s1", "a.py", "fetch_data"),
                sample_symbol("s2", "b.py", "render_view"),
            ])
            .await
            .unwrap();

        let hits = store
            .fts_search("symbols", "identifiers_text", "fetch_data", 10, "")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "s1");
        assert!(hits[0].raw_score.is_finite());
    }

    #[tokio::test]
    async fn fts_search_respects_scope() {
        let store = store().await;
        store
            .upsert_symbols(&[
                sample_symbol("s1", "src/a.py", "handler"),
                sample_symbol("s2", "vendor/b.py", "handler"),
            ])
            .await
            .unwrap();

        let hits = store
            .fts_search(
                "symbols",
                "identifiers_text",
                "handler",
                10,
                "e.file_path LIKE 'src/%' ESCAPE '\\'",
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "src/a.py");
    }

    #[tokio::test]
    async fn hostile_match_expression_is_empty_not_error() {
        let store = store().await;
        let hits = store
            .fts_search("symbols", "symbol_name", "\"unbalanced", 10, "")
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let store = store().await;
        let mut near = sample_symbol("near", "a.py", "near");
        near.vec_summary = vec![1.0, 0.0];
        let mut far = sample_symbol("far", "b.py", "far");
        far.vec_summary = vec![0.0, 1.0];
        store.upsert_symbols(&[near, far]).await.unwrap();

        let hits = store
            .vector_search("symbols", "vec_summary", &[1.0, 0.1], 10, "")
            .await
            .unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].raw_score > hits[1].raw_score);
    }

    #[tokio::test]
    async fn embedding_cache_round_trips() {
        let store = store().await;
        store
            .cache_embeddings(&[
                ("h1".to_string(), vec![0.1, 0.2]),
                ("h2".to_string(), vec![0.3, 0.4]),
            ])
            .await
            .unwrap();

        let found = store
            .get_cached_embeddings(&["h1".to_string(), "h2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["h1"], vec![0.1, 0.2]);
        assert!(!found.contains_key("missing"));
    }

    #[tokio::test]
    async fn reset_entity_tables_clears_rows_but_keeps_cache() {
        let store = store().await;
        store
            .upsert_symbols(&[sample_symbol("s1", "a.py", "add")])
            .await
            .unwrap();
        store
            .cache_embeddings(&[("h1".to_string(), vec![0.1])])
            .await
            .unwrap();

        store.reset_entity_tables().await.unwrap();

        assert_eq!(store.table_counts().await.unwrap().total(), 0);
        let cache = store
            .get_cached_embeddings(&["h1".to_string()])
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn ensure_fts_index_is_idempotent() {
        let store = store().await;
        store
            .ensure_fts_index("symbols", "symbol_name", &FtsOptions::ngram(2, 8, true))
            .await
            .unwrap();
        store
            .ensure_fts_index("symbols", "symbol_name", &FtsOptions::ngram(2, 8, true))
            .await
            .unwrap();
    }
}
