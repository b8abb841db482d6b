mod common;

use common::{fixture, index};

use viberag::model::SearchHit;
use viberag::search::intent::Intent;
use viberag::search::scope::Scope;
use viberag::search::SearchRequest;

fn all_hits(response: &viberag::model::SearchResponse) -> Vec<&SearchHit> {
    response
        .groups
        .definitions
        .iter()
        .chain(response.groups.usages.iter())
        .chain(response.groups.files.iter())
        .chain(response.groups.blocks.iter())
        .collect()
}

#[tokio::test]
async fn semantic_search_finds_the_math_module() {
    let (_tmp, engine) = fixture(&[
        ("codebase/math.py", "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n"),
        ("codebase/io.py", "def read_file(path):\n    return open(path).read()\n"),
    ])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "add two numbers calculate sum".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.intent_used, "concept");
    assert!(
        all_hits(&response)
            .iter()
            .any(|h| h.file_path.ends_with("math.py")),
        "expected a hit ending in math.py, got {:?}",
        all_hits(&response)
            .iter()
            .map(|h| &h.file_path)
            .collect::<Vec<_>>()
    );
    engine.close().await;
}

#[tokio::test]
async fn definition_lookup_finds_exported_class_with_boost() {
    let (_tmp, engine) = fixture(&[
        (
            "http_client.ts",
            "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n",
        ),
        ("other.ts", "export const unrelated = 1;\n"),
    ])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "HttpClient".to_string(),
            intent: Some(Intent::Definition),
            explain: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.intent_used, "definition");
    let hit = response
        .groups
        .definitions
        .iter()
        .find(|h| h.file_path.ends_with("http_client.ts"))
        .expect("definition hit in http_client.ts");
    assert!(hit.title.contains("HttpClient"));

    let why = hit.why.as_ref().expect("explain record requested");
    assert!(
        why.priors.iter().any(|p| p.name == "export_boost"),
        "exported class should carry the export boost, got {:?}",
        why.priors
    );
    assert!(!why.channels.is_empty());
    engine.close().await;
}

#[tokio::test]
async fn auto_routing_treats_camel_case_as_definition() {
    let (_tmp, engine) = fixture(&[(
        "http_client.ts",
        "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n",
    )])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "HttpClient".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.intent_used, "definition");
    engine.close().await;
}

#[tokio::test]
async fn find_usages_groups_by_file() {
    let (_tmp, engine) = fixture(&[
        (
            "http_client.ts",
            "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n",
        ),
        (
            "src/services/http.ts",
            "import { HttpClient } from '../../http_client';\n\nexport const client = new HttpClient();\n",
        ),
    ])
    .await;
    index(&engine).await;

    let usages = engine
        .find_usages(None, Some("HttpClient"), &Scope::default(), 20)
        .await
        .unwrap();

    assert_eq!(usages.symbol_name, "HttpClient");
    assert!(usages.total_refs > 0);
    let service_file = usages
        .by_file
        .iter()
        .find(|g| g.file_path == "src/services/http.ts")
        .expect("usages grouped under src/services/http.ts");
    assert!(service_file
        .refs
        .iter()
        .all(|r| r.token_text == "HttpClient"));

    // Within a file, refs are ordered by line.
    for group in &usages.by_file {
        let lines: Vec<i64> = group.refs.iter().map(|r| r.start_line).collect();
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
    }
    engine.close().await;
}

#[tokio::test]
async fn find_usages_by_symbol_id_resolves_the_name() {
    let (_tmp, engine) = fixture(&[
        ("lib.py", "def fetch_data(url):\n    return url\n"),
        ("app.py", "from lib import fetch_data\n\nresult = fetch_data('x')\n"),
    ])
    .await;
    index(&engine).await;

    let symbol = engine
        .store()
        .sample_symbols(10)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.symbol_name == "fetch_data")
        .unwrap();

    let usages = engine
        .find_usages(Some(&symbol.symbol_id), None, &Scope::default(), 20)
        .await
        .unwrap();
    assert_eq!(usages.symbol_name, "fetch_data");
    assert!(usages.by_file.iter().any(|g| g.file_path == "app.py"));
    engine.close().await;
}

#[tokio::test]
async fn exact_text_finds_the_literal_line() {
    let (_tmp, engine) = fixture(&[
        (
            "errors.js",
            "const RETRYABLE = [\n  'ECONNRESET',\n  'ETIMEDOUT',\n];\nmodule.exports = { RETRYABLE };\n",
        ),
        ("other.js", "const x = 1;\n"),
    ])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "ECONNRESET".to_string(),
            intent: Some(Intent::ExactText),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.intent_used, "exact_text");
    let hit = response
        .groups
        .blocks
        .iter()
        .find(|h| h.file_path == "errors.js")
        .expect("blocks hit for the literal");
    assert!(hit.snippet.contains("ECONNRESET"));
    assert!(hit.start_line <= 2 && hit.end_line >= 2, "span covers the literal line");
    engine.close().await;
}

#[tokio::test]
async fn quoted_query_routes_to_exact_text() {
    let (_tmp, engine) = fixture(&[(
        "errors.js",
        "const code = 'ECONNRESET';\n",
    )])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "\"ECONNRESET\"".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.intent_used, "exact_text");
    assert!(!response.groups.blocks.is_empty());
    engine.close().await;
}

#[tokio::test]
async fn scope_filters_are_sound() {
    let (_tmp, engine) = fixture(&[
        ("src/handler.py", "def handle_request(req):\n    return req\n"),
        ("vendor/handler.py", "def handle_request(req):\n    return req\n"),
        ("src/handler.ts", "export function handleRequest(req) { return req; }\n"),
    ])
    .await;
    index(&engine).await;

    let scope = Scope {
        path_prefix: vec!["src/".to_string()],
        extension: vec!["py".to_string()],
        ..Default::default()
    };
    let response = engine
        .search(&SearchRequest {
            query: "handle_request".to_string(),
            intent: Some(Intent::Definition),
            scope: scope.clone(),
            ..Default::default()
        })
        .await
        .unwrap();

    let hits = all_hits(&response);
    assert!(!hits.is_empty());
    for hit in &hits {
        let ext = hit.file_path.rsplit('.').next().unwrap();
        assert!(
            scope.matches(&hit.file_path, ext),
            "hit {} violates scope",
            hit.file_path
        );
    }
    assert!(response
        .filters_applied
        .iter()
        .any(|f| f.starts_with("path_prefix:")));
    engine.close().await;
}

#[tokio::test]
async fn explain_false_suppresses_why_but_not_scoring() {
    let (_tmp, engine) = fixture(&[(
        "http_client.ts",
        "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n",
    )])
    .await;
    index(&engine).await;

    let request = SearchRequest {
        query: "HttpClient".to_string(),
        intent: Some(Intent::Definition),
        explain: false,
        ..Default::default()
    };
    let plain = engine.search(&request).await.unwrap();
    let explained = engine
        .search(&SearchRequest {
            explain: true,
            ..request
        })
        .await
        .unwrap();

    let plain_hit = &plain.groups.definitions[0];
    let explained_hit = &explained.groups.definitions[0];
    assert!(plain_hit.why.is_none());
    assert!(explained_hit.why.is_some());
    assert!((plain_hit.score - explained_hit.score).abs() < 1e-9);
    engine.close().await;
}

#[tokio::test]
async fn test_paths_rank_below_source_paths() {
    let (_tmp, engine) = fixture(&[
        ("src/parser.py", "def parse_config(text):\n    return text\n"),
        (
            "src/__tests__/parser.py",
            "def parse_config(text):\n    return text\n",
        ),
    ])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "parse_config".to_string(),
            intent: Some(Intent::Definition),
            explain: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let defs = &response.groups.definitions;
    let src_pos = defs.iter().position(|h| h.file_path == "src/parser.py");
    let test_pos = defs
        .iter()
        .position(|h| h.file_path == "src/__tests__/parser.py");
    if let (Some(s), Some(t)) = (src_pos, test_pos) {
        assert!(s < t, "source hit should outrank the test-path twin");
    }
    engine.close().await;
}

#[tokio::test]
async fn suggested_next_actions_follow_the_top_definition() {
    let (_tmp, engine) = fixture(&[(
        "http_client.ts",
        "export class HttpClient {\n  get(url: string) {\n    return fetch(url);\n  }\n}\n",
    )])
    .await;
    index(&engine).await;

    let response = engine
        .search(&SearchRequest {
            query: "HttpClient".to_string(),
            intent: Some(Intent::Definition),
            ..Default::default()
        })
        .await
        .unwrap();

    let tools: Vec<&str> = response
        .suggested_next_actions
        .iter()
        .map(|a| a.tool.as_str())
        .collect();
    assert!(tools.contains(&"getSymbol"));
    assert!(tools.contains(&"findUsages"));
    engine.close().await;
}

#[tokio::test]
async fn expand_context_returns_bounded_neighbors() {
    let (_tmp, engine) = fixture(&[(
        "shapes.py",
        "class Circle:\n    def area(self):\n        return 3\n\nclass Square:\n    def area(self):\n        return 4\n",
    )])
    .await;
    index(&engine).await;

    let circle = engine
        .store()
        .sample_symbols(20)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.qualname == "Circle")
        .unwrap();

    let expanded = engine
        .expand_context("symbols", &circle.symbol_id, 2)
        .await
        .unwrap();
    assert_eq!(expanded.file_path, "shapes.py");
    assert!(!expanded.symbols.is_empty());
    assert!(expanded.symbols.len() <= 2);
    assert!(expanded.symbols.iter().all(|n| n.id != circle.symbol_id));

    let err = engine
        .expand_context("nonsense", "id", 2)
        .await
        .unwrap_err();
    assert_eq!(err.wire_code(), "invalid_params");
    engine.close().await;
}

#[tokio::test]
async fn get_symbol_round_trips_row_fields() {
    let (_tmp, engine) = fixture(&[(
        "g.py",
        "class Greeter:\n    def greet(self):\n        \"\"\"Say hello.\"\"\"\n        return 'hi'\n",
    )])
    .await;
    index(&engine).await;

    let method = engine
        .store()
        .sample_symbols(10)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.qualname == "Greeter.greet")
        .unwrap();

    let fetched = engine.get_symbol(&method.symbol_id).await.unwrap().unwrap();
    assert_eq!(fetched.docstring.as_deref(), Some("Say hello."));
    assert!(fetched.parent_symbol_id.is_some());
    assert_eq!(fetched.file_path, "g.py");

    assert!(engine.get_symbol("nope").await.unwrap().is_none());
    engine.close().await;
}

#[tokio::test]
async fn eval_harness_produces_sane_metrics() {
    let (_tmp, engine) = fixture(&[
        ("math.py", "def add_numbers(a, b):\n    \"\"\"Add two numbers together.\"\"\"\n    return a + b\n"),
        ("text.py", "def format_text(s):\n    \"\"\"Format a text snippet for display.\"\"\"\n    return s.strip()\n"),
    ])
    .await;
    index(&engine).await;

    let report = viberag::eval::run_eval(&engine, viberag::eval::EvalOptions::default())
        .await
        .unwrap();
    assert!(report.queries > 0);
    assert!((0.0..=1.0).contains(&report.mrr));
    assert!((0.0..=1.0).contains(&report.recall_at_k));
    assert!((0.0..=1.0).contains(&report.hit_at_1));
    assert!(report.p95_ms >= report.p50_ms);
    // Name queries over distinctive identifiers should mostly land.
    assert!(report.recall_at_k > 0.0);
    engine.close().await;
}
