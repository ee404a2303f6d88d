//! Validated search / hallucination detection.
//!
//! A target script is parsed into its external symbol uses; each symbol is
//! scored by two channels:
//!
//! - **structural** — a graph lookup against parsed repositories
//!   (1.0 exact, 0.6 parameter disagreement, 0.3 name under a different
//!   parent, 0.0 absent);
//! - **semantic** — embed `qualified_name + context_line`, search the
//!   code-example collection (k = 5), take the best similarity.
//!
//! Fused confidence is `0.6·structural + 0.4·semantic`, clamped to `[0, 1]`.
//! `c >= 0.8` validates the symbol, `0.6 <= c < 0.8` is a warning, below
//! that is a critical hallucination.
//!
//! Structural lookups are cached per symbol (1 h TTL, LRU-capped), since the
//! same qualified name tends to recur across validations of related scripts.

pub mod ast;
pub mod graph;

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::Embedder;
use crate::error::ToolError;
use crate::rerank::Reranker;
use crate::store::VectorStore;

use ast::{SymbolKind, SymbolUse};
use graph::{GraphStore, Resolution};

const STRUCTURAL_WEIGHT: f64 = 0.6;
const SEMANTIC_WEIGHT: f64 = 0.4;
const VALIDATED_THRESHOLD: f64 = 0.8;
const WARNING_THRESHOLD: f64 = 0.6;
/// Fast mode skips the semantic channel above this structural score.
const FAST_SKIP_THRESHOLD: f64 = 0.9;

const CACHE_CAPACITY: u64 = 2048;
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Validation effort level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Graph only; semantic channel consulted only for inconclusive symbols.
    Fast,
    /// Both channels, joined in parallel.
    #[default]
    Balanced,
    /// Both channels sequentially (deterministic), reranked candidates.
    Thorough,
}

impl ValidationMode {
    pub fn parse(s: &str) -> Result<Self, ToolError> {
        match s {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            other => Err(ToolError::invalid_argument(format!(
                "unknown validation mode '{}': use fast, balanced, or thorough",
                other
            ))),
        }
    }
}

/// Classification of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Validated,
    Warning,
    Critical,
}

/// One finding in the validation report.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub line: usize,
    pub kind: &'static str,
    pub name: String,
    pub confidence: f64,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_signature: Option<String>,
    pub suggestions: Vec<String>,
}

/// Full validation report for one script.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub script_path: String,
    pub findings: Vec<Finding>,
    /// `1 - mean(confidence)`; 0.0 for a script with no external symbols.
    pub overall_risk: f64,
    pub validated_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
}

pub struct ValidationEngine {
    graph: Arc<dyn GraphStore>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    cache: moka::future::Cache<String, Arc<Resolution>>,
}

impl ValidationEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            graph,
            store,
            embedder,
            reranker,
            cache: moka::future::Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Validate a script on disk.
    pub async fn validate_script(
        &self,
        script_path: &str,
        mode: ValidationMode,
    ) -> Result<ValidationReport, ToolError> {
        let path = Path::new(script_path);
        if !path.is_file() {
            return Err(ToolError::not_found(format!(
                "script not found: {}",
                script_path
            )));
        }
        let source = std::fs::read_to_string(path)
            .map_err(|e| ToolError::not_found(format!("cannot read {}: {}", script_path, e)))?;

        self.validate_source(script_path, &source, mode).await
    }

    /// Validate script source directly (used by tests and stdin flows).
    pub async fn validate_source(
        &self,
        script_path: &str,
        source: &str,
        mode: ValidationMode,
    ) -> Result<ValidationReport, ToolError> {
        let symbols = ast::extract_symbol_uses(source)
            .map_err(|e| ToolError::invalid_argument(format!("could not parse script: {}", e)))?;

        let mut findings = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            findings.push(self.score_symbol(symbol, mode).await?);
        }

        let (mut validated, mut warning, mut critical) = (0usize, 0usize, 0usize);
        for f in &findings {
            match f.category {
                Category::Validated => validated += 1,
                Category::Warning => warning += 1,
                Category::Critical => critical += 1,
            }
        }

        let overall_risk = if findings.is_empty() {
            0.0
        } else {
            let mean: f64 =
                findings.iter().map(|f| f.confidence).sum::<f64>() / findings.len() as f64;
            (1.0 - mean).clamp(0.0, 1.0)
        };

        Ok(ValidationReport {
            script_path: script_path.to_string(),
            findings,
            overall_risk,
            validated_count: validated,
            warning_count: warning,
            critical_count: critical,
        })
    }

    async fn score_symbol(
        &self,
        symbol: &SymbolUse,
        mode: ValidationMode,
    ) -> Result<Finding, ToolError> {
        let (structural, semantic) = match mode {
            ValidationMode::Fast => {
                let structural = self.structural_score(symbol).await?;
                let semantic = if structural.score >= FAST_SKIP_THRESHOLD {
                    // Conclusive: fuse against the structural score itself so
                    // the skip cannot change the classification.
                    structural.score
                } else {
                    self.semantic_score(symbol, false).await
                };
                (structural, semantic)
            }
            ValidationMode::Balanced => {
                let (structural, semantic) = tokio::join!(
                    self.structural_score(symbol),
                    self.semantic_score(symbol, false)
                );
                (structural?, semantic)
            }
            ValidationMode::Thorough => {
                let structural = self.structural_score(symbol).await?;
                let semantic = self.semantic_score(symbol, true).await;
                (structural, semantic)
            }
        };

        let confidence = (STRUCTURAL_WEIGHT * structural.score + SEMANTIC_WEIGHT * semantic)
            .clamp(0.0, 1.0);

        let category = if confidence >= VALIDATED_THRESHOLD {
            Category::Validated
        } else if confidence >= WARNING_THRESHOLD {
            Category::Warning
        } else {
            Category::Critical
        };

        Ok(Finding {
            line: symbol.line,
            kind: symbol.kind.as_str(),
            name: display_name(symbol),
            confidence,
            category,
            actual_signature: structural.actual_signature.clone(),
            suggestions: structural.suggestions.clone(),
        })
    }

    /// Cached structural lookup.
    async fn structural_score(&self, symbol: &SymbolUse) -> Result<Arc<Resolution>, ToolError> {
        let key = format!(
            "{}|{}|{}",
            symbol.kind.as_str(),
            symbol.qualified_name,
            symbol.keyword_args.join(",")
        );

        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let resolution = self
            .graph
            .resolve(symbol)
            .await
            .map_err(|e| ToolError::backend_unavailable(format!("graph lookup failed: {}", e)))?;
        let resolution = Arc::new(resolution);
        self.cache.insert(key, resolution.clone()).await;
        Ok(resolution)
    }

    /// Best similarity among the top code-example hits; 0.0 when the
    /// semantic channel cannot answer.
    async fn semantic_score(&self, symbol: &SymbolUse, rerank: bool) -> f64 {
        let query = format!("{} {}", symbol.qualified_name, symbol.context_line);
        let Ok(embedding) = self.embedder.embed_one(&query).await else {
            return 0.0;
        };

        let Ok(mut hits) = self.store.search_code_examples(&embedding, 5, None).await else {
            return 0.0;
        };
        if hits.is_empty() {
            return 0.0;
        }

        if rerank {
            if let Some(ref reranker) = self.reranker {
                let documents: Vec<String> = hits.iter().map(|h| h.content.clone()).collect();
                if let Ok(scores) = reranker.score(&query, &documents).await {
                    let mut paired: Vec<(f32, f64)> =
                        scores.into_iter().zip(hits.iter().map(|h| h.score)).collect();
                    paired.sort_by(|a, b| {
                        b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    // Similarity of the best candidate per the cross-encoder.
                    if let Some(&(_, similarity)) = paired.first() {
                        return similarity.clamp(0.0, 1.0);
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits[0].score.clamp(0.0, 1.0)
    }
}

/// Member name alone for member symbols, full name otherwise.
fn display_name(symbol: &SymbolUse) -> String {
    match symbol.kind {
        SymbolKind::MethodCall | SymbolKind::AttributeAccess | SymbolKind::ParameterName => symbol
            .qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&symbol.qualified_name)
            .to_string(),
        _ => symbol.qualified_name.clone(),
    }
}

/// Serialize a report for the tool layer.
pub fn report_to_value(report: &ValidationReport) -> Value {
    let mut obj = Map::new();
    obj.insert("success".into(), Value::Bool(true));
    obj.insert(
        "report".into(),
        serde_json::to_value(report).unwrap_or(Value::Null),
    );
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::graph::{MemoryGraphStore, RepoGraph};
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::validate::ast::{CallableDef, ClassDef, FileStructure};
    use anyhow::Result;
    use async_trait::async_trait;

    struct HashEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for word in t.split_whitespace() {
                        let h = word
                            .bytes()
                            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        v[h % self.dims] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dims(&self) -> usize {
            self.dims
        }
    }

    fn agent_repo() -> RepoGraph {
        RepoGraph {
            name: "pydantic-ai".to_string(),
            files: vec![FileStructure {
                path: "pydantic_ai/agent.py".to_string(),
                classes: vec![ClassDef {
                    name: "Agent".to_string(),
                    methods: vec![
                        CallableDef {
                            name: "__init__".to_string(),
                            params: vec!["model".to_string()],
                        },
                        CallableDef {
                            name: "run".to_string(),
                            params: vec!["prompt".to_string()],
                        },
                        CallableDef {
                            name: "run_sync".to_string(),
                            params: vec!["prompt".to_string()],
                        },
                    ],
                    attributes: Vec::new(),
                }],
                functions: Vec::new(),
            }],
        }
    }

    async fn engine() -> ValidationEngine {
        let graph = Arc::new(MemoryGraphStore::new());
        graph.upsert_repository(&agent_repo()).await.unwrap();
        ValidationEngine::new(
            graph,
            Arc::new(MemoryStore::new(8)),
            Arc::new(HashEmbedder { dims: 8 }),
            None,
        )
    }

    const SCRIPT: &str = "\
from pydantic_ai import Agent

agent = Agent('openai:gpt-4')
result = agent.run_with_custom_validation('x')
ok = agent.run('y')
";

    #[tokio::test]
    async fn test_hallucinated_method_is_critical() {
        let engine = engine().await;
        let report = engine
            .validate_source("script.py", SCRIPT, ValidationMode::Balanced)
            .await
            .unwrap();

        let finding = report
            .findings
            .iter()
            .find(|f| f.name == "run_with_custom_validation")
            .expect("finding for the hallucinated method");
        assert_eq!(finding.kind, "method-call");
        assert_eq!(finding.line, 4);
        assert!(finding.confidence < 0.6);
        assert_eq!(finding.category, Category::Critical);
        assert!(
            finding.suggestions.iter().any(|s| s == "run" || s == "run_sync"),
            "suggestions were {:?}",
            finding.suggestions
        );
        assert!(report.critical_count >= 1);
    }

    #[tokio::test]
    async fn test_real_method_validates_in_fast_mode() {
        let engine = engine().await;
        let report = engine
            .validate_source("script.py", SCRIPT, ValidationMode::Fast)
            .await
            .unwrap();

        let finding = report
            .findings
            .iter()
            .find(|f| f.name == "run" && f.kind == "method-call")
            .unwrap();
        // Structural 1.0, semantic skipped and fused at the same value.
        assert!(finding.confidence >= 0.8);
        assert_eq!(finding.category, Category::Validated);
        assert!(finding.actual_signature.as_deref().unwrap().contains("run(prompt)"));
    }

    #[tokio::test]
    async fn test_overall_risk_bounds() {
        let engine = engine().await;
        let report = engine
            .validate_source("script.py", SCRIPT, ValidationMode::Balanced)
            .await
            .unwrap();
        assert!((0.0..=1.0).contains(&report.overall_risk));
        // A script with a critical finding carries nonzero risk.
        assert!(report.overall_risk > 0.0);
    }

    #[tokio::test]
    async fn test_empty_script_no_risk() {
        let engine = engine().await;
        let report = engine
            .validate_source("empty.py", "x = 1\n", ValidationMode::Balanced)
            .await
            .unwrap();
        assert!(report.findings.is_empty());
        assert_eq!(report.overall_risk, 0.0);
    }

    #[tokio::test]
    async fn test_missing_script_not_found() {
        let engine = engine().await;
        let err = engine
            .validate_script("/nonexistent/script.py", ValidationMode::Fast)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_modes_agree_on_structural_outcome() {
        let engine = engine().await;
        for mode in [
            ValidationMode::Fast,
            ValidationMode::Balanced,
            ValidationMode::Thorough,
        ] {
            let report = engine
                .validate_source("script.py", SCRIPT, mode)
                .await
                .unwrap();
            let bad = report
                .findings
                .iter()
                .find(|f| f.name == "run_with_custom_validation")
                .unwrap();
            assert_eq!(bad.category, Category::Critical, "mode {:?}", mode);
        }
    }
}
