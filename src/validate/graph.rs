//! Knowledge-graph store for parsed repositories.
//!
//! Node labels: `Repository`, `File`, `Class`, `Method`, `Function`,
//! `Attribute`, `Parameter`. Edges: `Repository-CONTAINS->File`,
//! `File-DEFINES->Class|Function`, `Class-HAS_METHOD->Method`,
//! `Class-HAS_ATTRIBUTE->Attribute`, `Method|Function-HAS_PARAM->Parameter`.
//! `Repository.name` is unique; re-parsing a repository replaces its subtree.
//!
//! Two implementations: [`Neo4jHttpStore`] speaks Cypher over the HTTP
//! transaction endpoint, [`MemoryGraphStore`] keeps the same shape in a
//! petgraph `DiGraph` for tests and graph-less deployments.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::RwLock;
use std::time::Duration;
use walkdir::WalkDir;

use super::ast::{parse_file_structure, FileStructure, SymbolKind, SymbolUse};

/// Result of a structural lookup for one symbol use.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Structural score: 1.0 exact, 0.6 parameter disagreement, 0.3 name
    /// under a different parent, 0.0 not found.
    pub score: f64,
    /// Signature of the matched element, when one exists.
    pub actual_signature: Option<String>,
    /// Sibling names from the expected parent, for diagnostics.
    pub suggestions: Vec<String>,
}

impl Resolution {
    fn not_found(suggestions: Vec<String>) -> Self {
        Self {
            score: 0.0,
            actual_signature: None,
            suggestions,
        }
    }
}

/// Everything parsed out of one repository.
#[derive(Debug, Clone)]
pub struct RepoGraph {
    pub name: String,
    pub files: Vec<FileStructure>,
}

impl RepoGraph {
    pub fn class_count(&self) -> usize {
        self.files.iter().map(|f| f.classes.len()).sum()
    }

    pub fn function_count(&self) -> usize {
        self.files.iter().map(|f| f.functions.len()).sum()
    }
}

/// Abstract knowledge-graph backend.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_repository(&self, repo: &RepoGraph) -> Result<()>;
    async fn remove_repository(&self, name: &str) -> Result<()>;
    async fn list_repositories(&self) -> Result<Vec<String>>;
    async fn list_classes(&self, repo: &str) -> Result<Vec<String>>;
    /// Structural existence check for one symbol use.
    async fn resolve(&self, symbol: &SymbolUse) -> Result<Resolution>;
    /// Pass a raw query through to the backend (Cypher for Neo4j).
    async fn raw_query(&self, query: &str) -> Result<Value>;
}

// ============ Repository acquisition ============

/// Clone a repository (shallow) and parse every Python file into a
/// [`RepoGraph`]. Local paths are parsed in place.
pub async fn parse_repository(repo_url: &str) -> Result<RepoGraph> {
    let name = repo_name_of(repo_url)?;

    let local = Path::new(repo_url);
    if local.is_dir() {
        let files = parse_tree(local)?;
        return Ok(RepoGraph { name, files });
    }

    let tmp = tempfile::TempDir::new().context("could not create a clone directory")?;
    let dest = tmp.path().join(&name);
    let url = repo_url.to_string();
    let dest_clone = dest.clone();
    // git does blocking I/O; keep it off the async workers.
    tokio::task::spawn_blocking(move || git_clone(&url, &dest_clone))
        .await
        .context("clone task panicked")??;

    let files = parse_tree(&dest)?;
    Ok(RepoGraph { name, files })
}

/// Derive the repository name from its URL or path.
pub fn repo_name_of(repo_url: &str) -> Result<String> {
    let trimmed = repo_url.trim_end_matches('/').trim_end_matches(".git");
    let name = trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("cannot derive repository name from '{}'", repo_url))?;
    Ok(name.to_string())
}

/// Shallow, single-branch clone via the git CLI.
fn git_clone(url: &str, dest: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(dest)
        .output()
        .with_context(|| "failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }
    Ok(())
}

fn parse_tree(root: &Path) -> Result<Vec<FileStructure>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        let Ok(source) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        match parse_file_structure(&rel, &source) {
            Ok(structure) => files.push(structure),
            Err(e) => tracing::warn!(file = rel, error = %e, "skipping unparseable file"),
        }
    }
    Ok(files)
}

// ============ In-memory implementation ============

#[derive(Debug, Clone, PartialEq)]
enum GraphNode {
    Repository(String),
    File(String),
    Class(String),
    Method(String),
    Function(String),
    Attribute(String),
    Parameter(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum GraphEdge {
    Contains,
    Defines,
    HasMethod,
    HasAttribute,
    HasParam,
}

#[derive(Default)]
struct MemoryGraphInner {
    graph: DiGraph<GraphNode, GraphEdge>,
    repos: HashMap<String, NodeIndex>,
}

/// petgraph-backed graph store.
pub struct MemoryGraphStore {
    inner: RwLock<MemoryGraphInner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryGraphInner::default()),
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphInner {
    fn remove_repo(&mut self, name: &str) {
        if let Some(&repo_idx) = self.repos.get(name) {
            // Collect the subtree breadth-first, then drop it.
            let mut stack = vec![repo_idx];
            let mut to_remove = Vec::new();
            while let Some(idx) = stack.pop() {
                to_remove.push(idx);
                stack.extend(self.graph.neighbors(idx));
            }
            to_remove.sort();
            to_remove.dedup();
            // Remove from highest index down so earlier indices stay valid.
            for idx in to_remove.into_iter().rev() {
                self.graph.remove_node(idx);
            }
            self.repos.remove(name);
            // Node removal invalidates stored indices.
            let names: Vec<String> = self.repos.keys().cloned().collect();
            self.repos.clear();
            for repo_name in names {
                if let Some(idx) = self
                    .graph
                    .node_indices()
                    .find(|&i| self.graph[i] == GraphNode::Repository(repo_name.clone()))
                {
                    self.repos.insert(repo_name, idx);
                }
            }
        }
    }

    fn insert_repo(&mut self, repo: &RepoGraph) {
        let repo_idx = self.graph.add_node(GraphNode::Repository(repo.name.clone()));
        self.repos.insert(repo.name.clone(), repo_idx);

        for file in &repo.files {
            let file_idx = self.graph.add_node(GraphNode::File(file.path.clone()));
            self.graph.add_edge(repo_idx, file_idx, GraphEdge::Contains);

            for class in &file.classes {
                let class_idx = self.graph.add_node(GraphNode::Class(class.name.clone()));
                self.graph.add_edge(file_idx, class_idx, GraphEdge::Defines);

                for method in &class.methods {
                    let m_idx = self.graph.add_node(GraphNode::Method(method.name.clone()));
                    self.graph.add_edge(class_idx, m_idx, GraphEdge::HasMethod);
                    for param in &method.params {
                        let p_idx = self.graph.add_node(GraphNode::Parameter(param.clone()));
                        self.graph.add_edge(m_idx, p_idx, GraphEdge::HasParam);
                    }
                }
                for attr in &class.attributes {
                    let a_idx = self.graph.add_node(GraphNode::Attribute(attr.clone()));
                    self.graph.add_edge(class_idx, a_idx, GraphEdge::HasAttribute);
                }
            }
            for function in &file.functions {
                let f_idx = self.graph.add_node(GraphNode::Function(function.name.clone()));
                self.graph.add_edge(file_idx, f_idx, GraphEdge::Defines);
                for param in &function.params {
                    let p_idx = self.graph.add_node(GraphNode::Parameter(param.clone()));
                    self.graph.add_edge(f_idx, p_idx, GraphEdge::HasParam);
                }
            }
        }
    }

    fn find_class(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&i| matches!(&self.graph[i], GraphNode::Class(n) if n == name))
    }

    fn methods_of(&self, class_idx: NodeIndex) -> Vec<(String, Vec<String>)> {
        self.graph
            .edges(class_idx)
            .filter(|e| *e.weight() == GraphEdge::HasMethod)
            .map(|e| {
                let target = e.target();
                let name = match &self.graph[target] {
                    GraphNode::Method(n) => n.clone(),
                    _ => String::new(),
                };
                let params = self.params_of(target);
                (name, params)
            })
            .collect()
    }

    fn params_of(&self, callable_idx: NodeIndex) -> Vec<String> {
        self.graph
            .edges(callable_idx)
            .filter(|e| *e.weight() == GraphEdge::HasParam)
            .filter_map(|e| match &self.graph[e.target()] {
                GraphNode::Parameter(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    fn attributes_of(&self, class_idx: NodeIndex) -> Vec<String> {
        self.graph
            .edges(class_idx)
            .filter(|e| *e.weight() == GraphEdge::HasAttribute)
            .filter_map(|e| match &self.graph[e.target()] {
                GraphNode::Attribute(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }

    fn method_exists_anywhere(&self, name: &str) -> bool {
        self.graph
            .node_indices()
            .any(|i| matches!(&self.graph[i], GraphNode::Method(n) | GraphNode::Function(n) if n == name))
    }

    fn function_exists(&self, name: &str) -> bool {
        self.graph
            .node_indices()
            .any(|i| matches!(&self.graph[i], GraphNode::Function(n) if n == name))
    }

    fn module_known(&self, module: &str) -> bool {
        let last = module.rsplit('.').next().unwrap_or(module);
        self.graph.node_indices().any(|i| match &self.graph[i] {
            GraphNode::Repository(n) => n == last || n == module,
            GraphNode::File(p) => {
                p.trim_end_matches(".py").replace(['/', '\\'], ".").ends_with(last)
            }
            GraphNode::Class(n) | GraphNode::Function(n) => n == last,
            _ => false,
        })
    }
}

/// Score a `Class.member` lookup against the graph.
fn score_member(
    inner: &MemoryGraphInner,
    class: &str,
    member: &str,
    keyword_args: &[String],
    attributes: bool,
) -> Resolution {
    let Some(class_idx) = inner.find_class(class) else {
        // Class unknown; the member name existing elsewhere is worth 0.3.
        if inner.method_exists_anywhere(member) {
            return Resolution {
                score: 0.3,
                actual_signature: None,
                suggestions: Vec::new(),
            };
        }
        return Resolution::not_found(Vec::new());
    };

    if attributes {
        let attrs = inner.attributes_of(class_idx);
        if attrs.iter().any(|a| a == member) {
            return Resolution {
                score: 1.0,
                actual_signature: Some(format!("{}.{}", class, member)),
                suggestions: Vec::new(),
            };
        }
        let mut suggestions = attrs;
        suggestions.sort();
        suggestions.truncate(5);
        if inner.method_exists_anywhere(member) {
            return Resolution {
                score: 0.3,
                actual_signature: None,
                suggestions,
            };
        }
        return Resolution::not_found(suggestions);
    }

    let methods = inner.methods_of(class_idx);
    if let Some((name, params)) = methods.iter().find(|(n, _)| n == member) {
        let signature = format!("{}.{}({})", class, name, params.join(", "));
        // Parameter sets disagree when a used keyword is not declared.
        let disagrees = keyword_args.iter().any(|kw| !params.contains(kw));
        return Resolution {
            score: if disagrees { 0.6 } else { 1.0 },
            actual_signature: Some(signature),
            suggestions: Vec::new(),
        };
    }

    let mut suggestions: Vec<String> = methods
        .iter()
        .map(|(n, _)| n.clone())
        .filter(|n| n != "__init__")
        .collect();
    suggestions.sort();
    suggestions.truncate(5);

    if inner.method_exists_anywhere(member) {
        Resolution {
            score: 0.3,
            actual_signature: None,
            suggestions,
        }
    } else {
        Resolution::not_found(suggestions)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_repository(&self, repo: &RepoGraph) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove_repo(&repo.name);
        inner.insert_repo(repo);
        Ok(())
    }

    async fn remove_repository(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove_repo(name);
        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = inner.repos.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_classes(&self, repo: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(&repo_idx) = inner.repos.get(repo) else {
            bail!("repository '{}' is not in the graph", repo);
        };
        let mut classes = Vec::new();
        for file_idx in inner.graph.neighbors(repo_idx) {
            for node_idx in inner.graph.neighbors(file_idx) {
                if let GraphNode::Class(name) = &inner.graph[node_idx] {
                    classes.push(name.clone());
                }
            }
        }
        classes.sort();
        classes.dedup();
        Ok(classes)
    }

    async fn resolve(&self, symbol: &SymbolUse) -> Result<Resolution> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        let resolution = match symbol.kind {
            SymbolKind::Import => {
                if inner.module_known(&symbol.qualified_name) {
                    Resolution {
                        score: 1.0,
                        actual_signature: Some(symbol.qualified_name.clone()),
                        suggestions: Vec::new(),
                    }
                } else {
                    Resolution::not_found(Vec::new())
                }
            }
            SymbolKind::ClassConstruct => {
                let class = symbol.qualified_name.as_str();
                match inner.find_class(class) {
                    Some(class_idx) => {
                        let init = inner
                            .methods_of(class_idx)
                            .into_iter()
                            .find(|(n, _)| n == "__init__");
                        let params = init.map(|(_, p)| p).unwrap_or_default();
                        let disagrees =
                            symbol.keyword_args.iter().any(|kw| !params.contains(kw));
                        Resolution {
                            score: if disagrees { 0.6 } else { 1.0 },
                            actual_signature: Some(format!("{}({})", class, params.join(", "))),
                            suggestions: Vec::new(),
                        }
                    }
                    None if inner.function_exists(class) => Resolution {
                        score: 0.3,
                        actual_signature: None,
                        suggestions: Vec::new(),
                    },
                    None => Resolution::not_found(Vec::new()),
                }
            }
            SymbolKind::MethodCall => {
                let (class, method) = split_qualified(&symbol.qualified_name);
                score_member(&inner, class, method, &symbol.keyword_args, false)
            }
            SymbolKind::AttributeAccess => {
                let (class, attr) = split_qualified(&symbol.qualified_name);
                score_member(&inner, class, attr, &[], true)
            }
            SymbolKind::FunctionCall => {
                let name = symbol
                    .qualified_name
                    .rsplit('.')
                    .next()
                    .unwrap_or(&symbol.qualified_name);
                if inner.function_exists(name) {
                    Resolution {
                        score: 1.0,
                        actual_signature: Some(name.to_string()),
                        suggestions: Vec::new(),
                    }
                } else if inner.method_exists_anywhere(name) {
                    Resolution {
                        score: 0.3,
                        actual_signature: None,
                        suggestions: Vec::new(),
                    }
                } else {
                    Resolution::not_found(Vec::new())
                }
            }
            SymbolKind::ParameterName => {
                let (class, param) = split_qualified(&symbol.qualified_name);
                match inner.find_class(class) {
                    Some(class_idx) => {
                        let init_params = inner
                            .methods_of(class_idx)
                            .into_iter()
                            .find(|(n, _)| n == "__init__")
                            .map(|(_, p)| p)
                            .unwrap_or_default();
                        if init_params.iter().any(|p| p == param) {
                            Resolution {
                                score: 1.0,
                                actual_signature: Some(format!(
                                    "{}({})",
                                    class,
                                    init_params.join(", ")
                                )),
                                suggestions: Vec::new(),
                            }
                        } else {
                            let mut suggestions = init_params;
                            suggestions.truncate(5);
                            Resolution {
                                score: 0.0,
                                actual_signature: None,
                                suggestions,
                            }
                        }
                    }
                    None => Resolution::not_found(Vec::new()),
                }
            }
        };

        Ok(resolution)
    }

    async fn raw_query(&self, query: &str) -> Result<Value> {
        // The memory backend understands the shorthand commands only;
        // arbitrary Cypher needs the Neo4j backend.
        let parts: Vec<&str> = query.split_whitespace().collect();
        match parts.as_slice() {
            ["repos"] => Ok(json!({"repositories": self.list_repositories().await?})),
            ["classes", repo] => Ok(json!({"classes": self.list_classes(repo).await?})),
            _ => bail!("the memory graph backend only supports 'repos' and 'classes <repo>'"),
        }
    }
}

fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.rsplit_once('.') {
        Some((parent, member)) => (parent.rsplit('.').next().unwrap_or(parent), member),
        None => ("", qualified),
    }
}

// ============ Neo4j HTTP implementation ============

/// Cypher-over-HTTP graph store (`POST {uri}/db/neo4j/tx/commit`).
pub struct Neo4jHttpStore {
    client: reqwest::Client,
    endpoint: String,
    auth_header: String,
}

impl Neo4jHttpStore {
    pub fn new(uri: &str, user: &str, password: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
        Ok(Self {
            client,
            endpoint: format!("{}/db/neo4j/tx/commit", uri.trim_end_matches('/')),
            auth_header: format!("Basic {}", credentials),
        })
    }

    /// Run one or more Cypher statements in a single auto-commit transaction.
    async fn cypher(&self, statements: Vec<Value>) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&json!({ "statements": statements }))
            .send()
            .await
            .context("graph store unreachable")?;

        let status = response.status();
        if !status.is_success() {
            bail!("graph store returned {}", status);
        }

        let body: Value = response.json().await?;
        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                bail!(
                    "cypher error: {}",
                    errors[0]["message"].as_str().unwrap_or("unknown")
                );
            }
        }
        Ok(body)
    }

    fn statement(query: &str, params: Value) -> Value {
        json!({ "statement": query, "parameters": params })
    }

    /// First column of every row of the first result.
    fn column0(body: &Value) -> Vec<Value> {
        body["results"][0]["data"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r["row"].as_array().and_then(|row| row.first().cloned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn upsert_repository(&self, repo: &RepoGraph) -> Result<()> {
        // Replace semantics: drop the old subtree, then merge the new one.
        self.remove_repository(&repo.name).await?;

        let mut statements = vec![Self::statement(
            "MERGE (r:Repository {name: $name})",
            json!({ "name": repo.name }),
        )];

        for file in &repo.files {
            statements.push(Self::statement(
                "MATCH (r:Repository {name: $repo}) \
                 MERGE (f:File {path: $path, repo: $repo}) \
                 MERGE (r)-[:CONTAINS]->(f)",
                json!({ "repo": repo.name, "path": file.path }),
            ));

            for class in &file.classes {
                statements.push(Self::statement(
                    "MATCH (f:File {path: $path, repo: $repo}) \
                     MERGE (c:Class {name: $class, repo: $repo}) \
                     MERGE (f)-[:DEFINES]->(c)",
                    json!({ "repo": repo.name, "path": file.path, "class": class.name }),
                ));
                for method in &class.methods {
                    statements.push(Self::statement(
                        "MATCH (c:Class {name: $class, repo: $repo}) \
                         MERGE (m:Method {name: $method, class: $class, repo: $repo, params: $params}) \
                         MERGE (c)-[:HAS_METHOD]->(m)",
                        json!({
                            "repo": repo.name,
                            "class": class.name,
                            "method": method.name,
                            "params": method.params,
                        }),
                    ));
                }
                for attr in &class.attributes {
                    statements.push(Self::statement(
                        "MATCH (c:Class {name: $class, repo: $repo}) \
                         MERGE (a:Attribute {name: $attr, class: $class, repo: $repo}) \
                         MERGE (c)-[:HAS_ATTRIBUTE]->(a)",
                        json!({ "repo": repo.name, "class": class.name, "attr": attr }),
                    ));
                }
            }
            for function in &file.functions {
                statements.push(Self::statement(
                    "MATCH (f:File {path: $path, repo: $repo}) \
                     MERGE (fn:Function {name: $function, repo: $repo, params: $params}) \
                     MERGE (f)-[:DEFINES]->(fn)",
                    json!({
                        "repo": repo.name,
                        "path": file.path,
                        "function": function.name,
                        "params": function.params,
                    }),
                ));
            }
        }

        // Large repos produce many statements; send in slices.
        for slice in statements.chunks(200) {
            self.cypher(slice.to_vec()).await?;
        }
        Ok(())
    }

    async fn remove_repository(&self, name: &str) -> Result<()> {
        self.cypher(vec![Self::statement(
            "MATCH (r:Repository {name: $name}) \
             OPTIONAL MATCH (r)-[:CONTAINS]->(f:File) \
             OPTIONAL MATCH (f)-[:DEFINES]->(d) \
             OPTIONAL MATCH (d)-[*0..2]->(leaf) \
             DETACH DELETE leaf, d, f, r",
            json!({ "name": name }),
        )])
        .await?;
        Ok(())
    }

    async fn list_repositories(&self) -> Result<Vec<String>> {
        let body = self
            .cypher(vec![Self::statement(
                "MATCH (r:Repository) RETURN r.name ORDER BY r.name",
                json!({}),
            )])
            .await?;
        Ok(Self::column0(&body)
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect())
    }

    async fn list_classes(&self, repo: &str) -> Result<Vec<String>> {
        let body = self
            .cypher(vec![Self::statement(
                "MATCH (:Repository {name: $repo})-[:CONTAINS]->(:File)-[:DEFINES]->(c:Class) \
                 RETURN DISTINCT c.name ORDER BY c.name",
                json!({ "repo": repo }),
            )])
            .await?;
        Ok(Self::column0(&body)
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect())
    }

    async fn resolve(&self, symbol: &SymbolUse) -> Result<Resolution> {
        match symbol.kind {
            SymbolKind::MethodCall | SymbolKind::AttributeAccess | SymbolKind::ParameterName => {
                let (class, member) = split_qualified(&symbol.qualified_name);

                let body = self
                    .cypher(vec![Self::statement(
                        "MATCH (c:Class {name: $class})-[:HAS_METHOD]->(m:Method {name: $member}) \
                         RETURN m.params LIMIT 1",
                        json!({ "class": class, "member": member }),
                    )])
                    .await?;
                let rows = Self::column0(&body);
                if let Some(params_value) = rows.first() {
                    let params: Vec<String> = params_value
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|p| p.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();
                    let disagrees = symbol.keyword_args.iter().any(|kw| !params.contains(kw));
                    return Ok(Resolution {
                        score: if disagrees { 0.6 } else { 1.0 },
                        actual_signature: Some(format!("{}.{}({})", class, member, params.join(", "))),
                        suggestions: Vec::new(),
                    });
                }

                // Attribute match, then wrong-parent, then not found.
                let attr = self
                    .cypher(vec![Self::statement(
                        "MATCH (c:Class {name: $class})-[:HAS_ATTRIBUTE]->(a:Attribute {name: $member}) \
                         RETURN a.name LIMIT 1",
                        json!({ "class": class, "member": member }),
                    )])
                    .await?;
                if !Self::column0(&attr).is_empty() {
                    return Ok(Resolution {
                        score: 1.0,
                        actual_signature: Some(format!("{}.{}", class, member)),
                        suggestions: Vec::new(),
                    });
                }

                let siblings = self
                    .cypher(vec![Self::statement(
                        "MATCH (c:Class {name: $class})-[:HAS_METHOD]->(m:Method) \
                         WHERE m.name <> '__init__' \
                         RETURN m.name ORDER BY m.name LIMIT 5",
                        json!({ "class": class }),
                    )])
                    .await?;
                let suggestions: Vec<String> = Self::column0(&siblings)
                    .into_iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();

                let elsewhere = self
                    .cypher(vec![Self::statement(
                        "MATCH (m:Method {name: $member}) RETURN m.name LIMIT 1",
                        json!({ "member": member }),
                    )])
                    .await?;
                let score = if !Self::column0(&elsewhere).is_empty() { 0.3 } else { 0.0 };

                Ok(Resolution {
                    score,
                    actual_signature: None,
                    suggestions,
                })
            }
            SymbolKind::ClassConstruct => {
                let body = self
                    .cypher(vec![Self::statement(
                        "MATCH (c:Class {name: $class}) RETURN c.name LIMIT 1",
                        json!({ "class": symbol.qualified_name }),
                    )])
                    .await?;
                if !Self::column0(&body).is_empty() {
                    Ok(Resolution {
                        score: 1.0,
                        actual_signature: Some(symbol.qualified_name.clone()),
                        suggestions: Vec::new(),
                    })
                } else {
                    Ok(Resolution::not_found(Vec::new()))
                }
            }
            SymbolKind::FunctionCall => {
                let name = symbol
                    .qualified_name
                    .rsplit('.')
                    .next()
                    .unwrap_or(&symbol.qualified_name);
                let body = self
                    .cypher(vec![Self::statement(
                        "MATCH (f:Function {name: $name}) RETURN f.params LIMIT 1",
                        json!({ "name": name }),
                    )])
                    .await?;
                if !Self::column0(&body).is_empty() {
                    Ok(Resolution {
                        score: 1.0,
                        actual_signature: Some(name.to_string()),
                        suggestions: Vec::new(),
                    })
                } else {
                    Ok(Resolution::not_found(Vec::new()))
                }
            }
            SymbolKind::Import => {
                let last = symbol
                    .qualified_name
                    .rsplit('.')
                    .next()
                    .unwrap_or(&symbol.qualified_name);
                let body = self
                    .cypher(vec![Self::statement(
                        "MATCH (n) WHERE (n:Class OR n:Function OR n:Repository) AND n.name = $name \
                         RETURN n.name LIMIT 1",
                        json!({ "name": last }),
                    )])
                    .await?;
                if !Self::column0(&body).is_empty() {
                    Ok(Resolution {
                        score: 1.0,
                        actual_signature: Some(symbol.qualified_name.clone()),
                        suggestions: Vec::new(),
                    })
                } else {
                    Ok(Resolution::not_found(Vec::new()))
                }
            }
        }
    }

    async fn raw_query(&self, query: &str) -> Result<Value> {
        // Shorthand commands translate to canned Cypher; anything else goes
        // through verbatim.
        let parts: Vec<&str> = query.split_whitespace().collect();
        let body = match parts.as_slice() {
            ["repos"] => {
                return Ok(json!({ "repositories": self.list_repositories().await? }));
            }
            ["classes", repo] => {
                return Ok(json!({ "classes": self.list_classes(repo).await? }));
            }
            _ => self.cypher(vec![Self::statement(query, json!({}))]).await?,
        };
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ast::{CallableDef, ClassDef};

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
                            params: vec!["model".to_string(), "retries".to_string()],
                        },
                        CallableDef {
                            name: "run".to_string(),
                            params: vec!["prompt".to_string()],
                        },
                        CallableDef {
                            name: "run_sync".to_string(),
                            params: vec!["prompt".to_string(), "timeout".to_string()],
                        },
                    ],
                    attributes: vec!["model".to_string()],
                }],
                functions: vec![CallableDef {
                    name: "infer_model".to_string(),
                    params: vec!["name".to_string()],
                }],
            }],
        }
    }

    fn symbol(kind: SymbolKind, name: &str) -> SymbolUse {
        SymbolUse {
            kind,
            qualified_name: name.to_string(),
            line: 1,
            context_line: String::new(),
            keyword_args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_existing_method_scores_full() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let r = store
            .resolve(&symbol(SymbolKind::MethodCall, "Agent.run"))
            .await
            .unwrap();
        assert_eq!(r.score, 1.0);
        assert_eq!(r.actual_signature.as_deref(), Some("Agent.run(prompt)"));
    }

    #[tokio::test]
    async fn test_missing_method_suggests_siblings() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let r = store
            .resolve(&symbol(
                SymbolKind::MethodCall,
                "Agent.run_with_custom_validation",
            ))
            .await
            .unwrap();
        assert_eq!(r.score, 0.0);
        assert!(r.suggestions.contains(&"run".to_string()));
        assert!(r.suggestions.contains(&"run_sync".to_string()));
    }

    #[tokio::test]
    async fn test_parameter_disagreement_scores_partial() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let mut s = symbol(SymbolKind::MethodCall, "Agent.run_sync");
        s.keyword_args = vec!["prompt".to_string(), "not_a_param".to_string()];
        let r = store.resolve(&s).await.unwrap();
        assert_eq!(r.score, 0.6);
        assert!(r.actual_signature.is_some());
    }

    #[tokio::test]
    async fn test_method_under_other_parent_scores_low() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let r = store
            .resolve(&symbol(SymbolKind::MethodCall, "Missing.run"))
            .await
            .unwrap();
        assert_eq!(r.score, 0.3);
    }

    #[tokio::test]
    async fn test_class_construct_and_function() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let r = store
            .resolve(&symbol(SymbolKind::ClassConstruct, "Agent"))
            .await
            .unwrap();
        assert_eq!(r.score, 1.0);

        let r = store
            .resolve(&symbol(SymbolKind::FunctionCall, "pydantic_ai.infer_model"))
            .await
            .unwrap();
        assert_eq!(r.score, 1.0);

        let r = store
            .resolve(&symbol(SymbolKind::FunctionCall, "no_such_function"))
            .await
            .unwrap();
        assert_eq!(r.score, 0.0);
    }

    #[tokio::test]
    async fn test_attribute_access() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let r = store
            .resolve(&symbol(SymbolKind::AttributeAccess, "Agent.model"))
            .await
            .unwrap();
        assert_eq!(r.score, 1.0);

        let r = store
            .resolve(&symbol(SymbolKind::AttributeAccess, "Agent.nonexistent"))
            .await
            .unwrap();
        assert_eq!(r.score, 0.0);
    }

    #[tokio::test]
    async fn test_repository_replacement_and_removal() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos, vec!["pydantic-ai"]);
        let classes = store.list_classes("pydantic-ai").await.unwrap();
        assert_eq!(classes, vec!["Agent"]);

        store.remove_repository("pydantic-ai").await.unwrap();
        assert!(store.list_repositories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_raw_query_shorthand() {
        let store = MemoryGraphStore::new();
        store.upsert_repository(&agent_repo()).await.unwrap();

        let repos = store.raw_query("repos").await.unwrap();
        assert_eq!(repos["repositories"][0], "pydantic-ai");

        let classes = store.raw_query("classes pydantic-ai").await.unwrap();
        assert_eq!(classes["classes"][0], "Agent");

        assert!(store.raw_query("MATCH (n) RETURN n").await.is_err());
    }

    #[test]
    fn test_repo_name_of() {
        assert_eq!(
            repo_name_of("https://github.com/org/pydantic-ai.git").unwrap(),
            "pydantic-ai"
        );
        assert_eq!(repo_name_of("git@github.com:org/repo").unwrap(), "repo");
    }
}
