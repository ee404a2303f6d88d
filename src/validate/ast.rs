//! Python AST extraction via tree-sitter.
//!
//! Two consumers share this module: script validation walks a target script
//! and enumerates every external symbol use, and repository indexing walks
//! source files and lifts their class/function structure into the knowledge
//! graph.
//!
//! Receiver types are tracked through simple assignment (`agent = Agent(...)`
//! makes later `agent.run(...)` a method call on `Agent`), which covers the
//! dominant shape of AI-generated scripts without attempting full inference.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tree_sitter::{Node, Parser};

/// Kind of an external symbol use found in a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Import,
    ClassConstruct,
    MethodCall,
    FunctionCall,
    AttributeAccess,
    ParameterName,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Import => "import",
            SymbolKind::ClassConstruct => "class-construct",
            SymbolKind::MethodCall => "method-call",
            SymbolKind::FunctionCall => "function-call",
            SymbolKind::AttributeAccess => "attribute-access",
            SymbolKind::ParameterName => "parameter-name",
        }
    }
}

/// One symbol use: `(kind, qualified_name, line)` plus the source line for
/// semantic scoring.
#[derive(Debug, Clone)]
pub struct SymbolUse {
    pub kind: SymbolKind,
    /// Dotted name, e.g. `Agent.run_with_custom_validation`.
    pub qualified_name: String,
    /// 1-based source line.
    pub line: usize,
    /// The raw source line the symbol appears on.
    pub context_line: String,
    /// Keyword argument names observed at a call site.
    pub keyword_args: Vec<String>,
}

/// A method or function with its parameter names.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDef {
    pub name: String,
    pub params: Vec<String>,
}

/// A class with methods and attributes.
#[derive(Debug, Clone, Default)]
pub struct ClassDef {
    pub name: String,
    pub methods: Vec<CallableDef>,
    pub attributes: Vec<String>,
}

/// Structure of one parsed source file.
#[derive(Debug, Clone, Default)]
pub struct FileStructure {
    pub path: String,
    pub classes: Vec<ClassDef>,
    pub functions: Vec<CallableDef>,
}

fn python_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .context("failed to load the Python grammar")?;
    Ok(parser)
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn line_of(node: Node) -> usize {
    node.start_position().row + 1
}

fn source_line(source: &str, line: usize) -> String {
    source
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .trim()
        .to_string()
}

// ============ Script symbol extraction ============

/// Enumerate every external symbol use in a Python script.
pub fn extract_symbol_uses(source: &str) -> Result<Vec<SymbolUse>> {
    let mut parser = python_parser()?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("failed to parse script"))?;

    let mut ctx = ScriptContext {
        source,
        imports: HashMap::new(),
        var_types: HashMap::new(),
        symbols: Vec::new(),
    };

    // Imports and constructor assignments first, so later method calls on
    // variables resolve to their class.
    collect_imports_and_assignments(tree.root_node(), &mut ctx);
    collect_uses(tree.root_node(), &mut ctx);

    Ok(ctx.symbols)
}

struct ScriptContext<'a> {
    source: &'a str,
    /// Local alias → fully qualified import name.
    imports: HashMap<String, String>,
    /// Variable → class name it was constructed from.
    var_types: HashMap<String, String>,
    symbols: Vec<SymbolUse>,
}

impl ScriptContext<'_> {
    fn push(&mut self, kind: SymbolKind, qualified_name: String, line: usize, kwargs: Vec<String>) {
        self.symbols.push(SymbolUse {
            kind,
            qualified_name,
            line,
            context_line: source_line(self.source, line),
            keyword_args: kwargs,
        });
    }

    /// Resolve a local name through the import table.
    fn resolve(&self, name: &str) -> String {
        self.imports
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

fn collect_imports_and_assignments(node: Node, ctx: &mut ScriptContext) {
    match node.kind() {
        "import_statement" => {
            for child in node.named_children(&mut node.walk()) {
                match child.kind() {
                    "dotted_name" => {
                        let name = node_text(child, ctx.source).to_string();
                        let local = name.split('.').next().unwrap_or(&name).to_string();
                        ctx.imports.insert(local, name.clone());
                        ctx.push(SymbolKind::Import, name, line_of(child), Vec::new());
                    }
                    "aliased_import" => {
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, ctx.source).to_string())
                            .unwrap_or_default();
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, ctx.source).to_string())
                            .unwrap_or_else(|| name.clone());
                        ctx.imports.insert(alias, name.clone());
                        ctx.push(SymbolKind::Import, name, line_of(child), Vec::new());
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            let module = node
                .child_by_field_name("module_name")
                .map(|n| node_text(n, ctx.source).to_string())
                .unwrap_or_default();
            for child in node.named_children(&mut node.walk()) {
                let (imported, alias) = match child.kind() {
                    "dotted_name" if Some(child) != node.child_by_field_name("module_name") => {
                        let name = node_text(child, ctx.source).to_string();
                        (name.clone(), name)
                    }
                    "aliased_import" => {
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, ctx.source).to_string())
                            .unwrap_or_default();
                        let alias = child
                            .child_by_field_name("alias")
                            .map(|n| node_text(n, ctx.source).to_string())
                            .unwrap_or_else(|| name.clone());
                        (name, alias)
                    }
                    _ => continue,
                };
                if imported.is_empty() {
                    continue;
                }
                let qualified = format!("{}.{}", module, imported);
                ctx.imports.insert(alias, qualified.clone());
                ctx.push(SymbolKind::Import, qualified, line_of(child), Vec::new());
            }
        }
        "assignment" => {
            // var = ClassName(...)  →  var_types[var] = ClassName
            if let (Some(left), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) {
                if left.kind() == "identifier" && right.kind() == "call" {
                    if let Some(function) = right.child_by_field_name("function") {
                        if function.kind() == "identifier" {
                            let callee = node_text(function, ctx.source);
                            if is_class_name(callee) {
                                ctx.var_types.insert(
                                    node_text(left, ctx.source).to_string(),
                                    last_segment(&ctx.resolve(callee)).to_string(),
                                );
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }

    for child in node.named_children(&mut node.walk()) {
        collect_imports_and_assignments(child, ctx);
    }
}

fn collect_uses(node: Node, ctx: &mut ScriptContext) {
    match node.kind() {
        "call" => {
            let kwargs = keyword_arg_names(node, ctx.source);
            if let Some(function) = node.child_by_field_name("function") {
                match function.kind() {
                    "identifier" => {
                        let callee = node_text(function, ctx.source).to_string();
                        if is_class_name(&callee) {
                            let class = last_segment(&ctx.resolve(&callee)).to_string();
                            let line = line_of(function);
                            for kw in &kwargs {
                                ctx.push(
                                    SymbolKind::ParameterName,
                                    format!("{}.{}", class, kw),
                                    line,
                                    Vec::new(),
                                );
                            }
                            ctx.push(SymbolKind::ClassConstruct, class, line, kwargs);
                        } else if !is_builtin(&callee) {
                            ctx.push(
                                SymbolKind::FunctionCall,
                                ctx.resolve(&callee),
                                line_of(function),
                                kwargs,
                            );
                        }
                    }
                    "attribute" => {
                        let method = function
                            .child_by_field_name("attribute")
                            .map(|n| node_text(n, ctx.source).to_string())
                            .unwrap_or_default();
                        if method.is_empty() {
                            return;
                        }
                        let line = line_of(function);
                        let object = function.child_by_field_name("object");

                        match object.map(|o| (o, o.kind())) {
                            Some((o, "identifier")) => {
                                let receiver = node_text(o, ctx.source).to_string();
                                if let Some(class) = ctx.var_types.get(&receiver).cloned() {
                                    ctx.push(
                                        SymbolKind::MethodCall,
                                        format!("{}.{}", class, method),
                                        line,
                                        kwargs,
                                    );
                                } else if ctx.imports.contains_key(&receiver)
                                    && !is_class_name(&receiver)
                                {
                                    ctx.push(
                                        SymbolKind::FunctionCall,
                                        format!("{}.{}", ctx.resolve(&receiver), method),
                                        line,
                                        kwargs,
                                    );
                                } else if is_class_name(&receiver) {
                                    // Direct Class.method(...) call.
                                    ctx.push(
                                        SymbolKind::MethodCall,
                                        format!(
                                            "{}.{}",
                                            last_segment(&ctx.resolve(&receiver)),
                                            method
                                        ),
                                        line,
                                        kwargs,
                                    );
                                }
                            }
                            // Chained construction: Agent(...).method(...)
                            Some((o, "call")) => {
                                if let Some(inner) = o.child_by_field_name("function") {
                                    if inner.kind() == "identifier" {
                                        let callee = node_text(inner, ctx.source);
                                        if is_class_name(callee) {
                                            let class =
                                                last_segment(&ctx.resolve(callee)).to_string();
                                            ctx.push(
                                                SymbolKind::MethodCall,
                                                format!("{}.{}", class, method),
                                                line,
                                                kwargs,
                                            );
                                        }
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }
        }
        "attribute" => {
            // Attribute reads outside call position: x.attr
            let in_call_position = node
                .parent()
                .map(|p| {
                    p.kind() == "call" && p.child_by_field_name("function") == Some(node)
                })
                .unwrap_or(false);
            if !in_call_position {
                let receiver = node
                    .child_by_field_name("object")
                    .map(|n| node_text(n, ctx.source).to_string())
                    .unwrap_or_default();
                let attr = node
                    .child_by_field_name("attribute")
                    .map(|n| node_text(n, ctx.source).to_string())
                    .unwrap_or_default();
                if let Some(class) = ctx.var_types.get(&receiver).cloned() {
                    if !attr.is_empty() {
                        ctx.push(
                            SymbolKind::AttributeAccess,
                            format!("{}.{}", class, attr),
                            line_of(node),
                            Vec::new(),
                        );
                    }
                }
            }
        }
        _ => {}
    }

    for child in node.named_children(&mut node.walk()) {
        collect_uses(child, ctx);
    }
}

fn keyword_arg_names(call: Node, source: &str) -> Vec<String> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    args.named_children(&mut args.walk())
        .filter(|c| c.kind() == "keyword_argument")
        .filter_map(|c| {
            c.child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
        })
        .collect()
}

fn is_class_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "print" | "len" | "range" | "str" | "int" | "float" | "bool" | "list" | "dict" | "set"
            | "tuple" | "open" | "isinstance" | "enumerate" | "zip" | "map" | "filter" | "sorted"
            | "sum" | "min" | "max" | "abs" | "type" | "getattr" | "setattr" | "hasattr" | "super"
            | "input" | "repr" | "vars" | "iter" | "next" | "format"
    )
}

// ============ Repository structure extraction ============

/// Lift the class/function structure out of one Python source file.
pub fn parse_file_structure(path: &str, source: &str) -> Result<FileStructure> {
    let mut parser = python_parser()?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("failed to parse {}", path))?;

    let mut structure = FileStructure {
        path: path.to_string(),
        ..Default::default()
    };

    collect_structure(tree.root_node(), source, &mut structure, None);
    Ok(structure)
}

fn collect_structure(
    node: Node,
    source: &str,
    structure: &mut FileStructure,
    current_class: Option<usize>,
) {
    match node.kind() {
        "class_definition" => {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default();
            if !name.is_empty() {
                structure.classes.push(ClassDef {
                    name,
                    ..Default::default()
                });
                let idx = structure.classes.len() - 1;
                if let Some(body) = node.child_by_field_name("body") {
                    for child in body.named_children(&mut body.walk()) {
                        collect_structure(child, source, structure, Some(idx));
                    }
                }
            }
            return;
        }
        "function_definition" => {
            let name = node
                .child_by_field_name("name")
                .map(|n| node_text(n, source).to_string())
                .unwrap_or_default();
            if !name.is_empty() {
                let params = parameter_names(node, source);
                let def = CallableDef { name, params };
                match current_class {
                    Some(idx) => structure.classes[idx].methods.push(def),
                    None => structure.functions.push(def),
                }
            }
            // Attribute assignments inside __init__ et al.
            if let (Some(idx), Some(body)) = (current_class, node.child_by_field_name("body")) {
                collect_self_attributes(body, source, &mut structure.classes[idx]);
            }
            return;
        }
        _ => {}
    }

    for child in node.named_children(&mut node.walk()) {
        collect_structure(child, source, structure, current_class);
    }
}

/// Record `self.x = …` targets as class attributes.
fn collect_self_attributes(node: Node, source: &str, class: &mut ClassDef) {
    if node.kind() == "assignment" {
        if let Some(left) = node.child_by_field_name("left") {
            if left.kind() == "attribute" {
                let object = left
                    .child_by_field_name("object")
                    .map(|n| node_text(n, source))
                    .unwrap_or("");
                if object == "self" {
                    if let Some(attr) = left.child_by_field_name("attribute") {
                        let name = node_text(attr, source).to_string();
                        if !class.attributes.contains(&name) {
                            class.attributes.push(name);
                        }
                    }
                }
            }
        }
    }
    for child in node.named_children(&mut node.walk()) {
        collect_self_attributes(child, source, class);
    }
}

fn parameter_names(function: Node, source: &str) -> Vec<String> {
    let Some(params) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };
    params
        .named_children(&mut params.walk())
        .filter_map(|p| match p.kind() {
            "identifier" => Some(node_text(p, source).to_string()),
            "default_parameter" | "typed_parameter" | "typed_default_parameter" => p
                .child_by_field_name("name")
                .or_else(|| p.named_child(0))
                .map(|n| node_text(n, source).to_string()),
            _ => None,
        })
        .filter(|n| n != "self" && n != "cls")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_imports() {
        let source = "import os\nfrom pydantic_ai import Agent\n";
        let symbols = extract_symbol_uses(source).unwrap();
        let imports: Vec<&str> = symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Import)
            .map(|s| s.qualified_name.as_str())
            .collect();
        assert!(imports.contains(&"os"));
        assert!(imports.contains(&"pydantic_ai.Agent"));
    }

    #[test]
    fn test_method_call_on_constructed_var() {
        let source = "\
from pydantic_ai import Agent

agent = Agent('openai:gpt-4')
result = agent.run_with_custom_validation('x')
";
        let symbols = extract_symbol_uses(source).unwrap();

        let construct = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::ClassConstruct)
            .unwrap();
        assert_eq!(construct.qualified_name, "Agent");
        assert_eq!(construct.line, 3);

        let call = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::MethodCall)
            .unwrap();
        assert_eq!(call.qualified_name, "Agent.run_with_custom_validation");
        assert_eq!(call.line, 4);
        assert!(call.context_line.contains("run_with_custom_validation"));
    }

    #[test]
    fn test_keyword_args_become_parameter_symbols() {
        let source = "\
from pydantic_ai import Agent
agent = Agent(model='openai:gpt-4', retries=3)
";
        let symbols = extract_symbol_uses(source).unwrap();
        let params: Vec<&str> = symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::ParameterName)
            .map(|s| s.qualified_name.as_str())
            .collect();
        assert!(params.contains(&"Agent.model"));
        assert!(params.contains(&"Agent.retries"));
    }

    #[test]
    fn test_chained_construct_method_call() {
        let source = "\
from pydantic_ai import Agent
result = Agent('openai:gpt-4').run_with_custom_validation('x')
";
        let symbols = extract_symbol_uses(source).unwrap();
        let call = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::MethodCall)
            .unwrap();
        assert_eq!(call.qualified_name, "Agent.run_with_custom_validation");
        assert_eq!(call.line, 2);
        // The construction itself is also recorded.
        assert!(symbols
            .iter()
            .any(|s| s.kind == SymbolKind::ClassConstruct && s.qualified_name == "Agent"));
    }

    #[test]
    fn test_module_function_call() {
        let source = "import json\nresult = json.dumps({})\n";
        let symbols = extract_symbol_uses(source).unwrap();
        let call = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::FunctionCall)
            .unwrap();
        assert_eq!(call.qualified_name, "json.dumps");
    }

    #[test]
    fn test_attribute_access_on_var() {
        let source = "\
from pydantic_ai import Agent
agent = Agent('m')
name = agent.model_name
";
        let symbols = extract_symbol_uses(source).unwrap();
        let attr = symbols
            .iter()
            .find(|s| s.kind == SymbolKind::AttributeAccess)
            .unwrap();
        assert_eq!(attr.qualified_name, "Agent.model_name");
    }

    #[test]
    fn test_builtins_skipped() {
        let source = "print(len([1, 2]))\n";
        let symbols = extract_symbol_uses(source).unwrap();
        assert!(symbols
            .iter()
            .all(|s| s.kind != SymbolKind::FunctionCall || !s.qualified_name.contains("print")));
    }

    #[test]
    fn test_parse_file_structure() {
        let source = "\
class Agent:
    def __init__(self, model, retries=1):
        self.model = model
        self.retries = retries

    def run(self, prompt):
        pass

    def run_sync(self, prompt, timeout=None):
        pass

def helper(x):
    return x
";
        let s = parse_file_structure("agent.py", source).unwrap();
        assert_eq!(s.classes.len(), 1);
        let class = &s.classes[0];
        assert_eq!(class.name, "Agent");
        let method_names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(method_names, vec!["__init__", "run", "run_sync"]);
        let init = &class.methods[0];
        assert_eq!(init.params, vec!["model", "retries"]);
        assert!(class.attributes.contains(&"model".to_string()));
        assert!(class.attributes.contains(&"retries".to_string()));
        assert_eq!(s.functions.len(), 1);
        assert_eq!(s.functions[0].name, "helper");
        assert_eq!(s.functions[0].params, vec!["x"]);
    }
}
