//! MCP JSON-RPC protocol bridge.
//!
//! Adapts the [`ToolRegistry`](super::ToolRegistry) to the MCP JSON-RPC
//! protocol via rmcp: `initialize` handshake, `tools/list`, `tools/call`.
//!
//! Error contract: an unknown tool name is a JSON-RPC `method not found`
//! error; everything that goes wrong *inside* a tool is returned as a
//! successful JSON-RPC response whose content is the structured
//! `{success:false, error, error_kind}` object. Unexpected failures get a
//! correlation id and land on stderr; the wire never carries a stack trace.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::error::ToolError;

use super::{AppContext, ToolRegistry};

/// Bridges the tool registry to the MCP JSON-RPC protocol.
///
/// Each MCP session receives a clone of this struct (everything is behind
/// `Arc`), so all sessions share the same tools and backend handles.
#[derive(Clone)]
pub struct McpBridge {
    context: Arc<AppContext>,
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(context: Arc<AppContext>, tools: Arc<ToolRegistry>) -> Self {
        Self { context, tools }
    }

    /// Convert a crawl-harness tool into an rmcp `Tool` descriptor.
    fn to_mcp_tool(tool: &dyn super::Tool) -> Tool {
        let schema_value = tool.parameters_schema();
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema_value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }

    /// Render a tool error as the structured result content.
    fn error_result(err: &ToolError) -> CallToolResult {
        let text = serde_json::to_string(&err.to_value()).unwrap_or_default();
        CallToolResult::error(vec![Content::text(text)])
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "crawl-harness".to_string(),
                title: Some("Crawl Harness".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Crawl Harness — web ingestion and grounded retrieval. Use scrape_urls or \
                 smart_crawl_url to index web content, perform_rag_query to retrieve it, \
                 search to go from a question straight to grounded results, and the \
                 knowledge-graph tools to validate AI-generated scripts."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        match tool.execute(params, &self.context).await {
            Ok(result) => {
                let text = serde_json::to_string(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(err) => Ok(Self::error_result(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_error_result_contract() {
        let err = ToolError::new(ErrorKind::InvalidArgument, "url must be string or string[]");
        let result = McpBridge::error_result(&err);

        // The wire shape carries the structured error object as text content.
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["isError"], true);
        let text = wire["content"][0]["text"].as_str().unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error_kind"], "InvalidArgument");
    }
}
