//! JSON-RPC 2.0 dispatch for the MCP tool surface.
//!
//! The proxy does not implement the post scheduler itself; it forwards
//! authenticated tool calls through [`SchedulerBackend`], handing each call
//! the bound credential of the caller. Only the protocol layer lives here.

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, bind::BoundCredential};

/// MCP protocol revision announced during `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
	/// Protocol marker; must be `2.0`.
	pub jsonrpc: String,
	/// Request identifier; absent for notifications.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<Value>,
	/// Method name, e.g. `tools/call`.
	pub method: String,
	/// Method parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}
impl JsonRpcRequest {
	/// Returns `true` when the request carries no identifier.
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}
}

/// JSON-RPC 2.0 response envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	/// Protocol marker; always `2.0`.
	pub jsonrpc: String,
	/// Identifier of the request being answered.
	pub id: Value,
	/// Successful result payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error payload.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}
impl JsonRpcResponse {
	/// Builds a success response.
	pub fn success(id: Value, result: Value) -> Self {
		Self { jsonrpc: JSONRPC_VERSION.into(), id, result: Some(result), error: None }
	}

	/// Builds an error response.
	pub fn failure(id: Value, error: JsonRpcError) -> Self {
		Self { jsonrpc: JSONRPC_VERSION.into(), id, result: None, error: Some(error) }
	}
}

/// JSON-RPC 2.0 error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
	/// Standard JSON-RPC error code.
	pub code: i32,
	/// Human-readable message.
	pub message: String,
	/// Optional structured detail.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}
impl JsonRpcError {
	/// `-32700`, body was not valid JSON.
	pub fn parse_error() -> Self {
		Self { code: -32700, message: "Parse error".into(), data: None }
	}

	/// `-32600`, envelope was not a valid JSON-RPC request.
	pub fn invalid_request() -> Self {
		Self { code: -32600, message: "Invalid Request".into(), data: None }
	}

	/// `-32601`, unknown method.
	pub fn method_not_found(method: &str) -> Self {
		Self { code: -32601, message: format!("Method not found: {method}"), data: None }
	}

	/// `-32602`, parameters failed validation.
	pub fn invalid_params(message: impl Into<String>) -> Self {
		Self { code: -32602, message: message.into(), data: None }
	}

	/// `-32603`, server-side failure.
	pub fn internal_error(message: impl Into<String>) -> Self {
		Self { code: -32603, message: message.into(), data: None }
	}
}

/// Tool descriptor advertised by `tools/list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
	/// Tool name used in `tools/call`.
	pub name: String,
	/// Human-readable description.
	pub description: String,
	/// JSON Schema of the tool's arguments.
	pub input_schema: Value,
}

/// `tools/list` result payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListToolsResult {
	/// Advertised tool descriptors.
	pub tools: Vec<ToolSchema>,
}

/// `tools/call` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallToolParams {
	/// Tool name to invoke.
	pub name: String,
	/// Tool arguments, defaulting to an empty object.
	#[serde(default)]
	pub arguments: Value,
}

/// `tools/call` result payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
	/// Content blocks produced by the tool.
	pub content: Vec<ToolContent>,
	/// Set when the tool itself reported a failure.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_error: Option<bool>,
}
impl CallToolResult {
	/// Wraps plain text in a successful result.
	pub fn text(text: impl Into<String>) -> Self {
		Self { content: vec![ToolContent::text(text)], is_error: None }
	}

	/// Wraps an error message in a failed result.
	pub fn failed(text: impl Into<String>) -> Self {
		Self { content: vec![ToolContent::text(text)], is_error: Some(true) }
	}
}

/// Content block inside a [`CallToolResult`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
	/// Plain text block.
	Text {
		/// The text payload.
		text: String,
	},
}
impl ToolContent {
	/// Builds a text content block.
	pub fn text(text: impl Into<String>) -> Self {
		Self::Text { text: text.into() }
	}
}

/// `initialize` result payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
	/// Protocol revision the server speaks.
	pub protocol_version: String,
	/// Advertised capability set.
	pub capabilities: ServerCapabilities,
	/// Server identity.
	pub server_info: ServerInfo,
}

/// Capability set advertised during `initialize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerCapabilities {
	/// Tool-related capabilities.
	pub tools: ToolsCapability,
}

/// Tool capability flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
	/// Whether the tool list can change mid-session.
	pub list_changed: bool,
}

/// Server identity advertised during `initialize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerInfo {
	/// Server name.
	pub name: String,
	/// Server version.
	pub version: String,
}

/// Failures surfaced by a [`SchedulerBackend`].
#[derive(Debug, ThisError)]
pub enum SchedulerError {
	/// The requested tool is not part of the scheduler's surface.
	#[error("Unknown tool {name}.")]
	UnknownTool {
		/// Tool name the caller requested.
		name: String,
	},
	/// The backend failed while executing the tool.
	#[error("Scheduler backend failed: {message}.")]
	Backend {
		/// Backend-supplied failure summary.
		message: String,
	},
}

/// Boxed future returned by backend calls.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Seam to the actual post-scheduler tool server.
///
/// Implementations receive the caller's [`BoundCredential`] on every call and
/// must not retain the decrypted token beyond the call.
pub trait SchedulerBackend
where
	Self: Send + Sync,
{
	/// Tool descriptors advertised to clients.
	fn tools(&self) -> Vec<ToolSchema>;

	/// Executes one tool call with the caller's credential.
	fn call<'a>(
		&'a self,
		name: &'a str,
		arguments: Value,
		credential: &'a BoundCredential,
	) -> BackendFuture<'a, Result<CallToolResult, SchedulerError>>;
}

/// Routes JSON-RPC requests to the scheduler backend.
#[derive(Clone)]
pub struct McpDispatcher {
	backend: Arc<dyn SchedulerBackend>,
	server_info: ServerInfo,
}
impl McpDispatcher {
	/// Creates a dispatcher announcing this crate's name and version.
	pub fn new(backend: Arc<dyn SchedulerBackend>) -> Self {
		Self {
			backend,
			server_info: ServerInfo {
				name: env!("CARGO_PKG_NAME").into(),
				version: env!("CARGO_PKG_VERSION").into(),
			},
		}
	}

	/// Handles one request; returns `None` for notifications.
	pub async fn dispatch(
		&self,
		credential: &BoundCredential,
		request: JsonRpcRequest,
	) -> Option<JsonRpcResponse> {
		if request.is_notification() {
			return None;
		}

		let id = request.id.clone().unwrap_or(Value::Null);

		if request.jsonrpc != JSONRPC_VERSION {
			return Some(JsonRpcResponse::failure(id, JsonRpcError::invalid_request()));
		}

		let response = match request.method.as_str() {
			"initialize" => self.initialize(id),
			"ping" => JsonRpcResponse::success(id, Value::Object(Default::default())),
			"tools/list" => self.list_tools(id),
			"tools/call" => self.call_tool(id, request.params, credential).await,
			method => JsonRpcResponse::failure(id, JsonRpcError::method_not_found(method)),
		};

		Some(response)
	}

	fn initialize(&self, id: Value) -> JsonRpcResponse {
		let result = InitializeResult {
			protocol_version: PROTOCOL_VERSION.into(),
			capabilities: ServerCapabilities { tools: ToolsCapability { list_changed: false } },
			server_info: self.server_info.clone(),
		};

		serialize_result(id, &result)
	}

	fn list_tools(&self, id: Value) -> JsonRpcResponse {
		serialize_result(id, &ListToolsResult { tools: self.backend.tools() })
	}

	async fn call_tool(
		&self,
		id: Value,
		params: Option<Value>,
		credential: &BoundCredential,
	) -> JsonRpcResponse {
		let params: CallToolParams = match params {
			Some(value) => match serde_json::from_value(value) {
				Ok(parsed) => parsed,
				Err(e) =>
					return JsonRpcResponse::failure(id, JsonRpcError::invalid_params(e.to_string())),
			},
			None =>
				return JsonRpcResponse::failure(
					id,
					JsonRpcError::invalid_params("tools/call requires parameters"),
				),
		};

		tracing::debug!(tool = %params.name, principal = %credential.principal, "tool call");

		match self.backend.call(&params.name, params.arguments, credential).await {
			Ok(result) => serialize_result(id, &result),
			Err(SchedulerError::UnknownTool { name }) => JsonRpcResponse::failure(
				id,
				JsonRpcError::invalid_params(format!("Unknown tool: {name}")),
			),
			Err(SchedulerError::Backend { message }) =>
				serialize_result(id, &CallToolResult::failed(message)),
		}
	}
}

fn serialize_result(id: Value, result: &impl Serialize) -> JsonRpcResponse {
	match serde_json::to_value(result) {
		Ok(value) => JsonRpcResponse::success(id, value),
		Err(e) => JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string())),
	}
}

/// In-process backend used by tests and the demo server.
///
/// Echoes the tool name and the bound principal, which is enough to assert
/// per-user credential isolation end to end.
#[cfg(any(test, feature = "test"))]
#[derive(Clone, Debug, Default)]
pub struct StaticSchedulerBackend;
#[cfg(any(test, feature = "test"))]
impl StaticSchedulerBackend {
	/// Tool names the scheduler surface exposes.
	pub const TOOL_NAMES: [&'static str; 8] = [
		"schedule_post",
		"list_scheduled_posts",
		"get_scheduled_post",
		"cancel_scheduled_post",
		"update_scheduled_post",
		"reschedule_post",
		"retry_failed_post",
		"queue_summary",
	];
}
#[cfg(any(test, feature = "test"))]
impl SchedulerBackend for StaticSchedulerBackend {
	fn tools(&self) -> Vec<ToolSchema> {
		Self::TOOL_NAMES
			.iter()
			.map(|name| ToolSchema {
				name: (*name).into(),
				description: format!("Static test stand-in for {name}."),
				input_schema: serde_json::json!({ "type": "object" }),
			})
			.collect()
	}

	fn call<'a>(
		&'a self,
		name: &'a str,
		arguments: Value,
		credential: &'a BoundCredential,
	) -> BackendFuture<'a, Result<CallToolResult, SchedulerError>> {
		Box::pin(async move {
			if !Self::TOOL_NAMES.contains(&name) {
				return Err(SchedulerError::UnknownTool { name: name.to_owned() });
			}

			let echo = serde_json::json!({
				"tool": name,
				"principal": credential.principal.as_ref(),
				"arguments": arguments,
			});

			Ok(CallToolResult::text(echo.to_string()))
		})
	}
}
