//! MCP request handlers
//!
//! Resources: registered documents, `remarkable://doc/{name}`,
//! `remarkable://folders` and `remarkable://recent`. Tools:
//! `remarkable_read` and `remarkable_browse`.
//!
//! Resource reads always answer with text; store and extraction failures are
//! rendered into the text rather than returned as protocol errors.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::extract::{extract_document, ExtractedContent};
use crate::library::{
    build_path_index, complete_document_names, find_by_path, find_similar_documents, folders_view,
    recent_view, resolve_path, PathIndex, RECENT_LIMIT, SUGGESTION_LIMIT,
};
use crate::ocr::{OcrContext, SamplingClient};
use crate::state::AppState;
use crate::storage::Item;

use super::peer::ClientPeer;
use super::protocol::{error_codes, methods, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVER_NAME};

pub const FOLDERS_URI: &str = "remarkable://folders";
pub const RECENT_URI: &str = "remarkable://recent";
pub const DOC_TEMPLATE: &str = "remarkable://doc/{name}";
const DOC_PREFIX: &str = "remarkable://doc/";

pub const READ_TOOL: &str = "remarkable_read";
pub const BROWSE_TOOL: &str = "remarkable_browse";

const INSTRUCTIONS: &str = "Read documents from a reMarkable tablet. Use remarkable_browse to \
explore folders and remarkable_read to fetch a document's text; pass include_ocr to recognise \
handwriting.";

/// Message for a name lookup that matched nothing
pub fn not_found_message(name: &str, suggestions: &[String]) -> String {
    let mut message = format!("Document not found: '{}'", name);
    if !suggestions.is_empty() {
        message.push_str(&format!("\n\nDid you mean: {}?", suggestions.join(", ")));
    }
    message
}

fn string_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

fn document_names(items: &[Item]) -> impl Iterator<Item = &str> {
    items
        .iter()
        .filter(|item| !item.is_folder)
        .map(|item| item.display_name.as_str())
}

/// Dispatches requests for one client session
pub struct Handlers {
    state: AppState,
    peer: Arc<ClientPeer>,
}

impl Handlers {
    pub fn new(state: AppState, peer: Arc<ClientPeer>) -> Self {
        Self { state, peer }
    }

    /// Handle one request; `None` for notifications
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let params = request.params.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            methods::INITIALIZED | methods::CANCELLED => {
                tracing::debug!("Notification: {}", request.method);
                return None;
            }
            methods::INITIALIZE => Ok(self.initialize(&params)),
            methods::PING => Ok(json!({})),
            methods::RESOURCES_LIST => Ok(self.list_resources()),
            methods::RESOURCES_TEMPLATES_LIST => Ok(self.list_resource_templates()),
            methods::RESOURCES_READ => self.read_resource(&params).await,
            methods::COMPLETION_COMPLETE => Ok(self.complete(&params).await),
            methods::TOOLS_LIST => Ok(self.list_tools()),
            methods::TOOLS_CALL => self.call_tool(&params).await,
            other => {
                if request.is_notification() {
                    tracing::debug!("Ignoring unknown notification: {}", other);
                    return None;
                }
                return Some(JsonRpcResponse::error(
                    request.id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                ));
            }
        };

        if request.is_notification() {
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, e.json_rpc_code(), e.to_string()),
        })
    }

    fn ocr_context(&self) -> OcrContext {
        if self.peer.supports_sampling() {
            OcrContext::with_sampling(self.peer.clone() as Arc<dyn SamplingClient>)
        } else {
            OcrContext::default()
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let sampling = params.pointer("/capabilities/sampling").is_some();
        self.peer.set_supports_sampling(sampling);

        let client = params
            .pointer("/clientInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(client, sampling, "Client initialized");

        json!({
            "protocolVersion": string_param(params, "protocolVersion").unwrap_or(PROTOCOL_VERSION),
            "capabilities": {
                "resources": {"subscribe": false, "listChanged": false},
                "tools": {"listChanged": false},
                "completions": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": INSTRUCTIONS
        })
    }

    fn list_resources(&self) -> Value {
        let mut resources = vec![
            json!({
                "uri": FOLDERS_URI,
                "name": "Folders",
                "description": "All folders on the tablet",
                "mimeType": "application/json"
            }),
            json!({
                "uri": RECENT_URI,
                "name": "Recent documents",
                "description": format!("The {} most recently modified documents", RECENT_LIMIT),
                "mimeType": "application/json"
            }),
        ];

        resources.extend(self.state.registry().entries().into_iter().map(|entry| {
            json!({
                "uri": entry.uri,
                "name": entry.label,
                "description": entry.description,
                "mimeType": "text/plain"
            })
        }));

        json!({ "resources": resources })
    }

    fn list_resource_templates(&self) -> Value {
        json!({
            "resourceTemplates": [{
                "uriTemplate": DOC_TEMPLATE,
                "name": "Document by Name",
                "description": "Read a reMarkable document by name. Use remarkable_browse() to find documents.",
                "mimeType": "text/plain"
            }]
        })
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.state.store().list_items(None).await?)
    }

    async fn extract(&self, item: &Item, include_ocr: bool) -> Result<ExtractedContent> {
        let bytes = self.state.store().download(item).await?;
        let ctx = self.ocr_context();
        let ocr = include_ocr.then_some((self.state.ocr(), &ctx));
        Ok(extract_document(&bytes, ocr).await?)
    }

    async fn document_text(&self, item: &Item) -> String {
        match self.extract(item, false).await {
            Ok(content) => content.to_text(),
            Err(e) => {
                tracing::warn!(item_id = %item.id, "Failed to read document: {}", e);
                format!("Error reading document: {}", e)
            }
        }
    }

    async fn read_by_name(&self, name: &str) -> String {
        let items = match self.list_items().await {
            Ok(items) => items,
            Err(e) => return format!("Error reading document: {}", e),
        };

        match items.iter().find(|item| !item.is_folder && item.display_name == name) {
            Some(item) => self.document_text(item).await,
            None => {
                let suggestions = find_similar_documents(name, document_names(&items), SUGGESTION_LIMIT);
                not_found_message(name, &suggestions)
            }
        }
    }

    async fn read_resource(&self, params: &Value) -> Result<Value> {
        let uri = string_param(params, "uri")
            .ok_or_else(|| AppError::BadRequest("Missing 'uri'".to_string()))?;

        let (mime_type, text) = match uri {
            FOLDERS_URI => (
                "application/json",
                match self.list_items().await {
                    Ok(items) => serde_json::to_string_pretty(&folders_view(&items))?,
                    Err(e) => format!("Error listing folders: {}", e),
                },
            ),
            RECENT_URI => (
                "application/json",
                match self.list_items().await {
                    Ok(items) => serde_json::to_string_pretty(&recent_view(&items, RECENT_LIMIT))?,
                    Err(e) => format!("Error listing documents: {}", e),
                },
            ),
            _ if uri.starts_with(DOC_PREFIX) => {
                let raw = &uri[DOC_PREFIX.len()..];
                let name = urlencoding::decode(raw)
                    .map(|n| n.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                ("text/plain", self.read_by_name(&name).await)
            }
            _ => {
                let entry = self
                    .state
                    .registry()
                    .get_by_uri(uri)
                    .ok_or_else(|| AppError::NotFound(format!("Unknown resource: {}", uri)))?;
                ("text/plain", self.document_text(&entry.item).await)
            }
        };

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": mime_type,
                "text": text
            }]
        }))
    }

    async fn complete(&self, params: &Value) -> Value {
        let is_doc_template = params.pointer("/ref/type").and_then(Value::as_str) == Some("ref/resource")
            && params.pointer("/ref/uri").and_then(Value::as_str) == Some(DOC_TEMPLATE)
            && params.pointer("/argument/name").and_then(Value::as_str) == Some("name");

        let values = if is_doc_template {
            let partial = params
                .pointer("/argument/value")
                .and_then(Value::as_str)
                .unwrap_or("");
            match self.list_items().await {
                Ok(items) => complete_document_names(&items, partial),
                Err(e) => {
                    tracing::debug!("Completion listing failed: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        json!({
            "completion": {
                "values": values,
                "total": values.len(),
                "hasMore": false
            }
        })
    }

    fn list_tools(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": READ_TOOL,
                    "description": "Read the text of a reMarkable document: typed text, highlights and, \
                        with include_ocr, recognised handwriting.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "document": {
                                "type": "string",
                                "description": "Document name or full path, e.g. 'Meeting Notes' or '/Work/Meeting Notes'"
                            },
                            "include_ocr": {
                                "type": "boolean",
                                "description": "Run handwriting recognition on notebook pages",
                                "default": false
                            }
                        },
                        "required": ["document"]
                    }
                },
                {
                    "name": BROWSE_TOOL,
                    "description": "List the folders and documents inside a folder.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "path": {
                                "type": "string",
                                "description": "Folder path, '/' for the root",
                                "default": "/"
                            }
                        }
                    }
                }
            ]
        })
    }

    async fn call_tool(&self, params: &Value) -> Result<Value> {
        let name = string_param(params, "name")
            .ok_or_else(|| AppError::BadRequest("Missing tool name".to_string()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let outcome = match name {
            READ_TOOL => self.read_tool(&arguments).await,
            BROWSE_TOOL => self.browse_tool(&arguments).await,
            other => return Err(AppError::BadRequest(format!("Unknown tool: {}", other))),
        };

        Ok(match outcome {
            Ok(text) => json!({
                "content": [{"type": "text", "text": text}],
                "isError": false
            }),
            Err(e) => json!({
                "content": [{"type": "text", "text": tool_error_text(&e)}],
                "isError": true
            }),
        })
    }

    async fn read_tool(&self, arguments: &Value) -> Result<String> {
        let document = string_param(arguments, "document")
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AppError::BadRequest("'document' is required".to_string()))?;
        let include_ocr = arguments
            .get("include_ocr")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let items = self.list_items().await?;
        let index = build_path_index(&items);
        let item = find_document(&items, &index, document).ok_or_else(|| {
            let suggestions = find_similar_documents(document, document_names(&items), SUGGESTION_LIMIT);
            AppError::NotFound(not_found_message(document, &suggestions))
        })?;

        if item.is_folder {
            return Err(AppError::BadRequest(format!(
                "'{}' is a folder. Use {} to list its contents.",
                document, BROWSE_TOOL
            )));
        }

        let content = self.extract(item, include_ocr).await?;
        let mut result = json!({
            "document": item.display_name,
            "path": resolve_path(item, &index),
            "uri": self.state.registry().uri_for(&item.id),
            "page_count": content.page_count,
            "content": content.to_text(),
            "modified": item.modified_at.map(|dt| dt.to_rfc3339()),
        });
        if include_ocr {
            result["ocr_backend"] = json!(content.ocr_backend.map(|b| b.to_string()));
        }

        Ok(serde_json::to_string_pretty(&result)?)
    }

    async fn browse_tool(&self, arguments: &Value) -> Result<String> {
        let path = string_param(arguments, "path").unwrap_or("/").trim();
        let items = self.list_items().await?;
        let index = build_path_index(&items);

        let folder_id = if path.trim_matches('/').is_empty() {
            None
        } else {
            match find_by_path(&items, &index, path) {
                Some(item) if item.is_folder => Some(item.id.as_str()),
                Some(_) => {
                    return Err(AppError::BadRequest(format!(
                        "'{}' is a document. Use {} to read it.",
                        path, READ_TOOL
                    )))
                }
                None => return Err(AppError::NotFound(format!("Folder not found: '{}'", path))),
            }
        };

        let children: Vec<&Item> = items
            .iter()
            .filter(|item| parent_in_index(item, &index) == folder_id)
            .collect();

        let mut folders: Vec<&str> = children
            .iter()
            .filter(|item| item.is_folder)
            .map(|item| item.display_name.as_str())
            .collect();
        folders.sort_unstable();

        let mut documents: Vec<Value> = children
            .iter()
            .filter(|item| !item.is_folder)
            .map(|item| {
                json!({
                    "name": item.display_name,
                    "id": item.id,
                    "modified": item.modified_at.map(|dt| dt.to_rfc3339()),
                })
            })
            .collect();
        documents.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let display_path = if folder_id.is_none() {
            "/".to_string()
        } else {
            format!("/{}", path.trim_matches('/'))
        };

        Ok(serde_json::to_string_pretty(&json!({
            "path": display_path,
            "folders": folders,
            "documents": documents,
        }))?)
    }
}

/// Tool failures are shown to the model as plain messages
fn tool_error_text(error: &AppError) -> String {
    match error {
        AppError::NotFound(message) | AppError::BadRequest(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Parent id when it names a known item; unknown parents count as the root
fn parent_in_index<'a>(item: &'a Item, index: &PathIndex) -> Option<&'a str> {
    item.parent_id
        .as_deref()
        .filter(|id| !id.is_empty() && index.contains_key(*id))
}

/// Look a document up by full path, exact name, then case-insensitive name
fn find_document<'a>(items: &'a [Item], index: &PathIndex, query: &str) -> Option<&'a Item> {
    if query.starts_with('/') {
        return find_by_path(items, index, query);
    }
    items
        .iter()
        .find(|item| !item.is_folder && item.display_name == query)
        .or_else(|| {
            let lower = query.to_lowercase();
            items
                .iter()
                .find(|item| !item.is_folder && item.display_name.to_lowercase() == lower)
        })
        .or_else(|| items.iter().find(|item| item.is_folder && item.display_name == query))
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::super::protocol::JsonRpcId;
    use super::*;
    use crate::config::{Config, LoadMode};
    use crate::extract::tests::build_archive;
    use crate::extract::NO_TEXT_PLACEHOLDER;
    use crate::ocr::testing::ScriptedEngine;
    use crate::ocr::{OcrBackend, OcrBackendSetting, OcrDispatcher, OcrEngine};
    use crate::storage::testing::MemoryStore;

    fn handlers() -> (Handlers, mpsc::UnboundedReceiver<String>) {
        let ocr = OcrDispatcher::from_config(&Config::default().ocr);
        handlers_with_ocr(ocr)
    }

    fn handlers_with_ocr(ocr: OcrDispatcher) -> (Handlers, mpsc::UnboundedReceiver<String>) {
        let mut store = MemoryStore::new(vec![
            Item::folder("f1", "Work"),
            Item::folder("f2", "Meetings").with_parent("f1"),
            Item::document("d1", "Meeting Notes").with_parent("f2"),
            Item::document("d2", "Grocery List"),
            Item::document("d3", "Sketch").with_parent("f1"),
        ]);
        store.archives.insert(
            "d1".to_string(),
            build_archive(&[("d1.content", br#"{"text": "agenda"}"#), ("d1/p1.rm", b"ink")]),
        );
        store.archives.insert("d3".to_string(), build_archive(&[("d3/p1.rm", b"ink")]));

        let mut config = Config::default();
        config.registry.load_mode = Some(LoadMode::Eager);
        let state = AppState::with_parts(config, Arc::new(store), Arc::new(ocr));

        let (tx, rx) = mpsc::unbounded_channel();
        (Handlers::new(state, Arc::new(ClientPeer::new(tx))), rx)
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(Some(JsonRpcId::Number(1)), method, Some(params))
    }

    async fn call(handlers: &Handlers, method: &str, params: Value) -> Value {
        let response = handlers.dispatch(request(method, params)).await.unwrap();
        assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
        response.result.unwrap()
    }

    async fn read_text(handlers: &Handlers, uri: &str) -> String {
        let result = call(handlers, methods::RESOURCES_READ, json!({"uri": uri})).await;
        result["contents"][0]["text"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_initialize_records_sampling() {
        let (handlers, _rx) = handlers();
        let result = call(
            &handlers,
            methods::INITIALIZE,
            json!({"protocolVersion": "2024-11-05", "capabilities": {"sampling": {}}}),
        )
        .await;

        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert!(handlers.peer.supports_sampling());
        assert!(handlers.ocr_context().supports_sampling());
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let (handlers, _rx) = handlers();
        let note = JsonRpcRequest::new(None, methods::INITIALIZED, None);
        assert!(handlers.dispatch(note).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (handlers, _rx) = handlers();
        let response = handlers.dispatch(request("nope", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_registered_documents_listed_and_readable() {
        let (handlers, _rx) = handlers();
        handlers.state.populate_registry().await;

        let result = call(&handlers, methods::RESOURCES_LIST, json!({})).await;
        let uris: Vec<&str> = result["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uri"].as_str().unwrap())
            .collect();
        assert!(uris.contains(&FOLDERS_URI));
        assert!(uris.contains(&"remarkable:///Work/Meetings/Meeting%20Notes.txt"));

        let text = read_text(&handlers, "remarkable:///Work/Meetings/Meeting%20Notes.txt").await;
        assert_eq!(text, "agenda");
    }

    #[tokio::test]
    async fn test_doc_by_name_and_suggestions() {
        let (handlers, _rx) = handlers();

        assert_eq!(read_text(&handlers, "remarkable://doc/Meeting%20Notes").await, "agenda");
        assert_eq!(read_text(&handlers, "remarkable://doc/Sketch").await, NO_TEXT_PLACEHOLDER);

        let missing = read_text(&handlers, "remarkable://doc/meeting").await;
        assert!(missing.starts_with("Document not found: 'meeting'"));
        assert!(missing.contains("Did you mean: Meeting Notes"));

        let unreadable = read_text(&handlers, "remarkable://doc/Grocery List").await;
        assert!(unreadable.starts_with("Error reading document:"));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_error() {
        let (handlers, _rx) = handlers();
        let response = handlers
            .dispatch(request(methods::RESOURCES_READ, json!({"uri": "remarkable:///nope.txt"})))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, error_codes::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_folders_view_resource() {
        let (handlers, _rx) = handlers();
        let text = read_text(&handlers, FOLDERS_URI).await;
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["folders"][0]["path"], "/Work");
        assert_eq!(json["folders"][1]["path"], "/Work/Meetings");
    }

    #[tokio::test]
    async fn test_completion() {
        let (handlers, _rx) = handlers();
        let result = call(
            &handlers,
            methods::COMPLETION_COMPLETE,
            json!({
                "ref": {"type": "ref/resource", "uri": DOC_TEMPLATE},
                "argument": {"name": "name", "value": "LIST"}
            }),
        )
        .await;
        assert_eq!(result["completion"]["values"], json!(["Grocery List"]));

        let other = call(
            &handlers,
            methods::COMPLETION_COMPLETE,
            json!({"ref": {"type": "ref/prompt", "name": "x"}, "argument": {"name": "name", "value": ""}}),
        )
        .await;
        assert_eq!(other["completion"]["values"], json!([]));
    }

    #[tokio::test]
    async fn test_read_tool() {
        let (handlers, _rx) = handlers();
        let result = call(
            &handlers,
            methods::TOOLS_CALL,
            json!({"name": READ_TOOL, "arguments": {"document": "/Work/Meetings/Meeting Notes"}}),
        )
        .await;
        assert_eq!(result["isError"], false);
        let body: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["content"], "agenda");
        assert_eq!(body["page_count"], 1);

        let missing = call(
            &handlers,
            methods::TOOLS_CALL,
            json!({"name": READ_TOOL, "arguments": {"document": "Grocery"}}),
        )
        .await;
        assert_eq!(missing["isError"], true);
        assert!(missing["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Did you mean: Grocery List"));
    }

    #[tokio::test]
    async fn test_browse_tool() {
        let (handlers, _rx) = handlers();
        let root = call(&handlers, methods::TOOLS_CALL, json!({"name": BROWSE_TOOL})).await;
        let body: Value = serde_json::from_str(root["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["folders"], json!(["Work"]));
        assert_eq!(body["documents"][0]["name"], "Grocery List");

        let work = call(
            &handlers,
            methods::TOOLS_CALL,
            json!({"name": BROWSE_TOOL, "arguments": {"path": "/Work/"}}),
        )
        .await;
        let body: Value = serde_json::from_str(work["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["path"], "/Work");
        assert_eq!(body["folders"], json!(["Meetings"]));
        assert_eq!(body["documents"][0]["name"], "Sketch");

        let missing = call(
            &handlers,
            methods::TOOLS_CALL,
            json!({"name": BROWSE_TOOL, "arguments": {"path": "/Nope"}}),
        )
        .await;
        assert_eq!(missing["isError"], true);
    }

    #[tokio::test]
    async fn test_read_tool_reports_backend_that_produced_text() {
        let vision = ScriptedEngine::new(OcrBackend::VisionApi, true).with_script(vec![Ok(None)]);
        let local = ScriptedEngine::new(OcrBackend::LocalOcr, true)
            .with_script(vec![Ok(Some("handwriting".to_string()))]);
        let engines: Vec<Arc<dyn OcrEngine>> = vec![Arc::new(vision), Arc::new(local)];
        let (handlers, _rx) = handlers_with_ocr(OcrDispatcher::new(OcrBackendSetting::Auto, engines));

        let result = call(
            &handlers,
            methods::TOOLS_CALL,
            json!({"name": READ_TOOL, "arguments": {"document": "Sketch", "include_ocr": true}}),
        )
        .await;
        let body: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["ocr_backend"], "tesseract");
        assert!(body["content"].as_str().unwrap().contains("handwriting"));
    }
}
