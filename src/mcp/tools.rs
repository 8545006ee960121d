// Catalog tools exposed over MCP.
//
// Invalid input is not a protocol error: the tool answers with a text block
// holding `{"formErrors": [...], "fieldErrors": {field: [...]}}`.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::protocol::{McpError, ToolDefinition, ToolsCallResult};
use crate::models::{now_millis, ItemFields};
use crate::store::{CatalogStore, Direction, ItemQuery, SortField};

type ToolResult = Result<ToolsCallResult, McpError>;

/// Validation failures, grouped the way form libraries report them.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedErrors {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl FlattenedErrors {
    fn field(&mut self, name: &str, message: impl Into<String>) {
        self.field_errors
            .entry(name.to_string())
            .or_default()
            .push(message.into());
    }

    fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Validator<'a> {
    args: &'a Map<String, Value>,
    errors: FlattenedErrors,
}

impl<'a> Validator<'a> {
    fn new(args: &'a Map<String, Value>) -> Self {
        Self {
            args,
            errors: FlattenedErrors::default(),
        }
    }

    /// `non_empty` fields (ids, titles) are trimmed and must not be blank;
    /// free text is kept as given.
    fn string(&mut self, name: &str, required: bool, non_empty: bool) -> Option<String> {
        match self.args.get(name) {
            None | Some(Value::Null) => {
                if required {
                    self.errors.field(name, "Required");
                }
                None
            }
            Some(Value::String(s)) if non_empty && s.trim().is_empty() => {
                self.errors
                    .field(name, "String must contain at least 1 character(s)");
                None
            }
            Some(Value::String(s)) if non_empty => Some(s.trim().to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.errors.field(
                    name,
                    format!("Expected string, received {}", type_name(other)),
                );
                None
            }
        }
    }

    fn integer(&mut self, name: &str) -> Option<i64> {
        match self.args.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(n) => Some(n),
                None => {
                    self.errors.field(name, "Expected integer, received float");
                    None
                }
            },
            Some(other) => {
                self.errors.field(
                    name,
                    format!("Expected number, received {}", type_name(other)),
                );
                None
            }
        }
    }

    fn string_list(&mut self, name: &str) -> Option<Vec<String>> {
        match self.args.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => {
                let strings: Option<Vec<String>> = values
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                if strings.is_none() {
                    self.errors.field(name, "Expected array of strings");
                }
                strings
            }
            Some(other) => {
                self.errors.field(
                    name,
                    format!("Expected array, received {}", type_name(other)),
                );
                None
            }
        }
    }

    /// Writable item fields; the title is required on create only.
    fn item_fields(&mut self, title_required: bool) -> ItemFields {
        let year = self.integer("year").and_then(|y| match i32::try_from(y) {
            Ok(y) => Some(y),
            Err(_) => {
                self.errors.field("year", "Number out of range");
                None
            }
        });

        ItemFields {
            title: self.string("title", title_required, true),
            name: self.string("name", false, false),
            year,
            actors: self.string_list("actors"),
            genre: self.string_list("genre"),
            poster_link: self.string("poster_link", false, false),
            landscape_poster_link: self.string("landscape_poster_link", false, false),
            description: self.string("description", false, false),
        }
    }

    fn finish<T>(self, value: T) -> Result<T, FlattenedErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }
}

fn item_properties() -> Value {
    json!({
        "title": { "type": "string" },
        "name": { "type": "string" },
        "year": { "type": "integer" },
        "actors": { "type": "array", "items": { "type": "string" } },
        "genre": { "type": "array", "items": { "type": "string" } },
        "poster_link": { "type": "string" },
        "landscape_poster_link": { "type": "string" },
        "description": { "type": "string" }
    })
}

pub fn definitions() -> Vec<ToolDefinition> {
    let tool = |name: &str, description: &str, input_schema: Value| ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    };

    let mut update_properties = item_properties();
    update_properties["id"] = json!({ "type": "string" });

    vec![
        tool(
            "listItems",
            "List items ordered by createdAt desc",
            json!({ "type": "object", "properties": { "limit": { "type": "number" } } }),
        ),
        tool(
            "getItem",
            "Get one item by id",
            json!({ "type": "object", "required": ["id"], "properties": { "id": { "type": "string" } } }),
        ),
        tool(
            "createItem",
            "Create an item",
            json!({ "type": "object", "required": ["title"], "properties": item_properties() }),
        ),
        tool(
            "updateItem",
            "Update an existing item",
            json!({ "type": "object", "required": ["id"], "properties": update_properties }),
        ),
        tool(
            "deleteItem",
            "Delete an item by id",
            json!({ "type": "object", "required": ["id"], "properties": { "id": { "type": "string" } } }),
        ),
    ]
}

fn json_result<T: Serialize>(value: &T) -> ToolResult {
    ToolsCallResult::json(value).map_err(|e| McpError::InternalError(e.to_string()))
}

fn invalid(errors: FlattenedErrors) -> ToolResult {
    json_result(&errors)
}

fn not_found() -> ToolResult {
    json_result(&json!({ "error": "Not found" }))
}

fn store_failure(tool: &str, e: crate::store::StoreError) -> McpError {
    tracing::error!("{} failed: {}", tool, e);
    McpError::InternalError(format!("{} failed", tool))
}

/// Run a tool by name. Unknown names are a protocol error.
pub async fn call(store: &dyn CatalogStore, name: &str, arguments: Value) -> ToolResult {
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return invalid(FlattenedErrors {
                form_errors: vec![format!("Expected object, received {}", type_name(&other))],
                ..Default::default()
            })
        }
    };

    match name {
        "listItems" => list_items(store, &args).await,
        "getItem" => get_item(store, &args).await,
        "createItem" => create_item(store, &args).await,
        "updateItem" => update_item(store, &args).await,
        "deleteItem" => delete_item(store, &args).await,
        other => Err(McpError::MethodNotFound(format!("Unknown tool: {}", other))),
    }
}

async fn list_items(store: &dyn CatalogStore, args: &Map<String, Value>) -> ToolResult {
    let mut v = Validator::new(args);
    let limit = v.integer("limit");
    let limit = match v.finish(limit) {
        Ok(limit) => limit,
        Err(errors) => return invalid(errors),
    };

    let mut query = ItemQuery::ordered(SortField::CreatedAt, Direction::Desc);
    query.limit = limit.filter(|l| *l > 0).map(|l| l as usize);

    let items = store
        .list(&query)
        .await
        .map_err(|e| store_failure("listItems", e))?;
    json_result(&items)
}

fn required_id(args: &Map<String, Value>) -> Result<String, FlattenedErrors> {
    let mut v = Validator::new(args);
    let id = v.string("id", true, true);
    v.finish(id.unwrap_or_default())
}

async fn get_item(store: &dyn CatalogStore, args: &Map<String, Value>) -> ToolResult {
    let id = match required_id(args) {
        Ok(id) => id,
        Err(errors) => return invalid(errors),
    };

    match store.get(&id).await.map_err(|e| store_failure("getItem", e))? {
        Some(item) => json_result(&item),
        None => not_found(),
    }
}

async fn create_item(store: &dyn CatalogStore, args: &Map<String, Value>) -> ToolResult {
    let mut v = Validator::new(args);
    let fields = v.item_fields(true);
    let fields = match v.finish(fields) {
        Ok(fields) => fields,
        Err(errors) => return invalid(errors),
    };

    let item = store
        .create(&fields, now_millis())
        .await
        .map_err(|e| store_failure("createItem", e))?;
    tracing::info!("MCP created item {}", item.id);
    json_result(&item)
}

async fn update_item(store: &dyn CatalogStore, args: &Map<String, Value>) -> ToolResult {
    let mut v = Validator::new(args);
    let id = v.string("id", true, true);
    let patch = v.item_fields(false);
    let (id, patch) = match v.finish((id.unwrap_or_default(), patch)) {
        Ok(valid) => valid,
        Err(errors) => return invalid(errors),
    };

    match store
        .update(&id, &patch, now_millis())
        .await
        .map_err(|e| store_failure("updateItem", e))?
    {
        Some(item) => json_result(&item),
        None => not_found(),
    }
}

async fn delete_item(store: &dyn CatalogStore, args: &Map<String, Value>) -> ToolResult {
    let id = match required_id(args) {
        Ok(id) => id,
        Err(errors) => return invalid(errors),
    };

    if store
        .delete(&id)
        .await
        .map_err(|e| store_failure("deleteItem", e))?
    {
        json_result(&json!({ "ok": true, "id": id }))
    } else {
        not_found()
    }
}
