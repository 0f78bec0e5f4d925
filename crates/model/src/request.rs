use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ToolCallRequest;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRequest {
    /// The input messages, system instructions first if any.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
}

/// The role of a message's author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// A tool result fed back to the model.
    Tool,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "snake_case")]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant turn, possibly requesting tool calls.
    Assistant(AssistantMessage),
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Creates a text-only assistant message.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::Assistant(AssistantMessage {
            content: content.into(),
            tool_calls: vec![],
        })
    }

    /// Returns the role of this message.
    #[inline]
    pub fn role(&self) -> Role {
        match self {
            ModelMessage::System(_) => Role::System,
            ModelMessage::User(_) => Role::User,
            ModelMessage::Assistant(_) => Role::Assistant,
            ModelMessage::Tool(_) => Role::Tool,
        }
    }

    /// Returns the tool calls requested by this message, empty for
    /// anything but an assistant message.
    #[inline]
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            ModelMessage::Assistant(msg) => &msg.tool_calls,
            _ => &[],
        }
    }
}

/// A message generated by the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// The text content, may be empty when the model only calls tools.
    pub content: String,
    /// Tool calls requested by the model, in the order they were issued.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantMessage {
    /// Returns `true` if this message is a final answer.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The name of the called tool.
    pub name: String,
    /// The payload returned by the tool, or the error detail.
    pub content: Value,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful result.
    #[inline]
    pub fn success(request: &ToolCallRequest, content: Value) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            content,
            is_error: false,
        }
    }

    /// Creates a failed result with an error detail.
    #[inline]
    pub fn failure<S: Into<String>>(
        request: &ToolCallRequest,
        detail: S,
    ) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            content: Value::String(detail.into()),
            is_error: true,
        }
    }

    /// Renders the content as plain text for the model.
    ///
    /// Strings are returned as is. Arrays of content blocks shaped like
    /// `{"type": "text", "text": ...}` are joined by newlines, and anything
    /// else falls back to its JSON representation.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(blocks) => {
                let texts: Option<Vec<&str>> = blocks
                    .iter()
                    .map(|block| block.get("text").and_then(Value::as_str))
                    .collect();
                match texts {
                    Some(texts) => texts.join("\n"),
                    None => self.content.to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = ModelMessage::Assistant(AssistantMessage {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call:1".to_owned(),
                name: "list_tables".to_owned(),
                arguments: json!({}),
            }],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"]["tool_calls"][0]["name"], "list_tables");

        let user = serde_json::to_value(ModelMessage::User("hi".to_owned()))
            .unwrap();
        assert_eq!(user, json!({ "role": "user", "content": "hi" }));

        let back: ModelMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.role(), Role::Assistant);
        assert_eq!(back.tool_calls().len(), 1);
    }

    #[test]
    fn test_result_text() {
        let req = ToolCallRequest {
            id: "call:1".to_owned(),
            name: "run_query".to_owned(),
            arguments: json!({}),
        };

        let result = ToolCallResult::success(
            &req,
            json!([
                { "type": "text", "text": "id | name" },
                { "type": "text", "text": "1 | Ada" },
            ]),
        );
        assert_eq!(result.text(), "id | name\n1 | Ada");

        let result = ToolCallResult::success(&req, json!({ "rows": 1 }));
        assert_eq!(result.text(), r#"{"rows":1}"#);

        let result = ToolCallResult::failure(&req, "no such table");
        assert!(result.is_error);
        assert_eq!(result.text(), "no such table");
    }
}
