//! Function definitions advertised to the model.

use serde::Serialize;
use std::collections::BTreeMap;

pub const BASH_TOOL: &str = "bash";
pub const APPLY_PATCH_TOOL: &str = "apply_patch";

#[derive(Debug, Clone, Serialize)]
pub struct FunctionTool {
    pub name: String,
    pub description: String,
    pub parameters: JsonSchema,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OpenAiTool {
    #[serde(rename = "function")]
    Function { function: FunctionTool },
}

impl OpenAiTool {
    pub fn name(&self) -> &str {
        match self {
            Self::Function { function } => &function.name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonSchema {
    Object {
        r#type: String,
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
        #[serde(rename = "additionalProperties", skip_serializing_if = "Option::is_none")]
        additional_properties: Option<bool>,
    },
    String {
        r#type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

fn string_prop(description: &str) -> JsonSchema {
    JsonSchema::String {
        r#type: "string".to_string(),
        description: Some(description.to_string()),
    }
}

fn single_arg_tool(name: &str, description: &str, arg: &str, arg_description: &str) -> OpenAiTool {
    let mut properties = BTreeMap::new();
    properties.insert(arg.to_string(), string_prop(arg_description));
    OpenAiTool::Function {
        function: FunctionTool {
            name: name.to_string(),
            description: description.to_string(),
            parameters: JsonSchema::Object {
                r#type: "object".to_string(),
                properties,
                required: Some(vec![arg.to_string()]),
                additional_properties: None,
            },
        },
    }
}

pub fn create_bash_tool() -> OpenAiTool {
    single_arg_tool(
        BASH_TOOL,
        "Execute bash commands and return the output",
        "command",
        "The bash command to execute",
    )
}

pub fn create_apply_patch_tool() -> OpenAiTool {
    single_arg_tool(
        APPLY_PATCH_TOOL,
        "Apply file modifications using patch format with operations like create, update, insert_before, insert_after, and delete",
        "patch_content",
        "The patch content in the format expected by apply_patch, including *** Begin Patch and *** End Patch markers",
    )
}

pub fn default_tools() -> Vec<OpenAiTool> {
    vec![create_bash_tool(), create_apply_patch_tool()]
}
