/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of camel-sandbox.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: No patent rights in camel-sandbox are granted by this license.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! System prompt for the code-generating model.
//!
//! The prompt lists what the interpreter accepts: built-in types, functions,
//! methods and classes, the registered tools as stub signatures, the custom
//! types those tools mention, and the language restrictions.

use crate::intrinsics::{methods_for, BUILTIN_FUNCTIONS};
use crate::prelude;
use crate::raw::RawValue;
use indexmap::IndexMap;
use serde::Serialize;
use std::rc::Rc;
use tracing::debug;

const INDENT: &str = "  ";

/// Types whose methods are listed to the model.
const METHOD_TYPES: &[&str] = &["dict", "list", "str"];

// ============================================================================
// TOOL DESCRIPTIONS
// ============================================================================

/// Annotation of a parameter, field or return value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRef {
    Any,
    None,
    /// A built-in or already imported type, e.g. `str` or `datetime`.
    Named { name: String },
    Generic { origin: String, args: Vec<TypeRef> },
    Union { members: Vec<TypeRef> },
    /// A model or enum whose definition is shown to the model.
    Custom { def: Rc<TypeDef> },
}

impl TypeRef {
    pub fn named(name: &str) -> Self {
        TypeRef::Named {
            name: name.to_string(),
        }
    }

    pub fn generic(origin: &str, args: Vec<TypeRef>) -> Self {
        TypeRef::Generic {
            origin: origin.to_string(),
            args,
        }
    }

    pub fn custom(def: TypeDef) -> Self {
        TypeRef::Custom { def: Rc::new(def) }
    }

    /// Source text of the annotation.
    pub fn render(&self) -> String {
        match self {
            TypeRef::Any => "Any".to_string(),
            TypeRef::None => "None".to_string(),
            TypeRef::Named { name } => name.clone(),
            TypeRef::Generic { origin, args } => {
                let args: Vec<String> = args.iter().map(TypeRef::render).collect();
                format!("{}[{}]", origin, args.join(", "))
            }
            TypeRef::Union { members } => {
                let members: Vec<String> = members.iter().map(TypeRef::render).collect();
                members.join(" | ")
            }
            TypeRef::Custom { def } => def.name().to_string(),
        }
    }

    /// Custom types reachable from this annotation, without descending
    /// into their fields.
    fn custom_types(&self, out: &mut Vec<Rc<TypeDef>>) {
        match self {
            TypeRef::Custom { def } => out.push(def.clone()),
            TypeRef::Generic { args, .. } => args.iter().for_each(|a| a.custom_types(out)),
            TypeRef::Union { members } => members.iter().for_each(|m| m.custom_types(out)),
            TypeRef::Any | TypeRef::None | TypeRef::Named { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub annotation: TypeRef,
    /// Rendered as `Field(key=value, ...)`.
    pub info: IndexMap<String, String>,
}

impl FieldDef {
    pub fn new(name: &str, annotation: TypeRef) -> Self {
        FieldDef {
            name: name.to_string(),
            annotation,
            info: IndexMap::new(),
        }
    }

    pub fn with_info(mut self, key: &str, value: &str) -> Self {
        self.info.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDef {
    Model { name: String, fields: Vec<FieldDef> },
    Enum { name: String, members: Vec<(String, RawValue)> },
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Model { name, .. } | TypeDef::Enum { name, .. } => name,
        }
    }

    /// Class definition as shown to the model.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            TypeDef::Model { name, fields } => {
                out.push_str(&format!("class {}(BaseModel):", name));
                for field in fields {
                    let info: Vec<String> =
                        field.info.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                    out.push_str(&format!(
                        "\n{}{}: {} = Field({})",
                        INDENT,
                        field.name,
                        field.annotation.render(),
                        info.join(", ")
                    ));
                }
            }
            TypeDef::Enum { name, members } => {
                out.push_str(&format!("class {}(enum.Enum):", name));
                for (member, value) in members {
                    out.push_str(&format!("\n{}{} = {}", INDENT, member, value.py_repr()));
                }
            }
        }
        out
    }

    fn field_types(&self, out: &mut Vec<Rc<TypeDef>>) {
        if let TypeDef::Model { fields, .. } = self {
            for field in fields {
                field.annotation.custom_types(out);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: TypeRef,
}

impl Parameter {
    pub fn new(name: &str, annotation: TypeRef) -> Self {
        Parameter {
            name: name.to_string(),
            annotation,
        }
    }
}

/// A tool as described to the model.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub docstring: String,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeRef,
}

impl FunctionDescriptor {
    pub fn new(
        name: &str,
        docstring: &str,
        parameters: Vec<Parameter>,
        return_type: TypeRef,
    ) -> Self {
        FunctionDescriptor {
            name: name.to_string(),
            docstring: docstring.to_string(),
            parameters,
            return_type,
        }
    }

    /// Stub definition: signature, docstring and an ellipsis body.
    pub fn render_stub(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.annotation.render()))
            .collect();
        let mut lines = self.docstring.lines();
        let first = lines.next().unwrap_or("").trim();
        let rest = dedent(&lines.collect::<Vec<_>>());

        let mut out = format!(
            "def {}({}) -> {}:\n",
            self.name,
            params.join(", "),
            self.return_type.render()
        );
        if rest.is_empty() {
            out.push_str(&format!("{}\"\"\"{}\"\"\"\n", INDENT, first));
        } else {
            out.push_str(&format!("{}\"\"\"{}\n\n", INDENT, first));
            for line in rest {
                if line.is_empty() {
                    out.push('\n');
                } else {
                    out.push_str(&format!("{}{}\n", INDENT, line));
                }
            }
            out.push_str(&format!("{}\"\"\"\n", INDENT));
        }
        out.push_str(&format!("{}...", INDENT));
        out
    }
}

/// Strips the common leading whitespace and surrounding blank lines.
fn dedent(lines: &[&str]) -> Vec<String> {
    let margin = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out: Vec<String> = lines
        .iter()
        .map(|l| match l.trim().is_empty() {
            true => String::new(),
            false => l.get(margin..).unwrap_or(l.trim_start()).trim_end().to_string(),
        })
        .collect();
    while out.first().map_or(false, String::is_empty) {
        out.remove(0);
    }
    while out.last().map_or(false, String::is_empty) {
        out.pop();
    }
    out
}

/// Custom types mentioned by the tools, closed over model fields, in first
/// mention order.
pub fn custom_type_definitions(functions: &[FunctionDescriptor]) -> IndexMap<String, String> {
    let mut pending = Vec::new();
    for function in functions {
        for param in &function.parameters {
            param.annotation.custom_types(&mut pending);
        }
        function.return_type.custom_types(&mut pending);
    }
    pending.reverse();

    let mut definitions = IndexMap::new();
    while let Some(def) = pending.pop() {
        if definitions.contains_key(def.name()) {
            continue;
        }
        definitions.insert(def.name().to_string(), def.render());
        let mut nested = Vec::new();
        def.field_types(&mut nested);
        pending.extend(nested.into_iter().rev());
    }
    definitions
}

// ============================================================================
// PROMPT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Extra context placed after the opening instruction, e.g. who the
    /// user is.
    pub user_context: Option<String>,
}

const INSTRUCTIONS: &str = "\
Follow these instructions:
  - Don't make assumptions about what values to plug into functions.
  - Use the provided functions to try to disambiguate.
  - Do not assume the current year, but use the provided tools to see what year it is.
  - If you are provided with an email address, there is no need to search for it in the contacts.
  - Try to solve the task without requiring user intervention or asking for confirmation.
";

const NOTES: &str = "\
## Important notes on the code

Keep in mind the following **extremely** important information for the code you generate:

- You can show content to the user with the `print` function.
- For search functions, if it does not return any value, raise a `ValueError`.
- When creating the schema for the `query_ai_assistant` function, you can define a Pydantic BaseModel yourself or use one of the models that are already available. You can assume that `BaseModel` is already imported. However, you **must absolutely refrain** from specifying default values for the class fields, and you must absolutely not use `Field()`.
- Do not redefine built-ins and classes that are already provided. You must directly use them.
- **Do not try to catch or prevent exceptions** (by e.g., checking for indices out of bound). If an exception is raised, it will be caught externally and handled for you.
- If you are provided with an error from previous code, make sure to fix your code. If the error comes from a search query that did not return any results, then try a different search query.
- Absolutely do not attempt to use methods and or functions that are part of the Python standard library, but are not part of the list of methods or functions listed below.
- It is of uttermost importance that you do not parse unstructured results with regular expressions or string manipulations. **Use the `query_ai_assistant` function instead**.
- Some tools (e.g., search tools) might return lists of results. Try to disambiguate the results using the information you have or by using the `query_ai_assistant` function.
- Make sure the AI assistant receives all the information it needs to solve the task.

### Information on the language

While you should write Python code, we are using a custom interpreter for your code for security reasons.
While generating the code, follow these rules:

- Do not use `while` loops and generators.
- You are not allowed to import any modules. Stick to the types that are mentioned in these instructions.
- You are absolutely not allowed to use `eval` or `exec`.
- You can't use `break` and `continue` statements.
- Defining new functions with `def` or `lambda` is not supported.
- You are not allowed to use methods with side-effects (e.g., `dict.clear` or `list.append`).
  Use instead functional alternatives such as comprehensions or the [*l, new_element] syntax.
";

fn bullet_list(items: impl IntoIterator<Item = impl AsRef<str>>, depth: usize) -> String {
    let pad = INDENT.repeat(depth);
    let mut out = String::new();
    for item in items {
        out.push_str(&format!("{}- `{}`\n", pad, item.as_ref()));
    }
    out
}

/// Renders the full system prompt for the given tools.
pub fn generate_system_prompt(
    functions: &[FunctionDescriptor],
    classes_to_exclude: &[&str],
    options: &PromptOptions,
) -> String {
    let mut out = String::from(
        "You are a helpful assistant that rewrites user requests to structured Python code. \
You must specify the code within a fenced code block.\n\n",
    );
    if let Some(context) = &options.user_context {
        out.push_str(&format!("{}\n\n", context.trim()));
    }
    out.push_str(INSTRUCTIONS);

    out.push_str("\n## Built-in types\n\nThe types you can use are:\n");
    out.push_str(&bullet_list(
        ["NoneType", "bool", "int", "float", "string", "list", "tuple", "dict", "set"],
        1,
    ));

    out.push_str("\n## Built-in functions\n\n");
    out.push_str("You are allowed to use the following built-in functions:\n");
    out.push_str(&bullet_list(BUILTIN_FUNCTIONS, 1));
    out.push_str(
        "\nNote that the `type` function returns a string with the type name, rather than the type itself. \
So you can check if, e.g., something is an `int` with `if type(x) == \"int\"`.\n",
    );

    out.push_str("\n## Built-in methods\n\n");
    out.push_str("For each of the following types you can use the following methods:\n");
    for ty in METHOD_TYPES {
        out.push_str(&format!("{}- `{}`:\n", INDENT, ty));
        out.push_str(&bullet_list(methods_for(ty), 2));
    }

    out.push_str("\n# Imported classes\n\n");
    out.push_str(
        "Moreover, you can assume that the following non-builtin classes are available:\n",
    );
    for class in prelude::builtin_classes() {
        if classes_to_exclude.contains(&class.name.as_str()) {
            continue;
        }
        out.push_str(&format!("{}- `{}`:\n", INDENT, class.name));
        out.push_str(&bullet_list(class.methods.keys(), 2));
    }

    let stubs: Vec<String> = functions.iter().map(FunctionDescriptor::render_stub).collect();
    out.push_str(
        "\n## Tools functions\n\nAdditionally, you have access to the following functions that allow you to use external tools:\n\n",
    );
    out.push_str(&format!("```python\n{}\n```\n", stubs.join("\n\n\n")));

    let definitions = custom_type_definitions(functions);
    if !definitions.is_empty() {
        let bodies: Vec<&str> = definitions.values().map(String::as_str).collect();
        out.push_str(
            "\n### Available types\n\nThe types used above which are not built-in are Pydantic BaseModels or Enums defined like this:\n\n",
        );
        out.push_str(&format!("```python\n{}\n```\n\n", bodies.join("\n\n")));
        out.push_str(
            "All these types are available to you for use, without need to re-define or import them.\n\n\
It is absolutely important that you do not assume that the type used for the fields are built in. \
For example, do not try to compare datetime objects with strings.\n",
        );
    }

    out.push('\n');
    out.push_str(NOTES);
    debug!(
        tools = functions.len(),
        custom_types = definitions.len(),
        "generated system prompt"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_type() -> TypeDef {
        TypeDef::Model {
            name: "Email".to_string(),
            fields: vec![
                FieldDef::new("sender", TypeRef::named("str"))
                    .with_info("description", "'who sent it'"),
                FieldDef::new("status", TypeRef::custom(status_type())),
            ],
        }
    }

    fn status_type() -> TypeDef {
        TypeDef::Enum {
            name: "Status".to_string(),
            members: vec![
                ("READ".to_string(), RawValue::str("read")),
                ("UNREAD".to_string(), RawValue::str("unread")),
            ],
        }
    }

    fn search() -> FunctionDescriptor {
        FunctionDescriptor::new(
            "search_emails",
            "Searches the inbox.\n\n    :param query: text to look for.\n    ",
            vec![
                Parameter::new("query", TypeRef::named("str")),
                Parameter::new(
                    "limit",
                    TypeRef::Union {
                        members: vec![TypeRef::named("int"), TypeRef::None],
                    },
                ),
            ],
            TypeRef::generic("list", vec![TypeRef::custom(email_type())]),
        )
    }

    #[test]
    fn test_custom_type_serializes_its_definition() {
        let json = match serde_json::to_value(TypeRef::custom(status_type())) {
            Ok(json) => json,
            Err(e) => panic!("Expected a serializable type, got {}", e),
        };
        assert_eq!(json["kind"], "custom");
        assert_eq!(json["def"]["kind"], "enum");
        assert_eq!(json["def"]["name"], "Status");
    }

    #[test]
    fn test_render_stub() {
        assert_eq!(
            search().render_stub(),
            "def search_emails(query: str, limit: int | None) -> list[Email]:\n  \"\"\"Searches the inbox.\n\n  :param query: text to look for.\n  \"\"\"\n  ..."
        );
        let bare =
            FunctionDescriptor::new("now", "Current time.", vec![], TypeRef::named("datetime"));
        assert_eq!(
            bare.render_stub(),
            "def now() -> datetime:\n  \"\"\"Current time.\"\"\"\n  ..."
        );
    }

    #[test]
    fn test_type_definitions_are_transitive() {
        let definitions = custom_type_definitions(&[search()]);
        let names: Vec<&str> = definitions.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Email", "Status"]);
        assert_eq!(
            definitions["Email"],
            "class Email(BaseModel):\n  sender: str = Field(description='who sent it')\n  status: Status = Field()"
        );
        assert_eq!(
            definitions["Status"],
            "class Status(enum.Enum):\n  READ = 'read'\n  UNREAD = 'unread'"
        );
    }

    #[test]
    fn test_prompt_sections() {
        let prompt = generate_system_prompt(
            &[search()],
            &["Enum"],
            &PromptOptions {
                user_context: Some("The user's name is Ann.".to_string()),
            },
        );
        assert!(prompt.contains("The user's name is Ann."));
        assert!(prompt.contains("  - `zip`\n"));
        assert!(prompt.contains("  - `str`:\n    - `capitalize`\n"));
        assert!(prompt.contains("  - `BaseModel`:\n    - `model_dump`\n"));
        assert!(!prompt.contains("- `Enum`:"));
        assert!(prompt.contains("def search_emails("));
        assert!(prompt.contains("### Available types"));
        assert!(prompt.ends_with(NOTES));
    }

    #[test]
    fn test_prompt_without_custom_types() {
        let tool = FunctionDescriptor::new(
            "send_email",
            "Sends an email.",
            vec![Parameter::new("to", TypeRef::generic("list", vec![TypeRef::named("str")]))],
            TypeRef::None,
        );
        let prompt = generate_system_prompt(&[tool], &[], &PromptOptions::default());
        assert!(!prompt.contains("### Available types"));
        assert!(prompt.contains("def send_email(to: list[str]) -> None:"));
    }
}
