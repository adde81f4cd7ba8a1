//! Editor-facing language services
//!
//! Keyword tables, delimiters, code templates and source validation.

use std::sync::Arc;

use mlua::{Lua, Value};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::BridgeContext;
use crate::dispatch;
use crate::error::{describe_lua_error, CompileError};
use crate::script::registrar;

/// Reserved words of the guest language
pub static RESERVED_WORDS: [&str; 22] = [
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

const CONTROL_FLOW: [&str; 12] = [
    "break", "do", "else", "elseif", "for", "goto", "if", "repeat", "return", "then", "until",
    "while",
];

static OPENING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"at line (\d+)").expect("valid regex"));
static LOCATION: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\d+):\s*").expect("valid regex"));

/// Whether a word is a control-flow keyword
pub fn is_control_flow_keyword(word: &str) -> bool {
    CONTROL_FLOW.contains(&word)
}

/// Comment delimiters, block form first
pub fn comment_delimiters() -> &'static [&'static str] {
    &["--[[ ]]", "--"]
}

/// String delimiters
pub fn string_delimiters() -> &'static [&'static str] {
    &["\" \"", "' '", "[[ ]]"]
}

/// Stub of a method: `function Class:name(args)` with an empty body.
/// Typed arguments (`name:Type`) keep only the name.
pub fn make_function(class: &str, name: &str, args: &[&str]) -> String {
    let args: Vec<&str> = args
        .iter()
        .map(|arg| arg.split(':').next().unwrap_or(arg).trim())
        .collect();
    format!("function {}:{}({})\n\nend\n", class, name, args.join(", "))
}

/// Class name usable as a guest identifier
pub fn class_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if RESERVED_WORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// Skeleton of a new script class
pub fn template(class: &str, base: &str) -> String {
    let class = class_identifier(class);
    format!(
        "---@class {class} : {base}\n\
         local {class} = class({base})\n\
         \n\
         ---Declare member variables. Examples:\n\
         -- {class}.a = 2\n\
         -- {class}.b = \"text\"\n\
         \n\
         ---Called when the object is ready.\n\
         function {class}:_ready()\n    \
             -- Replace with function body.\n\
         end\n\
         \n\
         return {class}\n",
        class = class,
        base = base
    )
}

/// Outcome of [`ScriptEngine::validate`](crate::ScriptEngine::validate)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    /// Compile or load errors
    pub errors: Vec<CompileError>,
    /// Declared functions as `name:line`, sorted
    pub functions: Vec<String>,
}

impl Validation {
    /// Whether the source loaded and returned a table
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Structured compile error from an interpreter load failure.
///
/// Prefers the opening line named by "at line N" (the construct left
/// unclosed) over the line where the parser gave up.
pub(crate) fn compile_error(path: &str, err: &mlua::Error) -> CompileError {
    let text = describe_lua_error(err);
    let located = LOCATION.captures(&text);
    let message = match located.as_ref().and_then(|caps| caps.get(0)) {
        Some(m) => text[m.end()..].to_string(),
        None => text.clone(),
    };
    let line = OPENING_LINE
        .captures(&message)
        .or(located)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    CompileError {
        path: path.to_string(),
        line,
        column: 1,
        message,
    }
}

/// Load and run a source without registering it
pub(crate) fn validate(lua: &Lua, ctx: &Arc<BridgeContext>, path: &str, source: &str) -> Validation {
    let mut validation = Validation::default();
    let chunk = match registrar::load_chunk(lua, path, source.as_bytes()) {
        Ok(chunk) => chunk,
        Err(err) => {
            validation.errors.push(err);
            return validation;
        }
    };

    let class = match dispatch::protected_call(lua, ctx, &chunk, Vec::new()) {
        Ok(results) => results.into_iter().next().unwrap_or(Value::Nil),
        Err(err) => {
            let line = err.traceback.first().map(|frame| frame.line).unwrap_or(0);
            validation.errors.push(CompileError {
                path: path.to_string(),
                line,
                column: 0,
                message: err.message,
            });
            return validation;
        }
    };
    let Value::Table(class) = class else {
        validation.errors.push(CompileError {
            path: path.to_string(),
            line: 0,
            column: 0,
            message: format!("table expected, got {}", class.type_name()),
        });
        return validation;
    };

    for (key, value) in class.pairs::<Value, Value>().flatten() {
        if let (Value::String(name), Value::Function(function)) = (key, value) {
            let line = function.info().line_defined.unwrap_or(0);
            validation
                .functions
                .push(format!("{}:{}", name.to_string_lossy(), line));
        }
    }
    validation.functions.sort();
    validation
}
