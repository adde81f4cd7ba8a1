//! Script path keys
//!
//! Scripts register under path keys such as `res://enemies/bat.lua`.
//! Precompiled chunks (`.luac`) share the key of their source form, and
//! nested classes register under `outer::Name`.

use crate::options::EngineOptions;

/// Separator between an enclosing script path and a nested class name
pub const NESTED_SEPARATOR: &str = "::";

/// Registration key for a path; a chunk path maps to its source key
pub fn registration_key(options: &EngineOptions, path: &str) -> String {
    let chunk_suffix = format!(".{}", options.chunk_extension);
    match path.strip_suffix(&chunk_suffix) {
        Some(stem) => format!("{}.{}", stem, options.source_extension),
        None => path.to_string(),
    }
}

/// Precompiled chunk path for a source key
pub fn chunk_path(options: &EngineOptions, key: &str) -> Option<String> {
    let source_suffix = format!(".{}", options.source_extension);
    key.strip_suffix(&source_suffix)
        .map(|stem| format!("{}.{}", stem, options.chunk_extension))
}

/// Key of a class nested in `outer` under `name`
pub fn nested_path(outer: &str, name: &str) -> String {
    format!("{}{}{}", outer, NESTED_SEPARATOR, name)
}

/// Whether a key names a nested class
pub fn is_nested(path: &str) -> bool {
    path.contains(NESTED_SEPARATOR)
}

/// Top-level script key of a (possibly nested) key
pub fn outer_path(path: &str) -> &str {
    match path.find(NESTED_SEPARATOR) {
        Some(i) => &path[..i],
        None => path,
    }
}

/// Directory part of a key, with its trailing slash
pub fn directory_of(path: &str) -> &str {
    let path = outer_path(path);
    match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    }
}

/// Dotted module name (`dir.name`) to a key under the script root
pub fn module_path(options: &EngineOptions, module: &str) -> String {
    format!(
        "{}{}.{}",
        options.script_root,
        module.replace('.', "/"),
        options.source_extension
    )
}

/// Resolve a declared base name to a registration key.
///
/// - `scheme://...` is absolute
/// - `outer::Name` names a nested class
/// - a file name is relative to the declaring script's directory
/// - anything else is a dotted module name under the script root
pub fn resolve_base(options: &EngineOptions, current: Option<&str>, name: &str) -> String {
    if name.contains("://") {
        return registration_key(options, name);
    }
    if is_nested(name) {
        return name.to_string();
    }
    let source_suffix = format!(".{}", options.source_extension);
    let chunk_suffix = format!(".{}", options.chunk_extension);
    if name.ends_with(&source_suffix) || name.ends_with(&chunk_suffix) {
        let dir = current
            .map(directory_of)
            .filter(|dir| !dir.is_empty())
            .unwrap_or(&options.script_root);
        let relative = name.trim_start_matches("./");
        return registration_key(options, &format!("{}{}", dir, relative));
    }
    module_path(options, name)
}
