//! Env file reading and merging
//!
//! Env files are resolved against the app's base directory and parsed by
//! extension: `.yml`/`.yaml` and `.json` hold a flat mapping of scalars,
//! anything else is dotenv. Files merge left to right into the data of the
//! service's base env Secret.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use kompox_common::yaml::{parse_yaml_mapping, value_kind};
use serde_json::{Map, Value};

use crate::compose::files::first_symlink;
use crate::compose::project::EnvFileRef;
use crate::error::CompilationError;

/// Upper bound on the combined size of all keys and values of one Secret
pub const MAX_SECRET_DATA_BYTES: usize = 1_000_000;

/// Key/value data read from env files
pub type EnvMap = BTreeMap<String, String>;

/// Result of merging a service's env files
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedEnv {
    /// Merged data
    pub data: EnvMap,
    /// Keys whose value a later file replaced, with the replaced value
    pub overrides: BTreeMap<String, String>,
}

/// Read, merge and validate the env files of one service
pub fn merge_env_files(
    base_dir: &Path,
    service: &str,
    files: &[EnvFileRef],
) -> Result<MergedEnv, CompilationError> {
    let mut merged = MergedEnv::default();
    for file in files {
        let path = file.path.trim();
        if path.is_empty() {
            continue;
        }
        let data = read_env_dir_file(base_dir, path, file.required)
            .map_err(|message| CompilationError::env_file(service, path, message))?;
        for (key, value) in data {
            if let Some(prev) = merged.data.get(&key) {
                if *prev != value {
                    merged.overrides.insert(key.clone(), prev.clone());
                }
            }
            merged.data.insert(key, value);
        }
    }
    validate_secret_data(&merged.data).map_err(|message| CompilationError::SecretData {
        service: service.to_string(),
        message,
    })?;
    Ok(merged)
}

/// Read an env file relative to `base_dir`.
///
/// Absolute paths, `..`, symlinks and directories are rejected. A missing
/// optional file yields an empty map.
pub fn read_env_dir_file(base_dir: &Path, rel_path: &str, required: bool) -> Result<EnvMap, String> {
    if rel_path.starts_with('/') {
        return Err(format!("env_file must be relative: {}", rel_path));
    }
    if rel_path.contains("..") {
        return Err(format!("env_file path must not contain '..': {}", rel_path));
    }
    match first_symlink(base_dir, rel_path) {
        Ok(None) => {}
        Ok(Some(link)) => return Err(format!("env_file symlink not allowed: {}", link.display())),
        Err(e) if e.kind() == ErrorKind::NotFound && !required => return Ok(EnvMap::new()),
        Err(e) => return Err(format!("env_file stat failed: {}", e)),
    }
    let full = base_dir.join(rel_path);
    let meta = std::fs::symlink_metadata(&full).map_err(|e| format!("env_file stat failed: {}", e))?;
    if meta.is_dir() {
        return Err(format!("env_file is directory: {}", rel_path));
    }
    let content = std::fs::read_to_string(&full).map_err(|e| format!("env_file read failed: {}", e))?;
    parse_env(&content, rel_path)
}

/// Parse env content, dispatching on the extension of `path`
pub fn parse_env(content: &str, path: &str) -> Result<EnvMap, String> {
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    match ext.as_str() {
        ".yml" | ".yaml" => {
            let map = parse_yaml_mapping(content, path).map_err(|e| e.to_string())?;
            normalize_kv_object(map, &ext)
        }
        ".json" => {
            let map = match serde_json::from_str::<Value>(content).map_err(|e| e.to_string())? {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => return Err(format!("expected a JSON object, got {}", value_kind(&other))),
            };
            normalize_kv_object(map, &ext)
        }
        _ => parse_dotenv(content),
    }
}

fn normalize_kv_object(map: Map<String, Value>, ext: &str) -> Result<EnvMap, String> {
    map.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Null => return Err(format!("key {} has null value ({} not allowed)", key, ext)),
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(format!(
                        "key {} has unsupported value type {}",
                        key,
                        value_kind(&other)
                    ))
                }
            };
            Ok((key, value))
        })
        .collect()
}

/// Parse dotenv content.
///
/// `#` comments and blank lines are skipped and `export ` is stripped.
/// Unquoted values lose one leading space. Double-quoted values support
/// `\\ \" \n \r \t`; single-quoted values are literal.
pub fn parse_dotenv(content: &str) -> Result<EnvMap, String> {
    let mut map = EnvMap::new();
    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, raw) = line
            .split_once('=')
            .ok_or_else(|| format!(".env line {} missing '='", line_no))?;
        let key = key.trim();
        if !is_env_key(key) {
            return Err(format!("invalid env key {:?} at line {}", key, line_no));
        }

        let value = if let Some(body) = raw.strip_prefix('"') {
            let body = body
                .strip_suffix('"')
                .ok_or_else(|| format!("unterminated double quote line {}", line_no))?;
            unescape_double_quoted(body, line_no)?
        } else if let Some(body) = raw.strip_prefix('\'') {
            body.strip_suffix('\'')
                .ok_or_else(|| format!("unterminated single quote line {}", line_no))?
                .to_string()
        } else {
            raw.strip_prefix(' ').unwrap_or(raw).to_string()
        };
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn unescape_double_quoted(body: &str, line_no: usize) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(esc @ ('\\' | '"')) => out.push(esc),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => return Err(format!("unsupported escape \\{} line {}", other, line_no)),
            None => return Err(format!("dangling escape line {}", line_no)),
        }
    }
    Ok(out)
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check keys, reject NUL and control bytes (tab, LF and CR are allowed) and
/// enforce the total size budget
pub fn validate_secret_data(data: &EnvMap) -> Result<(), String> {
    let mut total = 0usize;
    for (key, value) in data {
        if !is_env_key(key) {
            return Err(format!("invalid env key {}", key));
        }
        reject_control(value).map_err(|e| format!("value for {}: {}", key, e))?;
        total += key.len() + value.len();
        if total > MAX_SECRET_DATA_BYTES {
            return Err(format!("secret data exceeds {} bytes", MAX_SECRET_DATA_BYTES));
        }
    }
    Ok(())
}

fn reject_control(value: &str) -> Result<(), String> {
    for c in value.chars() {
        let code = c as u32;
        if code == 0 {
            return Err("contains NUL byte".to_string());
        }
        if matches!(code, 0x01..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F) {
            return Err(format!("contains control char 0x{:02X}", code));
        }
    }
    Ok(())
}
