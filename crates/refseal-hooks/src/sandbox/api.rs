//! Host functions exposed to hook scripts.
//!
//! The API surface is a fixed table registered at sandbox construction.
//! Host functions follow the scripting convention of returning error
//! strings rather than raising, so a script can branch on results. The
//! only external process any of them spawn is the version-control binary,
//! run with the sandbox's allowed directory as working directory.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use mlua::{Lua, Table, Value};
use regex::Regex;

/// Helper functions defined in pure Lua.
const PURE_LUA_HELPERS: &str = r#"
    function splitString(str, sep)
        if sep == nil then
            sep = "\n"
        end

        local lines = {}
        for line in string.gmatch(str, "([^"..sep.."]+)") do
            table.insert(lines, line)
        end

        return lines
    end
"#;

/// Repository context the host functions operate on.
#[derive(Debug)]
pub(crate) struct GitContext {
    allowed_dir: PathBuf,
}

impl GitContext {
    pub(crate) fn new(allowed_dir: PathBuf) -> Self {
        Self { allowed_dir }
    }

    /// Returns `true` if scripts may read `path`.
    fn is_path_allowed(&self, path: &str) -> bool {
        let candidate = Path::new(path);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.allowed_dir.join(candidate)
        };
        // Canonicalize so symlinks cannot escape the root; a path that
        // does not exist yet is normalized lexically instead.
        let resolved = resolved
            .canonicalize()
            .unwrap_or_else(|_| normalize(&resolved));

        let raw_root = normalize(&self.allowed_dir);
        let canonical_root = self
            .allowed_dir
            .canonicalize()
            .unwrap_or_else(|_| raw_root.clone());

        resolved.starts_with(&canonical_root) || resolved.starts_with(&raw_root)
    }

    /// Runs the version-control binary and returns its stdout.
    fn git(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.allowed_dir)
            .output()
            .map_err(|err| format!("failed to run git: {err}"))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn diff_output(&self) -> Result<String, String> {
        self.git(&[
            "diff",
            "HEAD",
            "--no-ext-diff",
            "--unified=0",
            "-a",
            "--no-prefix",
        ])
    }

    fn staged_files(&self) -> Result<Vec<String>, String> {
        let output = self.git(&["diff", "--staged", "--name-only", "--diff-filter=A"])?;
        Ok(split_lines(&output))
    }

    fn work_tree_files(&self) -> Result<Vec<String>, String> {
        let output = self.git(&["ls-files"])?;
        Ok(split_lines(&output))
    }

    fn current_branch(&self) -> Result<String, String> {
        Ok(self.git(&["symbolic-ref", "--short", "HEAD"])?.trim().to_string())
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {},
            std::path::Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}

fn split_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn error_value(lua: &Lua, message: impl AsRef<str>) -> mlua::Result<Value> {
    Ok(Value::String(lua.create_string(message.as_ref())?))
}

/// Registers the host API and the pure-Lua helpers on `lua`.
pub(crate) fn register(lua: &Lua, context: &Arc<GitContext>) -> mlua::Result<()> {
    lua.load(PURE_LUA_HELPERS).set_name("helpers").exec()?;

    let globals = lua.globals();

    globals.set(
        "regexMatch",
        lua.create_function(|lua, (pattern, text): (String, String)| {
            match Regex::new(&pattern) {
                Ok(regex) => Ok(Value::Boolean(regex.is_match(&text))),
                Err(err) => error_value(lua, format!("Error: {err}")),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "readFile",
        lua.create_function(move |lua, path: String| {
            if !ctx.is_path_allowed(&path) {
                return error_value(lua, "Error: access to this file is not allowed");
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => Ok(Value::String(lua.create_string(&content)?)),
                Err(err) => error_value(lua, format!("Error reading file: {err}")),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getDiff",
        lua.create_function(move |lua, ()| match ctx.diff_output() {
            Ok(output) => Ok(Value::String(lua.create_string(&output)?)),
            Err(err) => error_value(lua, err),
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getWorkTree",
        lua.create_function(move |lua, ()| match ctx.work_tree_files() {
            Ok(files) => Ok(Value::String(lua.create_string(files.join("\n"))?)),
            Err(err) => error_value(lua, err),
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "checkAddedLargeFile",
        lua.create_function(move |lua, (max_kb, enforce_all): (u64, bool)| {
            let files = if enforce_all {
                ctx.work_tree_files()
            } else {
                ctx.staged_files()
            };
            let files = match files {
                Ok(files) => files,
                Err(err) => return error_value(lua, format!("Error: {err}")),
            };

            let large_files = lua.create_table()?;
            for file in files {
                let Ok(metadata) = std::fs::metadata(ctx.allowed_dir.join(&file)) else {
                    continue;
                };
                if metadata.len() > max_kb * 1024 {
                    large_files.push(file)?;
                }
            }
            Ok(Value::Table(large_files))
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "checkMergeConflict",
        lua.create_function(move |lua, ()| {
            let files = match ctx.staged_files() {
                Ok(files) => files,
                Err(err) => return error_value(lua, format!("Error: {err}")),
            };

            let conflict_files = lua.create_table()?;
            for file in files {
                let Ok(content) = std::fs::read(ctx.allowed_dir.join(&file)) else {
                    continue;
                };
                let has_marker = [&b"<<<<<<< "[..], &b"======= "[..], &b">>>>>>> "[..]]
                    .iter()
                    .any(|marker| {
                        content
                            .windows(marker.len())
                            .any(|window| window == *marker)
                    });
                if has_marker {
                    conflict_files.push(file)?;
                }
            }
            Ok(Value::Table(conflict_files))
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "checkJSON",
        lua.create_function(move |lua, ()| {
            let files = match ctx.work_tree_files() {
                Ok(files) => files,
                Err(err) => return error_value(lua, format!("Error: {err}")),
            };

            let json_files = lua.create_table()?;
            for file in files {
                let Ok(content) = std::fs::read(ctx.allowed_dir.join(&file)) else {
                    continue;
                };
                if serde_json::from_slice::<serde_json::Value>(&content).is_ok() {
                    json_files.push(file)?;
                }
            }
            Ok(Value::Table(json_files))
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "checkNoCommitOnBranch",
        lua.create_function(move |lua, (protected, patterns): (Table, Table)| {
            let branch = match ctx.current_branch() {
                Ok(branch) => branch,
                Err(err) => return error_value(lua, format!("Error: {err}")),
            };

            for name in protected.sequence_values::<String>() {
                if name? == branch {
                    return Ok(Value::Boolean(true));
                }
            }

            for pattern in patterns.sequence_values::<String>() {
                let pattern = pattern?;
                match Regex::new(&pattern) {
                    Ok(regex) if regex.is_match(&branch) => return Ok(Value::Boolean(true)),
                    Ok(_) => {},
                    Err(err) => return error_value(lua, format!("Error: {err}")),
                }
            }

            Ok(Value::Boolean(false))
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getGitObject",
        lua.create_function(move |lua, object: String| {
            match ctx.git(&["cat-file", "-p", &object]) {
                Ok(output) => Ok(Value::String(lua.create_string(&output)?)),
                Err(err) => error_value(lua, err),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getGitObjectSize",
        lua.create_function(move |lua, object: String| {
            match ctx.git(&["cat-file", "-s", &object]) {
                Ok(output) => Ok(Value::String(lua.create_string(output.trim())?)),
                Err(err) => error_value(lua, err),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getGitObjectHash",
        lua.create_function(move |lua, object: String| {
            match ctx.git(&["hash-object", "-w", &object]) {
                Ok(output) => Ok(Value::String(lua.create_string(output.trim())?)),
                Err(err) => error_value(lua, err),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "getGitObjectPath",
        lua.create_function(move |lua, object: String| {
            match ctx.git(&["rev-parse", &object]) {
                Ok(output) => Ok(Value::String(lua.create_string(output.trim())?)),
                Err(err) => error_value(lua, err),
            }
        })?,
    )?;

    let ctx = Arc::clone(context);
    globals.set(
        "regexMatchGitDiff",
        lua.create_function(move |lua, patterns: Table| {
            let diff = match ctx.diff_output() {
                Ok(diff) => diff,
                Err(err) => return error_value(lua, err),
            };

            let mut compiled: Vec<(String, Regex)> = Vec::new();
            for pair in patterns.pairs::<String, String>() {
                let (key, pattern) = pair?;
                match Regex::new(&pattern) {
                    Ok(regex) => compiled.push((key, regex)),
                    Err(err) => return error_value(lua, format!("Error: {err}")),
                }
            }

            let results = lua.create_table()?;
            let mut current_file = String::new();
            let mut line_number = 0i64;

            for line in diff.lines() {
                if let Some(file) = line.strip_prefix("+++ ") {
                    current_file = file.to_string();
                } else if line.starts_with("@@") {
                    let parts: Vec<&str> = line.split(' ').collect();
                    if parts.len() >= 3 {
                        line_number = parts[2]
                            .split(',')
                            .next()
                            .and_then(|n| n.trim_start_matches('+').parse::<i64>().ok())
                            .unwrap_or(0);
                    }
                } else if line.starts_with('+') && !line.starts_with("+++") {
                    line_number += 1;
                    for (key, regex) in &compiled {
                        if regex.is_match(line) {
                            let file_table: Table = match results.get(current_file.as_str())? {
                                Value::Table(table) => table,
                                _ => {
                                    let table = lua.create_table()?;
                                    results.set(current_file.as_str(), table.clone())?;
                                    table
                                },
                            };
                            let match_table = lua.create_table()?;
                            match_table.set("type", key.as_str())?;
                            match_table.set("line_num", line_number)?;
                            match_table.set("content", line)?;
                            file_table.push(match_table)?;
                        }
                    }
                }
            }

            Ok(Value::Table(results))
        })?,
    )?;

    Ok(())
}
