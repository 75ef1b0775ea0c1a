//! Loading of `extends` chains.
//!
//! Every configuration file is read once into a flat arena and addressed
//! by index. The chain is walked depth-first with an explicit stack and
//! visited/in-progress marks, so adversarial inputs cannot exhaust the call
//! stack and cycles are reported with the full chain.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use devforge_common::error::ConfigurationError;
use serde_json::Value;

use crate::layer::{EXTENDS_FIELD, malformed};

/// Byte-level access to configuration files.
pub trait ConfigSource {
    /// Reads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads configuration files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl ConfigSource for FsSource {
    fn read(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedValue {
    /// Normalized path the value was read from.
    pub path: PathBuf,
    /// Parsed JSON, `extends` included.
    pub value: Value,
}

/// A configuration together with its fully expanded bases.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    /// Base configurations in fold order: each base appears after its own bases.
    pub bases: Vec<SourcedValue>,
    /// The configuration that was asked for.
    pub raw: SourcedValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

struct Node {
    source: SourcedValue,
    children: Vec<PathBuf>,
}

/// Loads a configuration and everything it extends.
#[derive(Debug)]
pub struct ExtendsLoader<S> {
    source: S,
}

impl<S: ConfigSource> ExtendsLoader<S> {
    /// Creates a loader reading through `source`.
    pub const fn new(source: S) -> Self {
        Self { source }
    }

    /// Loads `path` and its `extends` chain.
    ///
    /// A base reachable along several paths is folded once, at its first
    /// position.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::ExtendsCycle` naming the chain if a file
    /// extends itself directly or transitively, or a read/parse/shape error
    /// for any file in the chain.
    pub fn load(&self, path: &Path) -> Result<LoadedConfig, ConfigurationError> {
        let root_path = normalize(path);
        let mut arena: Vec<Node> = Vec::new();
        let mut index: HashMap<PathBuf, usize> = HashMap::new();
        let mut marks: HashMap<usize, Mark> = HashMap::new();
        let mut post_order: Vec<usize> = Vec::new();

        let root = self.intern(&root_path, &mut arena, &mut index)?;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        let _ = marks.insert(root, Mark::InProgress);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            frame.1 += 1;
            let Some(child_path) = arena[node].children.get(next).cloned() else {
                let _ = marks.insert(node, Mark::Done);
                post_order.push(node);
                let _ = stack.pop();
                continue;
            };

            let child = self.intern(&child_path, &mut arena, &mut index)?;
            match marks.get(&child) {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut chain: Vec<PathBuf> = stack[start..]
                        .iter()
                        .map(|(n, _)| arena[*n].source.path.clone())
                        .collect();
                    chain.push(arena[child].source.path.clone());
                    return Err(ConfigurationError::ExtendsCycle { chain });
                }
                None => {
                    tracing::debug!(path = %child_path.display(), "loading base configuration");
                    let _ = marks.insert(child, Mark::InProgress);
                    stack.push((child, 0));
                }
            }
        }

        let raw = post_order.pop().unwrap_or(root);
        let mut sources: Vec<Option<SourcedValue>> =
            arena.into_iter().map(|n| Some(n.source)).collect();
        let bases = post_order
            .into_iter()
            .filter_map(|n| sources[n].take())
            .collect();
        let raw = sources[raw]
            .take()
            .ok_or_else(|| malformed(&root_path.display().to_string(), "", "configuration lost"))?;
        Ok(LoadedConfig { bases, raw })
    }

    /// Reads and parses `path` unless it is already in the arena.
    fn intern(
        &self,
        path: &Path,
        arena: &mut Vec<Node>,
        index: &mut HashMap<PathBuf, usize>,
    ) -> Result<usize, ConfigurationError> {
        if let Some(&idx) = index.get(path) {
            return Ok(idx);
        }
        let text = self
            .source
            .read(path)
            .map_err(|source| ConfigurationError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let value = devforge_common::jsonc::parse(&text).map_err(|message| {
            ConfigurationError::Parse {
                path: path.to_path_buf(),
                message,
            }
        })?;
        let children = extends_targets(path, &value)?;
        let idx = arena.len();
        arena.push(Node {
            source: SourcedValue {
                path: path.to_path_buf(),
                value,
            },
            children,
        });
        let _ = index.insert(path.to_path_buf(), idx);
        Ok(idx)
    }
}

/// Resolves the `extends` entries of `value` against the directory of `path`.
fn extends_targets(path: &Path, value: &Value) -> Result<Vec<PathBuf>, ConfigurationError> {
    let source = path.display().to_string();
    let entries: Vec<&str> = match value.get(EXTENDS_FIELD) {
        None => return Ok(Vec::new()),
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str().ok_or_else(|| {
                    malformed(&source, &format!("{EXTENDS_FIELD}/{i}"), "expected a path string")
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(malformed(
                &source,
                EXTENDS_FIELD,
                "expected a path string or an array of path strings",
            ));
        }
    };
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(entries.into_iter().map(|e| normalize(&dir.join(e))).collect())
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
