//! Lifecycle hook slots.
//!
//! Each hook kind collects commands contributed by image metadata and by
//! installed features, in contribution order, plus at most one command set
//! by the user's own configuration. The user's command always runs last.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One of the fixed lifecycle command slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    /// Runs on the host before anything else.
    Initialize,
    /// Runs once when the container is first created.
    OnCreate,
    /// Runs after workspace content is available.
    UpdateContent,
    /// Runs once after creation completes.
    PostCreate,
    /// Runs every time the container starts.
    PostStart,
    /// Runs every time a tool attaches.
    PostAttach,
}

impl HookKind {
    /// All hook kinds in execution order.
    pub const ALL: [Self; 6] = [
        Self::Initialize,
        Self::OnCreate,
        Self::UpdateContent,
        Self::PostCreate,
        Self::PostStart,
        Self::PostAttach,
    ];

    /// Configuration field that holds this hook.
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::Initialize => "initializeCommand",
            Self::OnCreate => "onCreateCommand",
            Self::UpdateContent => "updateContentCommand",
            Self::PostCreate => "postCreateCommand",
            Self::PostStart => "postStartCommand",
            Self::PostAttach => "postAttachCommand",
        }
    }

    /// Maps a configuration field name back to its hook kind.
    #[must_use]
    pub fn from_field(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.field_name() == name)
    }

    /// Whether the hook runs on the host rather than in the container.
    #[must_use]
    pub const fn runs_on_host(self) -> bool {
        matches!(self, Self::Initialize)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field_name())
    }
}

impl FromStr for HookKind {
    type Err = String;

    /// Accepts `postCreateCommand`, `postCreate`, or `post-create`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        let folded = folded.strip_suffix("command").unwrap_or(&folded);
        Self::ALL
            .into_iter()
            .find(|k| {
                k.field_name()
                    .trim_end_matches("Command")
                    .eq_ignore_ascii_case(folded)
            })
            .ok_or_else(|| format!("unknown lifecycle hook: {s}"))
    }
}

/// A command in one of the accepted shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LifecycleCommand {
    /// Run through a shell.
    Shell(String),
    /// Run directly, argv style.
    Exec(Vec<String>),
    /// Named commands that may run in parallel.
    Parallel(BTreeMap<String, Self>),
}

impl LifecycleCommand {
    /// Parses a command from JSON.
    ///
    /// `allow_parallel` controls whether the object form is accepted.
    ///
    /// # Errors
    ///
    /// Returns a description of the shape mismatch.
    pub fn from_value(value: &Value, allow_parallel: bool) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::Shell(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| "command arrays must contain only strings".to_string())
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Exec),
            Value::Object(map) if allow_parallel => {
                let mut named = BTreeMap::new();
                for (name, inner) in map {
                    let parsed = Self::from_value(inner, false)
                        .map_err(|e| format!("parallel command \"{name}\": {e}"))?;
                    let _ = named.insert(name.clone(), parsed);
                }
                Ok(Self::Parallel(named))
            }
            _ => Err(if allow_parallel {
                "expected a string, an array of strings, or an object of commands".into()
            } else {
                "expected a string or an array of strings".into()
            }),
        }
    }

    /// Returns a copy with every string passed through `f`.
    #[must_use]
    pub fn map_strings(&self, f: &impl Fn(&str) -> String) -> Self {
        match self {
            Self::Shell(s) => Self::Shell(f(s)),
            Self::Exec(args) => Self::Exec(args.iter().map(|a| f(a)).collect()),
            Self::Parallel(named) => Self::Parallel(
                named
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_strings(f)))
                    .collect(),
            ),
        }
    }
}

/// A command together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookEntry {
    /// Feature id, image metadata entry, or `"user"`.
    pub origin: String,
    /// The command to run.
    pub command: LifecycleCommand,
}

/// Commands collected for one hook kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookSlot {
    /// Commands from image metadata and features, in contribution order.
    pub contributed: Vec<HookEntry>,
    /// The user's own command, if any.
    pub user: Option<LifecycleCommand>,
}

/// Origin label used for the user's own hook commands.
pub const USER_ORIGIN: &str = "user";

/// All lifecycle hook slots of an effective configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleHooks {
    slots: BTreeMap<HookKind, HookSlot>,
}

impl LifecycleHooks {
    /// Sets the user's command for `kind`, replacing an earlier layer's.
    pub fn set_user(&mut self, kind: HookKind, command: LifecycleCommand) {
        self.slots.entry(kind).or_default().user = Some(command);
    }

    /// Appends a contributed command for `kind`.
    pub fn contribute(&mut self, kind: HookKind, origin: impl Into<String>, command: LifecycleCommand) {
        self.slots.entry(kind).or_default().contributed.push(HookEntry {
            origin: origin.into(),
            command,
        });
    }

    /// Returns the slot for `kind`, if anything was recorded.
    #[must_use]
    pub fn slot(&self, kind: HookKind) -> Option<&HookSlot> {
        self.slots.get(&kind)
    }

    /// Returns the commands for `kind` in run order: contributions, then the user's.
    #[must_use]
    pub fn commands(&self, kind: HookKind) -> Vec<HookEntry> {
        let Some(slot) = self.slots.get(&kind) else {
            return Vec::new();
        };
        let mut ordered = slot.contributed.clone();
        if let Some(user) = &slot.user {
            ordered.push(HookEntry {
                origin: USER_ORIGIN.into(),
                command: user.clone(),
            });
        }
        ordered
    }

    /// Returns the commands for `kind` unless it is in `skipped`.
    #[must_use]
    pub fn runnable(&self, kind: HookKind, skipped: &BTreeSet<HookKind>) -> Vec<HookEntry> {
        if skipped.contains(&kind) {
            return Vec::new();
        }
        self.commands(kind)
    }

    /// Returns a copy with every command string passed through `f`.
    #[must_use]
    pub fn map_strings(&self, f: &impl Fn(&str) -> String) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|(kind, slot)| {
                let mapped = HookSlot {
                    contributed: slot
                        .contributed
                        .iter()
                        .map(|e| HookEntry {
                            origin: e.origin.clone(),
                            command: e.command.map_strings(f),
                        })
                        .collect(),
                    user: slot.user.as_ref().map(|c| c.map_strings(f)),
                };
                (*kind, mapped)
            })
            .collect();
        Self { slots }
    }
}
