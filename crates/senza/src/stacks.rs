//! stack inventory and reference resolution
//!
//! Deployed stacks are named `<application>-<version>`. Commands address
//! them through stack references: a name plus an optional version, where
//! both parts may be plain tokens (exact match) or regular expressions
//! (anchored, full match). A plain token never behaves as a pattern, so a
//! name like `app-2x` cannot accidentally match `app-2y`.

use crate::cloud::{with_retries, ControlPlane, ExternalServiceError};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

const LIST_ATTEMPTS: usize = 3;

const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// Characters that turn a token into a regular expression
const PATTERN_METACHARACTERS: &[char] =
    &['.', '*', '+', '?', '[', ']', '(', ')', '{', '}', '|', '^', '$', '\\'];

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v[0-9][a-zA-Z0-9-]*$").expect("version pattern is valid"))
}

/// One deployed stack as reported by the control plane
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct StackInventoryEntry {
    pub application_name: String,
    pub version: String,
    pub stack_status: String,
    /// seconds since the epoch
    pub creation_time: f64,
}

impl StackInventoryEntry {
    /// Split a physical stack name at its last dash
    ///
    /// Stacks deployed without a version keep an empty version part.
    pub fn from_stack_name(name: &str, status: impl Into<String>, creation_time: f64) -> Self {
        let (application_name, version) = match name.rsplit_once('-') {
            Some((application_name, version)) => {
                (application_name.to_string(), version.to_string())
            }
            None => (name.to_string(), String::new()),
        };
        Self {
            application_name,
            version,
            stack_status: status.into(),
            creation_time,
        }
    }

    pub fn stack_name(&self) -> String {
        if self.version.is_empty() {
            return self.application_name.clone();
        }
        format!("{}-{}", self.application_name, self.version)
    }

    /// Deleted stacks linger in listings for a while
    pub fn is_active(&self) -> bool {
        self.stack_status != DELETE_COMPLETE
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    fn parse(token: &str) -> Result<Self, ResolveError> {
        if !token.contains(PATTERN_METACHARACTERS) {
            return Ok(Self::Exact(token.to_string()));
        }
        let anchored = format!("^(?:{token})$");
        let pattern = Regex::new(&anchored).map_err(|error| ResolveError::InvalidPattern {
            pattern: token.to_string(),
            reason: error.to_string(),
        })?;
        Ok(Self::Pattern(pattern))
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(token) => token == candidate,
            Self::Pattern(pattern) => pattern.is_match(candidate),
        }
    }
}

/// A name plus optional version selector for deployed stacks
#[derive(Debug, Clone)]
pub struct StackReference {
    name: String,
    version: Option<String>,
    name_matcher: Matcher,
    version_matcher: Option<Matcher>,
}

impl StackReference {
    pub fn parse(name: &str, version: Option<&str>) -> Result<Self, ResolveError> {
        Ok(Self {
            name: name.to_string(),
            version: version.map(str::to_string),
            name_matcher: Matcher::parse(name)?,
            version_matcher: version.map(Matcher::parse).transpose()?,
        })
    }

    pub fn matches(&self, entry: &StackInventoryEntry) -> bool {
        if !self.name_matcher.matches(&entry.application_name) {
            return false;
        }
        match &self.version_matcher {
            Some(matcher) => matcher.matches(&entry.version),
            None => true,
        }
    }
}

impl fmt::Display for StackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parse command-line words into stack references
///
/// A word starting like `v1` or `v2-rc` attaches as version to the
/// preceding name, so `senza ... myapp v1 v2 other` addresses `myapp-v1`,
/// `myapp-v2` and every version of `other`.
pub fn parse_stack_refs(words: &[String]) -> Result<Vec<StackReference>, ResolveError> {
    let mut references: Vec<StackReference> = Vec::new();
    let mut current_name: Option<String> = None;
    let mut current_used = false;

    for word in words {
        match &current_name {
            Some(name) if version_re().is_match(word) => {
                references.push(StackReference::parse(name, Some(word))?);
                current_used = true;
            }
            _ => {
                if let Some(name) = current_name.take() {
                    if !current_used {
                        references.push(StackReference::parse(&name, None)?);
                    }
                }
                current_name = Some(word.clone());
                current_used = false;
            }
        }
    }
    if let Some(name) = current_name {
        if !current_used {
            references.push(StackReference::parse(&name, None)?);
        }
    }
    Ok(references)
}

/// List stacks matching the given references
///
/// One logical listing call, retried on transient failures. With no
/// references every stack matches. `all` includes deleted stacks,
/// `unique_only` keeps only the most recently created stack per
/// application name. The result is ordered by application name and then
/// version: purely numeric versions compare as numbers (`app-2` before
/// `app-10`), anything else compares lexicographically.
pub fn find_stacks(
    control_plane: &dyn ControlPlane,
    references: &[StackReference],
    all: bool,
    unique_only: bool,
) -> Result<Vec<StackInventoryEntry>, ResolveError> {
    let listed = with_retries(LIST_ATTEMPTS, || control_plane.list_stacks())?;

    let mut matched: Vec<StackInventoryEntry> = listed
        .into_iter()
        .filter(|entry| all || entry.is_active())
        .filter(|entry| {
            references.is_empty() || references.iter().any(|reference| reference.matches(entry))
        })
        .collect();

    if unique_only {
        matched.sort_by(|a, b| {
            a.application_name
                .cmp(&b.application_name)
                .then(b.creation_time.total_cmp(&a.creation_time))
        });
        matched.dedup_by(|a, b| a.application_name == b.application_name);
    }

    matched.sort_by(|a, b| {
        a.application_name
            .cmp(&b.application_name)
            .then_with(|| version_cmp(&a.version, &b.version))
    });
    Ok(matched)
}

/// Resolve a reference that must address exactly one active stack
pub fn resolve_single(
    control_plane: &dyn ControlPlane,
    reference: &StackReference,
) -> Result<StackInventoryEntry, ResolveError> {
    let matched = find_stacks(control_plane, std::slice::from_ref(reference), false, false)?;
    match matched.len() {
        0 => Err(ResolveError::NoMatchingStack {
            reference: reference.to_string(),
        }),
        1 => Ok(matched.into_iter().next().expect("one entry")),
        _ => Err(ResolveError::AmbiguousStackReference {
            reference: reference.to_string(),
            candidates: matched
                .iter()
                .map(StackInventoryEntry::stack_name)
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

/// Purely numeric versions compare as numbers, everything else falls
/// back to plain lexicographic order
fn version_cmp(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| {
        if !s.is_empty() && s.bytes().all(|byte| byte.is_ascii_digit()) {
            s.parse::<u128>().ok()
        } else {
            None
        }
    };
    match (numeric(a), numeric(b)) {
        (Some(left), Some(right)) => left.cmp(&right),
        _ => a.cmp(b),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("invalid stack reference pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no matching active stack for {reference:?}")]
    NoMatchingStack { reference: String },

    #[error("{reference:?} matches more than one stack: {candidates}")]
    AmbiguousStackReference {
        reference: String,
        candidates: String,
    },

    #[error("cannot list stacks")]
    External(#[from] ExternalServiceError),
}
