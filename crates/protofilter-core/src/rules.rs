//! Include/exclude rule forests
//!
//! Rules are two ordered forests of names. A path through the schema
//! (`file/message/field`) is matched segment by segment against both forests
//! to produce an [`InclusionVerdict`].
//!
//! The textual form is YAML:
//!
//! ```yaml
//! include:
//!   - test.proto:
//!     - msg_a
//! exclude:
//!   - test.proto:
//!     - msg_a:
//!       - field_a_2
//! ```

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

use crate::path;

/// A named rule, optionally with nested rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleNode {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RuleNode>,
}

impl RuleNode {
    /// Create a leaf rule
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Create a rule with nested rules
    pub fn with_children(name: impl Into<String>, children: Vec<RuleNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Leaf rules are terminal decisions for their exact path
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Result of looking a single path up in the rule forests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionVerdict {
    /// No rule covers this path
    Unknown,

    /// Named by a non-leaf include rule: kept, children decided individually
    IncludedWithoutChildren,

    /// Named by a leaf include rule: kept along with everything below it
    IncludedWithChildren,

    /// Named by a leaf exclude rule
    Excluded,
}

impl std::fmt::Display for InclusionVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::IncludedWithoutChildren => "included without children",
            Self::IncludedWithChildren => "included with children",
            Self::Excluded => "excluded",
        };
        write!(f, "{}", s)
    }
}

/// Which side wins when a path is a leaf in both forests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePrecedence {
    /// Include leaves are checked first
    #[default]
    Include,

    /// Exclude leaves are checked first
    Exclude,
}

impl std::fmt::Display for RulePrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Exclude => write!(f, "exclude"),
        }
    }
}

/// Both rule forests
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleForest {
    pub include: Vec<RuleNode>,
    pub exclude: Vec<RuleNode>,
    pub precedence: RulePrecedence,
}

impl RuleForest {
    pub fn new(include: Vec<RuleNode>, exclude: Vec<RuleNode>) -> Self {
        Self {
            include,
            exclude,
            precedence: RulePrecedence::default(),
        }
    }

    pub fn with_precedence(mut self, precedence: RulePrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Whether both forests are empty
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Look a path up in both forests
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> InclusionVerdict {
        lookup_core(&self.include, &self.exclude, path, self.precedence)
    }

    /// Look up a slash-joined path (`test.proto/msg_a`)
    pub fn lookup_path(&self, path: &str) -> InclusionVerdict {
        self.lookup(&path::split(path))
    }

    /// Full path of every include rule and every exclude rule, in order
    pub fn rule_paths(&self) -> (Vec<String>, Vec<String>) {
        let mut include = Vec::new();
        collect_paths(&self.include, "", &mut include);
        let mut exclude = Vec::new();
        collect_paths(&self.exclude, "", &mut exclude);
        (include, exclude)
    }

    /// Paths that are leaves in both forests
    pub fn overlapping_leaves(&self) -> Vec<String> {
        let mut result = Vec::new();
        collect_overlaps(&self.include, &self.exclude, "", &mut result);
        result
    }

    /// Parse rules from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, RulesError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let document: Value =
            serde_yaml::from_str(yaml).map_err(|e| RulesError::ParseError(e.to_string()))?;

        let mapping = match document {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(RulesError::InvalidStructure {
                    context: String::new(),
                    message: format!("expected a mapping at the top level, found {}", describe(&other)),
                })
            }
        };

        let mut forest = Self::default();
        for (key, value) in mapping {
            let key = match key {
                Value::String(s) => s,
                other => {
                    return Err(RulesError::InvalidStructure {
                        context: String::new(),
                        message: format!("expected a string key, found {}", describe(&other)),
                    })
                }
            };
            let nodes = nodes_from_yaml(&value, &key)?;
            match key.as_str() {
                "include" => forest.include = nodes,
                "exclude" => forest.exclude = nodes,
                _ => return Err(RulesError::UnknownKey(key)),
            }
        }

        Ok(forest)
    }

    /// Load rules from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, RulesError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RulesError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_yaml(&contents)
    }
}

fn find_node<'a>(nodes: &'a [RuleNode], name: &str) -> Option<&'a RuleNode> {
    nodes.iter().find(|n| n.name == name)
}

fn lookup_core<S: AsRef<str>>(
    include: &[RuleNode],
    exclude: &[RuleNode],
    path: &[S],
    precedence: RulePrecedence,
) -> InclusionVerdict {
    let Some((first, rest)) = path.split_first() else {
        return InclusionVerdict::Unknown;
    };
    let include_node = find_node(include, first.as_ref());
    let exclude_node = find_node(exclude, first.as_ref());

    if rest.is_empty() {
        let include_leaf = include_node.map(RuleNode::is_leaf).unwrap_or(false);
        let exclude_leaf = exclude_node.map(RuleNode::is_leaf).unwrap_or(false);

        let leaf_verdict = match precedence {
            RulePrecedence::Include if include_leaf => Some(InclusionVerdict::IncludedWithChildren),
            RulePrecedence::Include if exclude_leaf => Some(InclusionVerdict::Excluded),
            RulePrecedence::Exclude if exclude_leaf => Some(InclusionVerdict::Excluded),
            RulePrecedence::Exclude if include_leaf => Some(InclusionVerdict::IncludedWithChildren),
            _ => None,
        };
        if let Some(verdict) = leaf_verdict {
            return verdict;
        }
        if include_node.is_some() {
            return InclusionVerdict::IncludedWithoutChildren;
        }
        return InclusionVerdict::Unknown;
    }

    if include_node.is_none() && exclude_node.is_none() {
        return InclusionVerdict::Unknown;
    }

    let include_children = include_node.map(|n| n.children.as_slice()).unwrap_or(&[]);
    let exclude_children = exclude_node.map(|n| n.children.as_slice()).unwrap_or(&[]);

    lookup_core(include_children, exclude_children, rest, precedence)
}

fn collect_paths(nodes: &[RuleNode], prefix: &str, out: &mut Vec<String>) {
    for node in nodes {
        let node_path = path::concat(prefix, &node.name);
        collect_paths(&node.children, &node_path, out);
        out.push(node_path);
    }
}

fn collect_overlaps(include: &[RuleNode], exclude: &[RuleNode], prefix: &str, out: &mut Vec<String>) {
    for inc in include {
        let Some(exc) = find_node(exclude, &inc.name) else {
            continue;
        };
        let node_path = path::concat(prefix, &inc.name);
        if inc.is_leaf() && exc.is_leaf() {
            out.push(node_path);
        } else {
            collect_overlaps(&inc.children, &exc.children, &node_path, out);
        }
    }
}

fn nodes_from_yaml(value: &Value, context: &str) -> Result<Vec<RuleNode>, RulesError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| node_from_yaml(item, context))
            .collect(),
        other => Err(RulesError::InvalidStructure {
            context: context.to_string(),
            message: format!("expected a sequence of rules, found {}", describe(other)),
        }),
    }
}

fn node_from_yaml(value: &Value, context: &str) -> Result<RuleNode, RulesError> {
    match value {
        Value::String(name) => Ok(RuleNode::new(name.clone())),
        Value::Number(number) => Ok(RuleNode::new(number.to_string())),
        Value::Mapping(mapping) => {
            if mapping.len() != 1 {
                return Err(RulesError::InvalidStructure {
                    context: context.to_string(),
                    message: format!("expected a single-key mapping, found {} keys", mapping.len()),
                });
            }
            let Some((key, children)) = mapping.iter().next() else {
                return Err(RulesError::InvalidStructure {
                    context: context.to_string(),
                    message: "empty mapping".to_string(),
                });
            };
            let name = match key {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(RulesError::InvalidStructure {
                        context: context.to_string(),
                        message: format!("expected a string key, found {}", describe(other)),
                    })
                }
            };
            let child_context = path::concat(context, &name);
            let children = match children {
                Value::Sequence(_) => nodes_from_yaml(children, &child_context)?,
                other => {
                    return Err(RulesError::InvalidStructure {
                        context: child_context,
                        message: format!("expected a sequence of rules, found {}", describe(other)),
                    })
                }
            };
            Ok(RuleNode::with_children(name, children))
        }
        other => Err(RulesError::InvalidStructure {
            context: context.to_string(),
            message: format!("unsupported rule value: {}", describe(other)),
        }),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Rule configuration errors
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("Can't load rules file {0}: {1}")]
    IoError(String, String),

    #[error("YAML parsing failed: {0}")]
    ParseError(String),

    #[error("Unknown top-level key '{0}' (expected 'include' or 'exclude')")]
    UnknownKey(String),

    #[error("Invalid rules at '{context}': {message}")]
    InvalidStructure { context: String, message: String },
}
