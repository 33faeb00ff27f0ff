//! Compiled scenario plan: what the load driver executes.
//!
//! A plan is immutable once built. The runtime clones per-iteration copies
//! of each node's IR before substitution or mutation touches it.

use std::time::Duration;

use std::collections::BTreeMap;

use crate::Ir;

/// The load shape a scenario runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProfile {
    /// N looping virtual users until the deadline.
    VusForDuration { vus: u32, duration: Duration },
    /// One iteration started every `1/rps` until the deadline.
    RpsForDuration { rps: u32, duration: Duration },
    /// A fixed iteration total split across the virtual users.
    Iterations { iterations: u64, vus: u32 },
}

impl LoadProfile {
    pub fn vus(&self) -> u32 {
        match self {
            LoadProfile::VusForDuration { vus, .. } => *vus,
            LoadProfile::RpsForDuration { .. } => 0,
            LoadProfile::Iterations { vus, .. } => *vus,
        }
    }
}

/// Comparison operators shared by assertions and flow conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum AssertOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "contains")]
    Contains,
    #[strum(serialize = "in")]
    In,
}

/// An assertion's right-hand side, lowered from the source expression.
/// Duration literals become their millisecond value.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertValue {
    Number(f64),
    String(String),
    Bool(bool),
    List(Vec<AssertValue>),
}

impl std::fmt::Display for AssertValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssertValue::Number(n) => write!(f, "{n}"),
            AssertValue::String(s) => write!(f, "{s}"),
            AssertValue::Bool(b) => write!(f, "{b}"),
            AssertValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// One response check: field, operator, expected value.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// `status`, `latency`, or a dotted path under `body` / `header`.
    pub field: String,
    pub op: AssertOp,
    pub value: AssertValue,
}

/// Where an extracted value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractSource {
    /// `$.a.b` or `$.items[0].id`.
    JsonPath(String),
    /// First capture group of the pattern against the stringified body.
    Regex(String),
    /// First response header with this name.
    Header(String),
    /// Named cookie from the `Set-Cookie` headers.
    Cookie(String),
}

/// One `name = path` extraction rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub name: String,
    pub source: ExtractSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A flow condition. Both sides are templates substituted at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: String,
    pub op: CondOp,
    pub right: String,
}

/// One node of the compiled request tree.
///
/// Grouping nodes (parallel blocks, conditional branches, think pauses)
/// have no IR of their own; they exist for their children and flags.
#[derive(Debug, Clone)]
pub struct RequestNode {
    pub name: String,
    pub ir: Option<Ir>,
    pub extract: Vec<Extraction>,
    pub checks: Vec<Assertion>,
    pub children: Vec<RequestNode>,
    /// When set, children run as sibling tasks and are jointly awaited.
    pub parallel: bool,
    /// When set, the node (and its subtree) runs only if the condition
    /// holds against the iteration's variable map.
    pub condition: Option<Condition>,
    /// Pause after the node's subtree completes.
    pub think_time: Option<Duration>,
}

impl RequestNode {
    pub fn request(name: impl Into<String>, ir: Ir) -> Self {
        Self {
            ir: Some(ir),
            ..Self::group(name)
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ir: None,
            extract: Vec::new(),
            checks: Vec::new(),
            children: Vec::new(),
            parallel: false,
            condition: None,
            think_time: None,
        }
    }

    /// Number of nodes in this subtree, including self. A condition node
    /// with no request of its own still counts as one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(RequestNode::node_count).sum::<usize>()
    }
}

/// A compiled, immutable scenario.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub load: LoadProfile,
    pub setup: Vec<RequestNode>,
    pub main: Vec<RequestNode>,
    pub teardown: Vec<RequestNode>,
    /// Compile-time variable bindings, snapshotted for diagnostics.
    pub variables: BTreeMap<String, String>,
}

impl ScenarioPlan {
    pub fn main_node_count(&self) -> usize {
        self.main.iter().map(RequestNode::node_count).sum()
    }
}
