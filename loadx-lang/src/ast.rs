//! Abstract tree produced by the parser.
//!
//! Node kinds are closed enums: the grammar fixes the set, so dispatch is a
//! `match` rather than an open trait hierarchy.

use crate::token::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Variable(VariableDecl),
    Request(RequestDecl),
    Scenario(ScenarioDecl),
}

/// `var name = value`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub value: Expr,
    pub pos: Position,
}

/// `request name { curl ... / assert ... / extract { } / retry { } }`
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDecl {
    pub name: String,
    pub curl: Option<CurlCommand>,
    pub assertions: Vec<AssertionNode>,
    pub extractions: Vec<ExtractionNode>,
    pub retry: Option<RetryNode>,
    pub pos: Position,
}

/// One URL template segment, preserved so substitution is exact.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlPart {
    Literal(String),
    Var(String),
}

/// The curl sub-node of a request declaration. Header/body/cookie fields
/// are the parse-level view; the full flag set is interpreted by the curl
/// translator, which receives `args`.
#[derive(Debug, Clone, PartialEq)]
pub struct CurlCommand {
    /// The URL with `${...}` references intact.
    pub url: String,
    pub url_parts: Vec<UrlPart>,
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub cookies: Vec<(String, String)>,
    /// The shell-level argument list (flags, values, and the joined URL),
    /// ready for the curl translator after variable substitution.
    pub args: Vec<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertionNode {
    /// `status`, `latency`, or a dotted path (`body.user.id`).
    pub field: String,
    /// Source operator text (`==`, `!=`, `<`, ..., `contains`, `in`).
    pub operator: String,
    pub value: Option<Expr>,
    /// Populated for `in [a, b, c]`.
    pub values: Vec<Expr>,
    pub pos: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractKind {
    JsonPath,
    Regex,
    Header,
    Cookie,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionNode {
    pub variable: String,
    pub kind: ExtractKind,
    /// The path with its prefix (`$.`, `regex:`, ...) stripped.
    pub path: String,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryNode {
    pub max_attempts: Option<u32>,
    pub backoff: Option<String>,
    pub base_delay: Option<String>,
    pub pos: Position,
}

/// `scenario name { load ...; setup { } ; flow...; teardown { } }`
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDecl {
    pub name: String,
    pub load: Option<LoadNode>,
    pub setup: Vec<String>,
    pub flow: Vec<FlowStatement>,
    pub teardown: Vec<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadNode {
    pub vus: Option<u32>,
    pub rps: Option<u32>,
    pub iterations: Option<u64>,
    /// Duration literal text, e.g. `5m`.
    pub duration: Option<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowStatement {
    /// `run name`
    Run { name: String, pos: Position },
    /// `run a -> b -> c`
    Sequence { steps: Vec<String>, pos: Position },
    /// `run a | b | c`
    Parallel { steps: Vec<String>, pos: Position },
    /// `run parent { ... }`
    Nested {
        parent: String,
        children: Vec<FlowStatement>,
        pos: Position,
    },
    /// `if cond { ... } else { ... }`
    Conditional {
        condition: ConditionNode,
        then_block: Vec<FlowStatement>,
        else_block: Vec<FlowStatement>,
        pos: Position,
    },
    /// `think 500ms`
    Think { duration: String, pos: Position },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionNode {
    pub left: Expr,
    /// `==`, `!=`, `<`, `<=`, `>`, `>=`.
    pub operator: String,
    pub right: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Number(i64),
    /// Duration literal text, e.g. `500ms`.
    Duration(String),
    /// `${name}` — carries the bare name.
    VarRef(String),
    Ident(String),
    Bool(bool),
}

impl Expr {
    /// Render the expression the way it substitutes into a template:
    /// variable references keep their `${...}` form.
    pub fn to_template(&self) -> String {
        match self {
            Expr::Str(s) => s.clone(),
            Expr::Number(n) => n.to_string(),
            Expr::Duration(d) => d.clone(),
            Expr::VarRef(name) => format!("${{{name}}}"),
            Expr::Ident(name) => name.clone(),
            Expr::Bool(b) => b.to_string(),
        }
    }
}
