//! Lowering from the abstract tree to an executable scenario plan.
//!
//! Compile-time variables (`var` declarations) substitute eagerly into the
//! curl arguments. Built-in references (`VU`, `ITER`, `TIME`, `UUID`,
//! `COUNTER`) and names bound by earlier extractions stay textual for the
//! runtime substitution pass.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use loadx_ir::{
    AssertOp, AssertValue, Assertion, CondOp, Condition, ExtractSource, Extraction, LoadProfile,
    RequestNode, ScenarioPlan,
};
use regex::Regex;

use crate::ast::*;
use crate::curl;
use crate::error::{Error, Result, parse_duration};
use crate::parser::Parser;

/// Names resolved per iteration by the runtime, never at compile time.
pub const BUILTIN_VARS: [&str; 5] = ["VU", "ITER", "TIME", "UUID", "COUNTER"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_VARS.contains(&name)
}

fn var_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("static pattern"))
}

/// Parse and compile a source file in one step.
pub fn compile_source(source: &str, scenario: Option<&str>) -> Result<ScenarioPlan> {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    if !parser.errors().is_empty() {
        return Err(Error::Parse(parser.into_errors()));
    }
    compile(&program, scenario)
}

/// Scenario names in declaration order.
pub fn scenario_names(program: &Program) -> Vec<String> {
    program
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Scenario(decl) => Some(decl.name.clone()),
            _ => None,
        })
        .collect()
}

/// Compile one scenario of the program. With `None`, picks the only
/// scenario, else one named `default`/`main`/`test`, else the first.
pub fn compile(program: &Program, scenario: Option<&str>) -> Result<ScenarioPlan> {
    Compiler::new(program)?.compile(scenario)
}

struct Compiler<'a> {
    vars: BTreeMap<String, String>,
    requests: BTreeMap<&'a str, &'a RequestDecl>,
    scenarios: Vec<&'a ScenarioDecl>,
}

impl<'a> Compiler<'a> {
    fn new(program: &'a Program) -> Result<Self> {
        let mut vars = BTreeMap::new();
        let mut requests = BTreeMap::new();
        let mut scenarios = Vec::new();

        for statement in &program.statements {
            match statement {
                Statement::Variable(decl) => {
                    // Later vars may reference earlier ones.
                    let value = substitute_known(&decl.value.to_template(), &vars);
                    vars.insert(decl.name.clone(), value);
                }
                Statement::Request(decl) => {
                    requests.insert(decl.name.as_str(), decl);
                }
                Statement::Scenario(decl) => scenarios.push(decl),
            }
        }

        Ok(Self {
            vars,
            requests,
            scenarios,
        })
    }

    fn pick_scenario(&self, name: Option<&str>) -> Result<&'a ScenarioDecl> {
        if self.scenarios.is_empty() {
            return Err(Error::NoScenario);
        }

        if let Some(name) = name {
            return self
                .scenarios
                .iter()
                .find(|s| s.name == name)
                .copied()
                .ok_or_else(|| Error::UnknownScenario(name.to_string()));
        }

        if self.scenarios.len() == 1 {
            return Ok(self.scenarios[0]);
        }

        for candidate in ["default", "main", "test"] {
            if let Some(found) = self.scenarios.iter().find(|s| s.name == candidate) {
                return Ok(found);
            }
        }

        Ok(self.scenarios[0])
    }

    fn compile(&self, scenario: Option<&str>) -> Result<ScenarioPlan> {
        let decl = self.pick_scenario(scenario)?;

        let load = self.lower_load(decl)?;

        let mut setup = Vec::new();
        for name in &decl.setup {
            setup.push(self.request_node(name, &format!("setup of scenario `{}`", decl.name))?);
        }

        let mut teardown = Vec::new();
        for name in &decl.teardown {
            teardown
                .push(self.request_node(name, &format!("teardown of scenario `{}`", decl.name))?);
        }

        let mut main = Vec::new();
        let mut ancestors = Vec::new();
        for flow in &decl.flow {
            self.lower_flow(flow, &mut main, &mut ancestors)?;
        }

        Ok(ScenarioPlan {
            name: decl.name.clone(),
            load,
            setup,
            main,
            teardown,
            variables: self.vars.clone(),
        })
    }

    fn lower_load(&self, decl: &ScenarioDecl) -> Result<LoadProfile> {
        let load = decl
            .load
            .as_ref()
            .ok_or_else(|| Error::MissingLoad(decl.name.clone()))?;

        let duration = load
            .duration
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        let invalid = |message: &str| Error::InvalidLoad(decl.name.clone(), message.to_string());

        if let (Some(vus), Some(duration)) = (load.vus.filter(|v| *v > 0), duration) {
            if load.iterations.is_none() && load.rps.is_none() {
                return Ok(LoadProfile::VusForDuration { vus, duration });
            }
        }

        if let Some(rps) = load.rps.filter(|r| *r > 0) {
            let duration =
                duration.ok_or_else(|| invalid("rps mode requires a duration"))?;
            return Ok(LoadProfile::RpsForDuration { rps, duration });
        }

        if let Some(iterations) = load.iterations.filter(|i| *i > 0) {
            return Ok(LoadProfile::Iterations {
                iterations,
                vus: load.vus.filter(|v| *v > 0).unwrap_or(1),
            });
        }

        if load.vus.is_some() && duration.is_none() {
            return Err(invalid("vus mode requires a duration"));
        }

        Err(invalid(
            "expected one of: vus + duration, rps + duration, iterations",
        ))
    }

    fn lower_flow(
        &self,
        flow: &FlowStatement,
        out: &mut Vec<RequestNode>,
        ancestors: &mut Vec<String>,
    ) -> Result<()> {
        match flow {
            FlowStatement::Run { name, .. } => {
                self.check_cycle(name, ancestors)?;
                out.push(self.request_node(name, "flow")?);
            }
            FlowStatement::Sequence { steps, .. } => {
                for step in steps {
                    self.check_cycle(step, ancestors)?;
                    out.push(self.request_node(step, "flow")?);
                }
            }
            FlowStatement::Parallel { steps, .. } => {
                let mut group = RequestNode::group("parallel");
                group.parallel = true;
                for step in steps {
                    self.check_cycle(step, ancestors)?;
                    group.children.push(self.request_node(step, "flow")?);
                }
                out.push(group);
            }
            FlowStatement::Nested {
                parent, children, ..
            } => {
                self.check_cycle(parent, ancestors)?;
                let mut node = self.request_node(parent, "flow")?;

                ancestors.push(parent.clone());
                let mut lowered = Vec::new();
                for child in children {
                    self.lower_flow(child, &mut lowered, ancestors)?;
                }
                ancestors.pop();

                // A nested body that is exactly one parallel group runs its
                // requests directly as the parent's parallel children.
                if lowered.len() == 1 && lowered[0].parallel && lowered[0].ir.is_none() {
                    node.parallel = true;
                    node.children = lowered.into_iter().next().map(|g| g.children).unwrap_or_default();
                } else {
                    node.children = lowered;
                }
                out.push(node);
            }
            FlowStatement::Conditional {
                condition,
                then_block,
                else_block,
                ..
            } => {
                let mut cond = lower_condition(condition)?;
                cond.left = substitute_known(&cond.left, &self.vars);
                cond.right = substitute_known(&cond.right, &self.vars);

                let mut then_node = RequestNode::group("if");
                then_node.condition = Some(cond.clone());
                for child in then_block {
                    self.lower_flow(child, &mut then_node.children, ancestors)?;
                }
                out.push(then_node);

                if !else_block.is_empty() {
                    let mut else_node = RequestNode::group("else");
                    else_node.condition = Some(negate(cond));
                    for child in else_block {
                        self.lower_flow(child, &mut else_node.children, ancestors)?;
                    }
                    out.push(else_node);
                }
            }
            FlowStatement::Think { duration, .. } => {
                let mut node = RequestNode::group("think");
                node.think_time = Some(parse_duration(duration)?);
                out.push(node);
            }
        }
        Ok(())
    }

    fn check_cycle(&self, name: &str, ancestors: &[String]) -> Result<()> {
        if ancestors.iter().any(|a| a == name) {
            let mut path: Vec<String> = ancestors.to_vec();
            path.push(name.to_string());
            return Err(Error::CyclicFlow(path));
        }
        Ok(())
    }

    /// Build the plan node for one request declaration: run the curl
    /// translator over the substituted arguments and attach assertions,
    /// extractions, and retry settings.
    fn request_node(&self, name: &str, context: &str) -> Result<RequestNode> {
        let decl = self
            .requests
            .get(name)
            .ok_or_else(|| Error::UnknownRequest {
                name: name.to_string(),
                context: context.to_string(),
            })?;

        let curl_cmd = decl
            .curl
            .as_ref()
            .ok_or_else(|| Error::MissingCurl(name.to_string()))?;

        let args: Vec<String> = curl_cmd
            .args
            .iter()
            .map(|arg| substitute_known(arg, &self.vars))
            .collect();

        let mut ir = curl::from_args(&args)?;
        if let Some(metadata) = &mut ir.metadata {
            metadata.source = "scenario".to_string();
        }

        if let Some(retry) = &decl.retry {
            let vars = &mut ir.evaluation.vars;
            if let Some(max_attempts) = retry.max_attempts {
                vars.insert("retry_max_attempts".to_string(), max_attempts.into());
            }
            if let Some(backoff) = &retry.backoff {
                vars.insert("retry_backoff".to_string(), backoff.clone().into());
            }
            if let Some(base_delay) = &retry.base_delay {
                vars.insert("retry_base_delay".to_string(), base_delay.clone().into());
            }
        }

        let mut node = RequestNode::request(name, ir);

        for assertion in &decl.assertions {
            node.checks.push(lower_assertion(assertion)?);
        }

        for extraction in &decl.extractions {
            node.extract.push(lower_extraction(extraction)?);
        }

        Ok(node)
    }
}

/// Replace `${name}` with its compile-time binding. Built-ins and unbound
/// names (to be filled by extraction at run time) stay untouched.
fn substitute_known(input: &str, vars: &BTreeMap<String, String>) -> String {
    var_ref_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            if is_builtin(name) {
                return caps[0].to_string();
            }
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lower_assertion(node: &AssertionNode) -> Result<Assertion> {
    let op: AssertOp = node
        .operator
        .parse()
        .map_err(|_| Error::InvalidAssertion(format!("unknown operator `{}`", node.operator)))?;

    let value = if op == AssertOp::In {
        AssertValue::List(
            node.values
                .iter()
                .map(|expr| lower_assert_value(expr, &node.field))
                .collect::<Result<Vec<_>>>()?,
        )
    } else {
        let expr = node.value.as_ref().ok_or_else(|| {
            Error::InvalidAssertion(format!("assertion on `{}` has no value", node.field))
        })?;
        lower_assert_value(expr, &node.field)?
    };

    Ok(Assertion {
        field: node.field.clone(),
        op,
        value,
    })
}

fn lower_assert_value(expr: &Expr, _field: &str) -> Result<AssertValue> {
    Ok(match expr {
        // Bare numbers on latency mean milliseconds, which is also just
        // the number.
        Expr::Number(n) => AssertValue::Number(*n as f64),
        Expr::Duration(literal) => {
            AssertValue::Number(parse_duration(literal)?.as_millis() as f64)
        }
        Expr::Str(s) => AssertValue::String(s.clone()),
        Expr::Bool(b) => AssertValue::Bool(*b),
        Expr::Ident(name) => AssertValue::String(name.clone()),
        Expr::VarRef(name) => AssertValue::String(format!("${{{name}}}")),
    })
}

fn lower_extraction(node: &ExtractionNode) -> Result<Extraction> {
    let source = match node.kind {
        ExtractKind::JsonPath => ExtractSource::JsonPath(node.path.clone()),
        ExtractKind::Regex => {
            Regex::new(&node.path).map_err(|source| Error::InvalidRegex {
                name: node.variable.clone(),
                source,
            })?;
            ExtractSource::Regex(node.path.clone())
        }
        ExtractKind::Header => ExtractSource::Header(node.path.clone()),
        ExtractKind::Cookie => ExtractSource::Cookie(node.path.clone()),
    };

    Ok(Extraction {
        name: node.variable.clone(),
        source,
    })
}

fn lower_condition(node: &ConditionNode) -> Result<Condition> {
    let op = match node.operator.as_str() {
        "==" => CondOp::Eq,
        "!=" => CondOp::Ne,
        "<" => CondOp::Lt,
        "<=" => CondOp::Le,
        ">" => CondOp::Gt,
        ">=" => CondOp::Ge,
        other => {
            return Err(Error::InvalidCondition(format!("unknown operator `{other}`")));
        }
    };

    Ok(Condition {
        left: node.left.to_template(),
        op,
        right: node.right.to_template(),
    })
}

fn negate(cond: Condition) -> Condition {
    let op = match cond.op {
        CondOp::Eq => CondOp::Ne,
        CondOp::Ne => CondOp::Eq,
        CondOp::Lt => CondOp::Ge,
        CondOp::Le => CondOp::Gt,
        CondOp::Gt => CondOp::Le,
        CondOp::Ge => CondOp::Lt,
    };
    Condition { op, ..cond }
}
