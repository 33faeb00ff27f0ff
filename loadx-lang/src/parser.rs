//! Recursive-descent parser over the token stream.
//!
//! Recovery model: an unexpected token records a diagnostic and skips to
//! the next plausible synchronising token (newline at statement level,
//! closing brace inside a block). Each block-parsing production consumes
//! its closing brace; flow productions consume the last token they
//! recognise.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::token::{Position, Token, TokenKind};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peek: Token,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            lexer,
            current,
            peek,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }

    fn advance(&mut self) {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn current_is(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek.kind == kind
    }

    /// Advance past the peek token if it matches, else record a diagnostic.
    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek_is(kind) {
            self.advance();
            true
        } else {
            self.errors.push(ParseError {
                message: format!(
                    "expected next token to be {}, got {}",
                    kind.name(),
                    self.peek.kind.name()
                ),
                pos: self.peek.pos,
            });
            false
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        self.errors.push(ParseError {
            message: message.into(),
            pos: self.current.pos,
        });
    }

    fn skip_newlines(&mut self) {
        while self.current_is(TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_trivia(&mut self) {
        while self.current_is(TokenKind::Newline) || self.current_is(TokenKind::Comment) {
            self.advance();
        }
    }

    /// Statement-level recovery: skip to the next newline or closing brace.
    fn synchronize(&mut self) {
        while !self.current_is(TokenKind::Newline)
            && !self.current_is(TokenKind::RBrace)
            && !self.current_is(TokenKind::Eof)
        {
            self.advance();
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut statements = Vec::new();

        while !self.current_is(TokenKind::Eof) {
            self.skip_trivia();
            if self.current_is(TokenKind::Eof) {
                break;
            }

            match self.current.kind {
                TokenKind::Var => {
                    if let Some(decl) = self.parse_variable_decl() {
                        statements.push(Statement::Variable(decl));
                    }
                }
                TokenKind::Request => {
                    if let Some(decl) = self.parse_request_decl() {
                        statements.push(Statement::Request(decl));
                    }
                }
                TokenKind::Scenario => {
                    if let Some(decl) = self.parse_scenario_decl() {
                        statements.push(Statement::Scenario(decl));
                    }
                }
                _ => {
                    self.error_here(format!("unexpected token {}", self.current.kind.name()));
                    self.synchronize();
                }
            }

            self.advance();
        }

        Program { statements }
    }

    fn parse_variable_decl(&mut self) -> Option<VariableDecl> {
        let pos = self.current.pos;

        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.current.literal.clone();

        if !self.expect_peek(TokenKind::Assign) {
            return None;
        }
        self.advance();

        let value = self.parse_expr()?;
        Some(VariableDecl { name, value, pos })
    }

    fn parse_request_decl(&mut self) -> Option<RequestDecl> {
        let pos = self.current.pos;

        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.current.literal.clone();

        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        self.advance();
        self.skip_trivia();

        let mut decl = RequestDecl {
            name,
            curl: None,
            assertions: Vec::new(),
            extractions: Vec::new(),
            retry: None,
            pos,
        };

        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            match self.current.kind {
                TokenKind::Curl => decl.curl = Some(self.parse_curl_command()),
                TokenKind::Assert => {
                    let mut assertions = self.parse_assert_block();
                    decl.assertions.append(&mut assertions);
                }
                TokenKind::Extract => {
                    let mut extractions = self.parse_extract_block();
                    decl.extractions.append(&mut extractions);
                }
                TokenKind::Retry => decl.retry = self.parse_retry_block(),
                TokenKind::Newline | TokenKind::Comment => self.advance(),
                _ => {
                    self.error_here(format!(
                        "unexpected token in request block: {}",
                        self.current.kind.name()
                    ));
                    self.advance();
                }
            }
            self.skip_trivia();
        }

        Some(decl)
    }

    /// Consume curl-mode tokens up to (not past) the token that ends the
    /// command. Mixed literal and variable URL segments join with no
    /// separator.
    fn parse_curl_command(&mut self) -> CurlCommand {
        let pos = self.current.pos;
        self.advance(); // `curl`

        let mut cmd = CurlCommand {
            url: String::new(),
            url_parts: Vec::new(),
            method: None,
            headers: Vec::new(),
            body: None,
            cookies: Vec::new(),
            args: Vec::new(),
            pos,
        };

        let mut flag_args: Vec<String> = Vec::new();

        while !matches!(
            self.current.kind,
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Assert
                | TokenKind::Extract
                | TokenKind::Retry
        ) {
            match self.current.kind {
                TokenKind::Str => {
                    let arg = self.current.literal.clone();
                    if let Some(rest) = arg.strip_prefix('-') {
                        flag_args.push(arg.clone());
                        self.parse_curl_flag(&arg, rest, &mut cmd, &mut flag_args);
                    } else {
                        cmd.url.push_str(&arg);
                        cmd.url_parts.push(UrlPart::Literal(arg));
                    }
                }
                TokenKind::VarRef => {
                    let name = self.current.literal.clone();
                    cmd.url.push_str(&format!("${{{name}}}"));
                    cmd.url_parts.push(UrlPart::Var(name));
                }
                _ => {
                    // Punctuation can only appear here if the lexer was not
                    // in curl mode; treat the literal as a URL fragment.
                    let text = self.current.literal.clone();
                    cmd.url.push_str(&text);
                    cmd.url_parts.push(UrlPart::Literal(text));
                }
            }
            self.advance();
        }

        cmd.args = flag_args;
        if !cmd.url.is_empty() {
            cmd.args.push(cmd.url.clone());
        }

        cmd
    }

    /// Parse-level interpretation of the flags the grammar cares about.
    /// Everything is also forwarded to the translator through `flag_args`.
    fn parse_curl_flag(
        &mut self,
        arg: &str,
        rest: &str,
        cmd: &mut CurlCommand,
        flag_args: &mut Vec<String>,
    ) {
        let mut take_value = |parser: &mut Self, flag_args: &mut Vec<String>| -> Option<String> {
            if matches!(parser.peek.kind, TokenKind::Str | TokenKind::Number) {
                parser.advance();
                let value = parser.current.literal.clone();
                flag_args.push(value.clone());
                Some(value)
            } else {
                None
            }
        };

        match arg {
            "-H" | "--header" => {
                if let Some(value) = take_value(self, flag_args) {
                    push_header(&mut cmd.headers, &value);
                }
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--data-urlencode" => {
                if let Some(value) = take_value(self, flag_args) {
                    cmd.body = Some(value);
                }
            }
            "-X" | "--request" => {
                if let Some(value) = take_value(self, flag_args) {
                    cmd.method = Some(value.to_uppercase());
                }
            }
            "-b" | "--cookie" => {
                if let Some(value) = take_value(self, flag_args) {
                    push_cookies(&mut cmd.cookies, &value);
                }
            }
            // Value-carrying flags the translator interprets.
            "-u" | "--user" | "-A" | "--user-agent" | "-e" | "--referer" | "-x" | "--proxy"
            | "-m" | "--max-time" | "--connect-timeout" | "--max-redirs" => {
                take_value(self, flag_args);
            }
            // Boolean flags.
            "-k" | "--insecure" | "-L" | "--location" | "-G" | "--get" | "-I" | "--head"
            | "--compressed" => {}
            _ => {
                // Attached forms: -HX-Foo:bar, -XPUT, -d{"a":1}, -bk=v.
                if let Some(value) = rest.strip_prefix('H') {
                    push_header(&mut cmd.headers, value);
                } else if let Some(value) = rest.strip_prefix('X') {
                    cmd.method = Some(value.to_uppercase());
                } else if let Some(value) = rest.strip_prefix('d') {
                    cmd.body = Some(value.to_string());
                } else if let Some(value) = rest.strip_prefix('b') {
                    push_cookies(&mut cmd.cookies, value);
                } else if !self.peek.literal.starts_with('-')
                    && matches!(self.peek.kind, TokenKind::Str | TokenKind::Number)
                {
                    // Unknown flag: skip its argument unless that argument
                    // looks like another flag.
                    take_value(self, flag_args);
                }
            }
        }
    }

    /// `assert <triple>` or `assert { <triple per line> }`.
    fn parse_assert_block(&mut self) -> Vec<AssertionNode> {
        let pos = self.current.pos;
        self.advance(); // `assert`

        let mut assertions = Vec::new();

        if !self.current_is(TokenKind::LBrace) {
            if let Some(assertion) = self.parse_assertion(pos) {
                assertions.push(assertion);
            }
            self.advance(); // past the final value token
            return assertions;
        }

        self.advance(); // `{`
        self.skip_newlines();

        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            let pos = self.current.pos;
            if let Some(assertion) = self.parse_assertion(pos) {
                assertions.push(assertion);
            }
            self.advance();
            self.skip_newlines();
        }

        if self.current_is(TokenKind::RBrace) {
            self.advance();
        }

        assertions
    }

    /// One `field op value` triple. Leaves `current` on the value token
    /// (or the closing `]` of an `in` list).
    fn parse_assertion(&mut self, pos: Position) -> Option<AssertionNode> {
        let mut field = self.current.literal.clone();

        while self.peek_is(TokenKind::Dot) {
            self.advance(); // field segment
            self.advance(); // `.`
            field.push('.');
            field.push_str(&self.current.literal);
        }

        self.advance();

        if self.current_is(TokenKind::In) {
            self.advance();
            if !self.current_is(TokenKind::LBracket) {
                self.error_here("expected '[' after 'in'");
                return None;
            }
            self.advance();

            let mut values = Vec::new();
            while !self.current_is(TokenKind::RBracket) && !self.current_is(TokenKind::Eof) {
                if let Some(expr) = self.parse_expr() {
                    values.push(expr);
                }
                self.advance();
                if self.current_is(TokenKind::Comma) {
                    self.advance();
                }
            }

            return Some(AssertionNode {
                field,
                operator: "in".to_string(),
                value: None,
                values,
                pos,
            });
        }

        let operator = self.current.literal.clone();
        self.advance();
        let value = self.parse_expr();

        Some(AssertionNode {
            field,
            operator,
            value,
            values: Vec::new(),
            pos,
        })
    }

    /// `extract { name = path }` where path is `$.a.b`, `$.items[0].id`,
    /// `regex:<pattern>`, `header:<name>`, or `cookie:<name>`.
    fn parse_extract_block(&mut self) -> Vec<ExtractionNode> {
        self.advance(); // `extract`

        if !self.current_is(TokenKind::LBrace) {
            self.error_here("expected '{' after 'extract'");
            return Vec::new();
        }
        self.advance();
        self.skip_newlines();

        let mut extractions = Vec::new();

        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            if self.current_is(TokenKind::Ident) {
                let pos = self.current.pos;
                let variable = self.current.literal.clone();

                if !self.expect_peek(TokenKind::Assign) {
                    return extractions;
                }
                self.advance();

                if let Some((kind, path)) = self.parse_extract_path() {
                    extractions.push(ExtractionNode {
                        variable,
                        kind,
                        path,
                        pos,
                    });
                }
            }

            self.advance();
            self.skip_newlines();
        }

        if self.current_is(TokenKind::RBrace) {
            self.advance();
        }

        extractions
    }

    /// Leaves `current` on the last token of the path.
    fn parse_extract_path(&mut self) -> Option<(ExtractKind, String)> {
        if self.current_is(TokenKind::Dollar) {
            // $.a.b with optional [n] indexing.
            let mut path = String::new();
            while self.peek_is(TokenKind::Dot) || self.peek_is(TokenKind::LBracket) {
                if self.peek_is(TokenKind::Dot) {
                    self.advance(); // `.`
                    self.advance(); // segment
                    path.push('.');
                    path.push_str(&self.current.literal);
                } else {
                    self.advance(); // `[`
                    self.advance(); // index
                    path.push('[');
                    path.push_str(&self.current.literal);
                    if self.peek_is(TokenKind::RBracket) {
                        self.advance();
                    }
                    path.push(']');
                }
            }
            let trimmed = path.strip_prefix('.').unwrap_or(&path).to_string();
            return Some((ExtractKind::JsonPath, trimmed));
        }

        // Prefixed form: regex:..., header:..., cookie:...; a bare
        // identifier is shorthand for a top-level JSON key.
        let head = self.current.literal.clone();
        if self.peek_is(TokenKind::Colon) {
            self.advance(); // `:`
            self.advance(); // the value after the colon
            let value = self.current.literal.clone();
            let kind = match head.as_str() {
                "regex" => ExtractKind::Regex,
                "header" => ExtractKind::Header,
                "cookie" => ExtractKind::Cookie,
                _ => {
                    self.error_here(format!("unknown extraction prefix `{head}`"));
                    return None;
                }
            };
            return Some((kind, value));
        }

        Some((ExtractKind::JsonPath, head))
    }

    /// `retry { max_attempts = N; backoff = name; base_delay = dur }`.
    /// The field names are plain identifiers, matched by text.
    fn parse_retry_block(&mut self) -> Option<RetryNode> {
        let pos = self.current.pos;
        self.advance(); // `retry`

        if !self.current_is(TokenKind::LBrace) {
            self.error_here("expected '{' after 'retry'");
            return None;
        }
        self.advance();
        self.skip_newlines();

        let mut node = RetryNode {
            max_attempts: None,
            backoff: None,
            base_delay: None,
            pos,
        };

        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            if self.current_is(TokenKind::Ident) {
                let key = self.current.literal.clone();
                if !self.expect_peek(TokenKind::Assign) {
                    return Some(node);
                }
                self.advance();

                match key.as_str() {
                    "max_attempts" => {
                        if self.current_is(TokenKind::Number) {
                            node.max_attempts = self.current.literal.parse().ok();
                        }
                    }
                    "backoff" => {
                        if self.current_is(TokenKind::Ident) {
                            node.backoff = Some(self.current.literal.clone());
                        }
                    }
                    "base_delay" => {
                        if self.current_is(TokenKind::Duration)
                            || self.current_is(TokenKind::Number)
                        {
                            node.base_delay = Some(self.current.literal.clone());
                        }
                    }
                    other => {
                        self.error_here(format!("unknown retry field `{other}`"));
                    }
                }
                self.advance();
                self.skip_newlines();
            } else {
                self.advance();
            }
        }

        if self.current_is(TokenKind::RBrace) {
            self.advance();
        }

        Some(node)
    }

    fn parse_scenario_decl(&mut self) -> Option<ScenarioDecl> {
        let pos = self.current.pos;

        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.current.literal.clone();

        if !self.expect_peek(TokenKind::LBrace) {
            return None;
        }
        self.advance();
        self.skip_trivia();

        let mut decl = ScenarioDecl {
            name,
            load: None,
            setup: Vec::new(),
            flow: Vec::new(),
            teardown: Vec::new(),
            pos,
        };

        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            match self.current.kind {
                TokenKind::Load => decl.load = Some(self.parse_load_config()),
                TokenKind::Run => match self.parse_flow_statement() {
                    Some(flow) => decl.flow.push(flow),
                    None => self.synchronize(),
                },
                TokenKind::If => match self.parse_conditional_flow() {
                    Some(flow) => decl.flow.push(flow),
                    None => self.synchronize(),
                },
                TokenKind::Think => match self.parse_think_statement() {
                    Some(flow) => decl.flow.push(flow),
                    None => self.synchronize(),
                },
                TokenKind::Ident if self.current.literal == "setup" => {
                    decl.setup = self.parse_run_list();
                }
                TokenKind::Ident if self.current.literal == "teardown" => {
                    decl.teardown = self.parse_run_list();
                }
                TokenKind::Newline | TokenKind::Comment => self.advance(),
                _ => {
                    self.error_here(format!(
                        "unexpected token in scenario block: {}",
                        self.current.kind.name()
                    ));
                    self.advance();
                }
            }
            self.skip_trivia();
        }

        Some(decl)
    }

    /// `setup { run a }` / `teardown { run b }` — a brace-delimited list of
    /// simple run statements.
    fn parse_run_list(&mut self) -> Vec<String> {
        self.advance(); // `setup` / `teardown`

        if !self.current_is(TokenKind::LBrace) {
            self.error_here("expected '{' after setup/teardown");
            return Vec::new();
        }
        self.advance();
        self.skip_newlines();

        let mut names = Vec::new();
        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            if self.current_is(TokenKind::Run) {
                if self.expect_peek(TokenKind::Ident) {
                    names.push(self.current.literal.clone());
                }
            }
            self.advance();
            self.skip_newlines();
        }

        if self.current_is(TokenKind::RBrace) {
            self.advance();
        }

        names
    }

    fn parse_load_config(&mut self) -> LoadNode {
        let pos = self.current.pos;
        self.advance(); // `load`

        let mut node = LoadNode {
            pos,
            ..LoadNode::default()
        };

        // Shorthands: `load 10 vus for 5m`, `load 100 rps for 1m`,
        // `load 50 iterations with 5 vus`.
        if self.current_is(TokenKind::Number) {
            let number = self.current.literal.clone();

            if self.peek_is(TokenKind::Vus) {
                node.vus = number.parse().ok();
                self.advance(); // number
                self.advance(); // `vus`
                self.parse_for_duration(&mut node);
            } else if self.peek_is(TokenKind::Rps) {
                node.rps = number.parse().ok();
                self.advance();
                self.advance();
                self.parse_for_duration(&mut node);
            } else if self.peek_is(TokenKind::Iterations) {
                node.iterations = number.parse().ok();
                self.advance();
                self.advance();
                if self.current_is(TokenKind::With) {
                    self.advance();
                    if self.current_is(TokenKind::Number) {
                        node.vus = self.current.literal.parse().ok();
                        self.advance();
                        if self.current_is(TokenKind::Vus) {
                            self.advance();
                        }
                    }
                }
            } else {
                self.error_here("expected `vus`, `rps`, or `iterations` after load count");
            }

            return node;
        }

        // Block form: `load { vus = 10, duration = 5m }`.
        if self.current_is(TokenKind::LBrace) {
            self.advance();
            self.skip_newlines();

            while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
                if matches!(
                    self.current.kind,
                    TokenKind::Ident | TokenKind::Vus | TokenKind::Rps | TokenKind::Iterations
                ) {
                    let key = self.current.literal.clone();
                    if !self.expect_peek(TokenKind::Assign) {
                        return node;
                    }
                    self.advance();

                    match key.as_str() {
                        "vus" => node.vus = self.current.literal.parse().ok(),
                        "rps" => node.rps = self.current.literal.parse().ok(),
                        "iterations" => node.iterations = self.current.literal.parse().ok(),
                        "duration" => node.duration = Some(self.current.literal.clone()),
                        other => self.error_here(format!("unknown load field `{other}`")),
                    }
                }
                self.advance();
                if self.current_is(TokenKind::Comma) {
                    self.advance();
                }
                self.skip_newlines();
            }

            if self.current_is(TokenKind::RBrace) {
                self.advance();
            }
        } else {
            self.error_here("expected load shorthand or '{' after `load`");
        }

        node
    }

    fn parse_for_duration(&mut self, node: &mut LoadNode) {
        if self.current_is(TokenKind::For) {
            self.advance();
            if self.current_is(TokenKind::Duration) || self.current_is(TokenKind::Number) {
                node.duration = Some(self.current.literal.clone());
                self.advance();
            } else {
                self.error_here("expected duration after `for`");
            }
        }
    }

    /// Flow statement starting at `run`. Consumes the last token it
    /// recognises.
    fn parse_flow_statement(&mut self) -> Option<FlowStatement> {
        let pos = self.current.pos;
        self.advance(); // `run`

        if !self.current_is(TokenKind::Ident) {
            self.error_here("expected identifier after 'run'");
            return None;
        }
        let first = self.current.literal.clone();

        // `run a -> b -> c`
        if self.peek_is(TokenKind::Arrow) {
            let mut steps = vec![first];
            while self.peek_is(TokenKind::Arrow) {
                self.advance(); // current step
                self.advance(); // `->`
                if !self.current_is(TokenKind::Ident) {
                    self.error_here("expected identifier after '->'");
                    break;
                }
                steps.push(self.current.literal.clone());
            }
            self.advance();
            return Some(FlowStatement::Sequence { steps, pos });
        }

        // `run a | b | c`
        if self.peek_is(TokenKind::Pipe) {
            let mut steps = vec![first];
            while self.peek_is(TokenKind::Pipe) {
                self.advance(); // current step
                self.advance(); // `|`
                if !self.current_is(TokenKind::Ident) {
                    self.error_here("expected identifier after '|'");
                    break;
                }
                steps.push(self.current.literal.clone());
            }
            self.advance();
            return Some(FlowStatement::Parallel { steps, pos });
        }

        // `run parent { ... }`
        if self.peek_is(TokenKind::LBrace) {
            self.advance(); // identifier
            self.advance(); // `{`
            self.skip_newlines();

            let children = self.parse_branch_body();
            if self.current_is(TokenKind::RBrace) {
                self.advance();
            }

            return Some(FlowStatement::Nested {
                parent: first,
                children,
                pos,
            });
        }

        self.advance();
        Some(FlowStatement::Run { name: first, pos })
    }

    fn parse_think_statement(&mut self) -> Option<FlowStatement> {
        let pos = self.current.pos;
        self.advance(); // `think`

        if !self.current_is(TokenKind::Duration) && !self.current_is(TokenKind::Number) {
            self.error_here("expected duration after 'think'");
            return None;
        }
        let duration = self.current.literal.clone();
        self.advance();
        Some(FlowStatement::Think { duration, pos })
    }

    /// `if cond { ... }` with an optional `else { ... }` directly after the
    /// then-branch's closing brace. The opening brace may sit on the same
    /// or the next line as the condition.
    fn parse_conditional_flow(&mut self) -> Option<FlowStatement> {
        let pos = self.current.pos;
        self.advance(); // `if`

        let condition = self.parse_condition()?;
        self.advance(); // past the right-hand value
        self.skip_newlines();

        if !self.current_is(TokenKind::LBrace) {
            self.error_here("expected '{' after condition");
            return None;
        }
        self.advance();
        self.skip_newlines();

        let then_block = self.parse_branch_body();

        // `current` is the then-branch's closing brace.
        let mut else_block = Vec::new();
        if self.peek_is(TokenKind::Else) {
            self.advance(); // `}`
            self.advance(); // `else`

            if !self.current_is(TokenKind::LBrace) {
                self.error_here("expected '{' after 'else'");
                return Some(FlowStatement::Conditional {
                    condition,
                    then_block,
                    else_block,
                    pos,
                });
            }
            self.advance();
            self.skip_newlines();

            else_block = self.parse_branch_body();
            if self.current_is(TokenKind::RBrace) {
                self.advance();
            }
        } else if self.current_is(TokenKind::RBrace) {
            self.advance();
        }

        Some(FlowStatement::Conditional {
            condition,
            then_block,
            else_block,
            pos,
        })
    }

    /// Flow statements until the closing brace, which is left as `current`.
    /// A statement that fails to parse synchronizes so the loop always
    /// makes progress.
    fn parse_branch_body(&mut self) -> Vec<FlowStatement> {
        let mut block = Vec::new();
        while !self.current_is(TokenKind::RBrace) && !self.current_is(TokenKind::Eof) {
            let parsed = match self.current.kind {
                TokenKind::Run => Some(self.parse_flow_statement()),
                TokenKind::If => Some(self.parse_conditional_flow()),
                TokenKind::Think => Some(self.parse_think_statement()),
                TokenKind::Newline | TokenKind::Comment => {
                    self.advance();
                    continue;
                }
                _ => None,
            };

            match parsed {
                Some(Some(stmt)) => block.push(stmt),
                Some(None) => self.synchronize(),
                None => self.advance(),
            }
            self.skip_newlines();
        }
        block
    }

    /// `left op right`. Leaves `current` on the right-hand value.
    fn parse_condition(&mut self) -> Option<ConditionNode> {
        let pos = self.current.pos;
        let left = self.parse_expr()?;
        self.advance();

        let operator = self.current.literal.clone();
        if !matches!(
            self.current.kind,
            TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Lte
                | TokenKind::Gt
                | TokenKind::Gte
        ) {
            self.error_here(format!("expected comparison operator, got `{operator}`"));
            return None;
        }
        self.advance();

        let right = self.parse_expr()?;
        Some(ConditionNode {
            left,
            operator,
            right,
            pos,
        })
    }

    fn parse_expr(&mut self) -> Option<Expr> {
        match self.current.kind {
            TokenKind::Str => Some(Expr::Str(self.current.literal.clone())),
            TokenKind::Number => self.current.literal.parse().ok().map(Expr::Number),
            TokenKind::Duration => Some(Expr::Duration(self.current.literal.clone())),
            TokenKind::VarRef => Some(Expr::VarRef(self.current.literal.clone())),
            TokenKind::Ident => Some(Expr::Ident(self.current.literal.clone())),
            TokenKind::True => Some(Expr::Bool(true)),
            TokenKind::False => Some(Expr::Bool(false)),
            _ => {
                self.error_here(format!(
                    "unexpected expression token: {}",
                    self.current.kind.name()
                ));
                None
            }
        }
    }
}

fn push_header(headers: &mut Vec<(String, String)>, raw: &str) {
    if let Some((key, value)) = raw.split_once(':') {
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }
}

fn push_cookies(cookies: &mut Vec<(String, String)>, raw: &str) {
    for pair in raw.split(';') {
        if let Some((key, value)) = pair.trim().split_once('=') {
            cookies.push((key.to_string(), value.to_string()));
        }
    }
}
