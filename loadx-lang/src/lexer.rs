//! Two-mode lexer over UTF-8 source.
//!
//! Default mode tokenises the scenario grammar. Curl mode starts right
//! after the `curl` keyword and ends at a newline that is not preceded by a
//! backslash, or when `assert`, `extract`, or `retry` appears at the start
//! of a lexeme. Inside curl mode, whitespace-separated lexemes come out as
//! generic string tokens, except that `${...}` still yields variable
//! references and quoted runs still yield string tokens.

use crate::token::{Position, Token, TokenKind, lookup_ident};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    /// Byte offset of `ch`.
    position: usize,
    /// Byte offset one past `ch`.
    read_position: usize,
    /// Current byte, 0 at end of input.
    ch: u8,
    line: u32,
    column: u32,
    in_curl: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        let mut lexer = Self {
            src,
            bytes: src.as_bytes(),
            position: 0,
            read_position: 0,
            ch: 0,
            line: 1,
            column: 0,
            in_curl: false,
        };
        lexer.read_char();
        lexer
    }

    fn read_char(&mut self) {
        self.ch = self.bytes.get(self.read_position).copied().unwrap_or(0);
        self.position = self.read_position;
        self.read_position += 1;
        self.column += 1;
    }

    fn peek_char(&self) -> u8 {
        self.bytes.get(self.read_position).copied().unwrap_or(0)
    }

    fn pos(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn newline(&mut self) -> Token {
        let pos = self.pos();
        self.line += 1;
        self.column = 0;
        self.read_char();
        Token::new(TokenKind::Newline, "\\n", pos)
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        if self.in_curl {
            return self.read_curl_arg();
        }

        let pos = self.pos();

        match self.ch {
            b'#' => {
                let literal = self.read_comment();
                Token::new(TokenKind::Comment, literal, pos)
            }
            b'\n' => self.newline(),
            b'=' => {
                if self.peek_char() == b'=' {
                    self.read_char();
                    self.read_char();
                    Token::new(TokenKind::Eq, "==", pos)
                } else {
                    self.read_char();
                    Token::new(TokenKind::Assign, "=", pos)
                }
            }
            b'!' => {
                if self.peek_char() == b'=' {
                    self.read_char();
                    self.read_char();
                    Token::new(TokenKind::NotEq, "!=", pos)
                } else {
                    let tok = Token::new(TokenKind::Illegal, "!", pos);
                    self.read_char();
                    tok
                }
            }
            b'<' => {
                if self.peek_char() == b'=' {
                    self.read_char();
                    self.read_char();
                    Token::new(TokenKind::Lte, "<=", pos)
                } else {
                    self.read_char();
                    Token::new(TokenKind::Lt, "<", pos)
                }
            }
            b'>' => {
                if self.peek_char() == b'=' {
                    self.read_char();
                    self.read_char();
                    Token::new(TokenKind::Gte, ">=", pos)
                } else {
                    self.read_char();
                    Token::new(TokenKind::Gt, ">", pos)
                }
            }
            b'-' => {
                if self.peek_char() == b'>' {
                    self.read_char();
                    self.read_char();
                    Token::new(TokenKind::Arrow, "->", pos)
                } else {
                    let tok = Token::new(TokenKind::Illegal, "-", pos);
                    self.read_char();
                    tok
                }
            }
            b'$' => {
                if self.peek_char() == b'{' {
                    self.read_variable_ref()
                } else {
                    self.read_char();
                    Token::new(TokenKind::Dollar, "$", pos)
                }
            }
            b'{' => self.single(TokenKind::LBrace, pos),
            b'}' => self.single(TokenKind::RBrace, pos),
            b'(' => self.single(TokenKind::LParen, pos),
            b')' => self.single(TokenKind::RParen, pos),
            b'[' => self.single(TokenKind::LBracket, pos),
            b']' => self.single(TokenKind::RBracket, pos),
            b'.' => self.single(TokenKind::Dot, pos),
            b',' => self.single(TokenKind::Comma, pos),
            b':' => self.single(TokenKind::Colon, pos),
            b'\\' => self.single(TokenKind::Backslash, pos),
            b'|' => self.single(TokenKind::Pipe, pos),
            b'"' | b'\'' => {
                let literal = self.read_string(self.ch);
                Token::new(TokenKind::Str, literal, pos)
            }
            0 => Token::new(TokenKind::Eof, "", pos),
            ch if is_letter(ch) => {
                let literal = self.read_identifier();
                let kind = lookup_ident(&literal);
                if kind == TokenKind::Curl {
                    self.in_curl = true;
                }
                Token::new(kind, literal, pos)
            }
            ch if ch.is_ascii_digit() => {
                let number = self.read_number();
                if is_letter(self.ch) {
                    let unit = self.read_identifier();
                    Token::new(TokenKind::Duration, format!("{number}{unit}"), pos)
                } else {
                    Token::new(TokenKind::Number, number, pos)
                }
            }
            ch => {
                let tok = Token::new(TokenKind::Illegal, (ch as char).to_string(), pos);
                self.read_char();
                tok
            }
        }
    }

    fn single(&mut self, kind: TokenKind, pos: Position) -> Token {
        let literal = (self.ch as char).to_string();
        self.read_char();
        Token::new(kind, literal, pos)
    }

    /// One lexeme in curl mode.
    fn read_curl_arg(&mut self) -> Token {
        loop {
            self.skip_whitespace();

            // A bare newline ends the command and the mode.
            if self.ch == b'\n' {
                self.in_curl = false;
                return self.newline();
            }

            if self.ch == 0 {
                self.in_curl = false;
                return Token::new(TokenKind::Eof, "", self.pos());
            }

            // Backslash-newline is a soft continuation.
            if self.ch == b'\\' && self.peek_char() == b'\n' {
                self.read_char();
                self.read_char();
                self.line += 1;
                self.column = 0;
                continue;
            }

            break;
        }

        let pos = self.pos();

        // `assert`, `extract`, `retry` at lexeme start leave curl mode.
        if is_letter(self.ch) {
            let saved = (self.position, self.read_position, self.ch, self.column);
            let ident = self.read_identifier();
            let kind = lookup_ident(&ident);
            if matches!(
                kind,
                TokenKind::Assert | TokenKind::Extract | TokenKind::Retry
            ) {
                self.in_curl = false;
                return Token::new(kind, ident, pos);
            }
            (self.position, self.read_position, self.ch, self.column) = saved;
        }

        if self.ch == b'$' && self.peek_char() == b'{' {
            return self.read_variable_ref();
        }

        if self.ch == b'"' || self.ch == b'\'' {
            let literal = self.read_string(self.ch);
            return Token::new(TokenKind::Str, literal, pos);
        }

        let literal = self.read_curl_word();
        Token::new(TokenKind::Str, literal, pos)
    }

    /// A raw curl lexeme: runs to whitespace, newline, backslash, or the
    /// start of a `${...}` reference.
    fn read_curl_word(&mut self) -> String {
        let start = self.position;
        while self.ch != 0
            && self.ch != b'\n'
            && self.ch != b'\\'
            && !self.ch.is_ascii_whitespace()
        {
            if self.ch == b'$' && self.peek_char() == b'{' {
                break;
            }
            self.read_char();
        }
        self.src[start..self.position].to_string()
    }

    fn read_comment(&mut self) -> String {
        let start = self.position + 1;
        while self.ch != b'\n' && self.ch != 0 {
            self.read_char();
        }
        self.src[start..self.position].trim().to_string()
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while is_letter(self.ch) || self.ch.is_ascii_digit() {
            self.read_char();
        }
        self.src[start..self.position].to_string()
    }

    fn read_number(&mut self) -> String {
        let start = self.position;
        while self.ch.is_ascii_digit() {
            self.read_char();
        }
        self.src[start..self.position].to_string()
    }

    fn read_string(&mut self, quote: u8) -> String {
        let mut out = String::new();
        self.read_char(); // opening quote

        while self.ch != quote && self.ch != 0 {
            if self.ch == b'\\' {
                self.read_char();
                match self.ch {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'r' => out.push('\r'),
                    b'\\' => out.push('\\'),
                    ch if ch == quote => out.push(quote as char),
                    // Unknown escapes pass through intact so regex
                    // patterns like (\w+) survive quoting.
                    ch => {
                        out.push('\\');
                        out.push(ch as char);
                    }
                }
            } else {
                if self.ch == b'\n' {
                    self.line += 1;
                    self.column = 0;
                }
                // Copy the full UTF-8 sequence, not just the lead byte.
                let rest = &self.src[self.position..];
                let c = rest.chars().next().unwrap_or('\u{FFFD}');
                out.push(c);
                for _ in 1..c.len_utf8() {
                    self.read_char();
                }
            }
            self.read_char();
        }

        self.read_char(); // closing quote
        out
    }

    fn read_variable_ref(&mut self) -> Token {
        let pos = self.pos();
        self.read_char(); // '$'
        self.read_char(); // '{'

        let start = self.position;
        while self.ch != b'}' && self.ch != 0 {
            self.read_char();
        }
        let name = self.src[start..self.position].to_string();
        self.read_char(); // '}'

        Token::new(TokenKind::VarRef, name, pos)
    }

    fn skip_whitespace(&mut self) {
        while self.ch == b' ' || self.ch == b'\t' || self.ch == b'\r' {
            self.read_char();
        }
    }
}

fn is_letter(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            let done = tok.kind == TokenKind::Eof;
            out.push((tok.kind, tok.literal));
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn basic_tokens() {
        let input = "var base_url = \"https://example.com\"\n\nrequest test_request {\n\tcurl https://example.com/api\n\n\tassert status == 200\n}\n\nscenario load_test {\n\tload 10 vus for 5m\n\trun test_request\n}";

        let expected: Vec<(TokenKind, &str)> = vec![
            (TokenKind::Var, "var"),
            (TokenKind::Ident, "base_url"),
            (TokenKind::Assign, "="),
            (TokenKind::Str, "https://example.com"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Request, "request"),
            (TokenKind::Ident, "test_request"),
            (TokenKind::LBrace, "{"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Curl, "curl"),
            (TokenKind::Str, "https://example.com/api"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Assert, "assert"),
            (TokenKind::Status, "status"),
            (TokenKind::Eq, "=="),
            (TokenKind::Number, "200"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::RBrace, "}"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Scenario, "scenario"),
            (TokenKind::Ident, "load_test"),
            (TokenKind::LBrace, "{"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Load, "load"),
            (TokenKind::Number, "10"),
            (TokenKind::Vus, "vus"),
            (TokenKind::For, "for"),
            (TokenKind::Duration, "5m"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::Run, "run"),
            (TokenKind::Ident, "test_request"),
            (TokenKind::Newline, "\\n"),
            (TokenKind::RBrace, "}"),
            (TokenKind::Eof, ""),
        ];

        let got = kinds(input);
        assert_eq!(got.len(), expected.len(), "token count: {got:?}");
        for (i, ((kind, literal), (want_kind, want_literal))) in
            got.iter().zip(expected.iter()).enumerate()
        {
            assert_eq!(kind, want_kind, "token {i} kind (literal {literal:?})");
            assert_eq!(literal, want_literal, "token {i} literal");
        }
    }

    #[test]
    fn curl_mode_with_continuations() {
        let input = "request login {\n\tcurl 'https://api.example.com/login' \\\n\t\t-H 'Content-Type: application/json' \\\n\t\t-d '{\"user\":\"admin\"}'\n\n\tassert status == 200\n}";

        let got: Vec<TokenKind> = kinds(input).into_iter().map(|(k, _)| k).collect();
        let expected = vec![
            TokenKind::Request,
            TokenKind::Ident,
            TokenKind::LBrace,
            TokenKind::Newline,
            TokenKind::Curl,
            TokenKind::Str,
            TokenKind::Str,
            TokenKind::Str,
            TokenKind::Str,
            TokenKind::Str,
            TokenKind::Newline,
            TokenKind::Newline,
            TokenKind::Assert,
            TokenKind::Status,
            TokenKind::Eq,
            TokenKind::Number,
            TokenKind::Newline,
            TokenKind::RBrace,
            TokenKind::Eof,
        ];
        assert_eq!(got, expected);
    }

    #[test]
    fn curl_mode_variable_reference() {
        let got = kinds("request test {\n\tcurl ${base_url}/api/users\n}");
        let interesting: Vec<_> = got
            .iter()
            .filter(|(k, _)| matches!(k, TokenKind::VarRef | TokenKind::Str))
            .collect();
        assert_eq!(
            interesting,
            vec![
                &(TokenKind::VarRef, "base_url".to_string()),
                &(TokenKind::Str, "/api/users".to_string()),
            ]
        );
    }

    #[test]
    fn curl_mode_ends_on_assert_keyword() {
        let got = kinds("curl http://x/a assert status == 200");
        let kinds_only: Vec<_> = got.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds_only,
            vec![
                TokenKind::Curl,
                TokenKind::Str,
                TokenKind::Assert,
                TokenKind::Status,
                TokenKind::Eq,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn duration_literals_keep_their_unit() {
        let got = kinds("load 5 vus for 30s\nthink 100ms");
        let durations: Vec<_> = got
            .iter()
            .filter(|(k, _)| *k == TokenKind::Duration)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(durations, vec!["30s", "100ms"]);
    }

    #[test]
    fn retry_field_names_are_identifiers() {
        let got = kinds("retry {\nmax_attempts = 3\nbackoff = exponential\nbase_delay = 1s\n}");
        let idents: Vec<_> = got
            .iter()
            .filter(|(k, _)| *k == TokenKind::Ident)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(
            idents,
            vec!["max_attempts", "backoff", "exponential", "base_delay"]
        );
    }

    #[test]
    fn string_escapes() {
        let got = kinds(r#"var x = "line\nnext\ttab\\ and \"quote\"""#);
        let strings: Vec<_> = got
            .iter()
            .filter(|(k, _)| *k == TokenKind::Str)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(strings, vec!["line\nnext\ttab\\ and \"quote\""]);
    }

    #[test]
    fn operators_and_punctuation() {
        let got = kinds("== != < <= > >= -> . , : | [ ] ( )");
        let kinds_only: Vec<_> = got.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds_only,
            vec![
                TokenKind::Eq,
                TokenKind::NotEq,
                TokenKind::Lt,
                TokenKind::Lte,
                TokenKind::Gt,
                TokenKind::Gte,
                TokenKind::Arrow,
                TokenKind::Dot,
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Pipe,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_carry_their_text() {
        let got = kinds("# leading comment\nvar x = 1");
        assert_eq!(got[0], (TokenKind::Comment, "leading comment".to_string()));
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let mut lexer = Lexer::new("var x = 1\nvar y = 2");
        let first = lexer.next_token();
        assert_eq!((first.pos.line, first.pos.column), (1, 1));

        let mut tok = lexer.next_token();
        while tok.kind != TokenKind::Newline {
            tok = lexer.next_token();
        }
        let second_var = lexer.next_token();
        assert_eq!(second_var.kind, TokenKind::Var);
        assert_eq!(second_var.pos.line, 2);
    }
}
