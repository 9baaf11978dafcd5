//! Recursive-descent parser for VBA modules.
//!
//! Statements are parsed by keyword dispatch; expressions use precedence
//! climbing with the language's operator binding powers. The parser skips
//! trivia (whitespace, comments, line continuations) but treats newlines and
//! `:` as statement separators.
//!
//! Export headers (`VERSION`, `Begin ... End` designer blocks) and
//! `Attribute` lines are recognized and recorded, not interpreted.

use ducktail_core::facts::Accessibility;
use ducktail_core::text::line_bounds;
use ducktail_core::types::{Token, TokenKind, TokenRange};
use thiserror::Error;

use crate::lexer::{is_intrinsic_type, tokenize, LexError};
use crate::syntax::*;

/// A module that does not parse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SyntaxError {
    /// Byte offset of the offending token.
    pub offset: usize,
    pub message: String,
}

impl From<LexError> for SyntaxError {
    fn from(err: LexError) -> Self {
        SyntaxError {
            offset: err.offset,
            message: err.message,
        }
    }
}

type PResult<T> = Result<T, SyntaxError>;

/// Annotations that describe the module rather than the next member.
const MODULE_ANNOTATIONS: &[&str] = &[
    "testmodule",
    "folder",
    "moduledescription",
    "ignoremodule",
    "predeclaredid",
    "exposed",
    "moduleattribute",
];

/// Keywords that also name library functions (`Date`, `String(3, "x")`).
const KEYWORD_FUNCTIONS: &[&str] = &["date", "string", "error"];

/// Parse one module.
pub fn parse_module(text: &str) -> Result<ModuleTree, SyntaxError> {
    let tokens = tokenize(text)?;
    let annotations = collect_annotations(text, &tokens);
    let mut tree = Parser::new(text, &tokens, annotations).module()?;
    tree.tokens = tokens;
    Ok(tree)
}

/// Find every `'@Name args` comment.
fn collect_annotations(text: &str, tokens: &[Token]) -> Vec<Annotation> {
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Comment)
        .filter_map(|t| {
            let body = &text[t.span.start as usize..t.span.end as usize];
            let rest = body.strip_prefix('\'')?.trim_start();
            let rest = rest.strip_prefix('@')?;
            let name_len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if name_len == 0 {
                return None;
            }
            let (name, args) = rest.split_at(name_len);
            let args = args
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .map(|a| a.trim().trim_matches('"').to_string())
                .filter(|a| !a.is_empty())
                .collect();
            Some(Annotation {
                name: name.to_string(),
                args,
                range: TokenRange::single(t),
            })
        })
        .collect()
}

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    /// Next raw token index.
    pos: usize,
    /// Last consumed significant token.
    last: usize,
    annotations: std::collections::VecDeque<Annotation>,
    module_annotations: Vec<Annotation>,
    single_line_if: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, tokens: &'a [Token], annotations: Vec<Annotation>) -> Self {
        Parser {
            text,
            tokens,
            pos: 0,
            last: 0,
            annotations: annotations.into(),
            module_annotations: Vec::new(),
            single_line_if: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Token access
    // ------------------------------------------------------------------------

    fn peek_index(&self) -> usize {
        let mut i = self.pos;
        while i < self.tokens.len() && self.tokens[i].kind.is_trivia() {
            i += 1;
        }
        i
    }

    /// The `n`-th significant token ahead.
    fn nth(&self, n: usize) -> Option<&'a Token> {
        let mut i = self.peek_index();
        for _ in 0..n {
            i += 1;
            while i < self.tokens.len() && self.tokens[i].kind.is_trivia() {
                i += 1;
            }
        }
        self.tokens.get(i)
    }

    fn peek(&self) -> Option<&'a Token> {
        self.nth(0)
    }

    fn text_of(&self, token: &Token) -> &'a str {
        &self.text[token.span.start as usize..token.span.end as usize]
    }

    fn is_keyword(&self, token: Option<&Token>, keyword: &str) -> bool {
        token
            .map(|t| t.kind == TokenKind::Keyword && self.text_of(t).eq_ignore_ascii_case(keyword))
            .unwrap_or(false)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.is_keyword(self.peek(), keyword)
    }

    fn nth_is_keyword(&self, n: usize, keyword: &str) -> bool {
        self.is_keyword(self.nth(n), keyword)
    }

    fn is_symbol(&self, token: Option<&Token>, kind: TokenKind, symbol: &str) -> bool {
        token
            .map(|t| t.kind == kind && self.text_of(t) == symbol)
            .unwrap_or(false)
    }

    fn at_punct(&self, punct: &str) -> bool {
        self.is_symbol(self.peek(), TokenKind::Punctuation, punct)
    }

    fn at_operator(&self, op: &str) -> bool {
        self.is_symbol(self.peek(), TokenKind::Operator, op)
    }

    fn at_newline(&self) -> bool {
        self.peek()
            .map(|t| t.kind == TokenKind::Newline)
            .unwrap_or(false)
    }

    fn at_eof(&self) -> bool {
        self.peek().is_none()
    }

    fn advance(&mut self) -> PResult<&'a Token> {
        let i = self.peek_index();
        match self.tokens.get(i) {
            Some(token) => {
                self.pos = i + 1;
                self.last = i;
                Ok(token)
            }
            None => Err(SyntaxError {
                offset: self.text.len(),
                message: "unexpected end of module".into(),
            }),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos = self.peek_index() + 1;
            self.last = self.pos - 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.pos = self.peek_index() + 1;
            self.last = self.pos - 1;
            true
        } else {
            false
        }
    }

    fn eat_operator(&mut self, op: &str) -> bool {
        if self.at_operator(op) {
            self.pos = self.peek_index() + 1;
            self.last = self.pos - 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        let offset = self
            .peek()
            .map(|t| t.span.start as usize)
            .unwrap_or(self.text.len());
        Err(SyntaxError {
            offset,
            message: message.into(),
        })
    }

    fn found(&self) -> String {
        match self.peek() {
            None => "end of module".to_string(),
            Some(t) if t.kind == TokenKind::Newline => "end of line".to_string(),
            Some(t) => format!("'{}'", self.text_of(t)),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", keyword, self.found()))
        }
    }

    fn expect_punct(&mut self, punct: &str) -> PResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", punct, self.found()))
        }
    }

    fn expect_operator(&mut self, op: &str) -> PResult<()> {
        if self.eat_operator(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {}", op, self.found()))
        }
    }

    fn range_from(&self, start: usize) -> TokenRange {
        TokenRange::between(&self.tokens[start], &self.tokens[self.last.max(start)])
    }

    fn ident_from(&self, token: &Token) -> Ident {
        Ident {
            name: self.text_of(token).to_string(),
            range: TokenRange::single(token),
        }
    }

    /// An identifier token.
    fn ident(&mut self) -> PResult<Ident> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance()?;
                Ok(self.ident_from(t))
            }
            _ => self.error(format!("expected an identifier, found {}", self.found())),
        }
    }

    /// An identifier or keyword, as allowed after `.`.
    fn member_name(&mut self) -> PResult<Ident> {
        match self.peek() {
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Keyword) => {
                self.advance()?;
                Ok(self.ident_from(t))
            }
            _ => self.error(format!("expected a member name, found {}", self.found())),
        }
    }

    fn at_statement_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) if t.kind == TokenKind::Newline => true,
            Some(t) if t.kind == TokenKind::Punctuation && self.text_of(t) == ":" => true,
            Some(_) => self.single_line_if > 0 && self.at_keyword("else"),
        }
    }

    fn expect_statement_end(&self) -> PResult<()> {
        if self.at_statement_end() {
            Ok(())
        } else {
            self.error(format!("expected end of statement, found {}", self.found()))
        }
    }

    fn skip_separators(&mut self) {
        while self.at_newline() || self.at_punct(":") {
            self.pos = self.peek_index() + 1;
            self.last = self.pos - 1;
        }
    }

    /// Consume everything up to (not including) the next newline.
    fn skip_line(&mut self) {
        while !self.at_eof() && !self.at_newline() {
            self.pos = self.peek_index() + 1;
            self.last = self.pos - 1;
        }
    }

    fn line_end_after(&self, index: usize) -> u64 {
        let offset = self.tokens[index].span.end as usize;
        line_bounds(self.text, offset).end
    }

    fn space_before_next(&self) -> bool {
        let i = self.peek_index();
        i > 0 && self.tokens[i - 1].kind == TokenKind::Whitespace
    }

    fn last_was_line_start(&self) -> bool {
        let i = self.peek_index();
        self.tokens[..i]
            .iter()
            .rev()
            .find(|t| !t.kind.is_trivia())
            .map(|t| t.kind == TokenKind::Newline)
            .unwrap_or(true)
    }

    // ------------------------------------------------------------------------
    // Annotations
    // ------------------------------------------------------------------------

    fn is_module_annotation(annotation: &Annotation) -> bool {
        MODULE_ANNOTATIONS.contains(&annotation.name.to_ascii_lowercase().as_str())
    }

    /// Annotations written before token `before`; module annotations are
    /// routed to the module instead.
    fn take_annotations(&mut self, before: usize) -> Vec<Annotation> {
        let mut taken = Vec::new();
        while let Some(front) = self.annotations.front() {
            if front.range.start_token as usize >= before {
                break;
            }
            if let Some(annotation) = self.annotations.pop_front() {
                if Self::is_module_annotation(&annotation) {
                    self.module_annotations.push(annotation);
                } else {
                    taken.push(annotation);
                }
            }
        }
        taken
    }

    // ------------------------------------------------------------------------
    // Module
    // ------------------------------------------------------------------------

    fn module(mut self) -> PResult<ModuleTree> {
        let (attributes, body_start) = self.header()?;
        let mut tree = ModuleTree {
            tokens: Vec::new(),
            attributes,
            options: Vec::new(),
            implements: Vec::new(),
            annotations: Vec::new(),
            items: Vec::new(),
            body_start,
            options_end: body_start,
            declarations_end: body_start,
        };
        let mut declarations_end = None;

        loop {
            self.skip_separators();
            if self.at_eof() {
                break;
            }
            let start = self.peek_index();
            let annotations = self.take_annotations(start);

            let mut accessibility = None;
            let mut is_static = false;
            loop {
                if self.eat_keyword("public") {
                    accessibility = Some(Accessibility::Public);
                } else if self.eat_keyword("private") {
                    accessibility = Some(Accessibility::Private);
                } else if self.eat_keyword("friend") {
                    accessibility = Some(Accessibility::Friend);
                } else if self.eat_keyword("global") {
                    accessibility = Some(Accessibility::Global);
                } else if self.eat_keyword("static") {
                    is_static = true;
                } else {
                    break;
                }
            }

            if self.at_keyword("option") && accessibility.is_none() {
                tree.options.push(self.option_statement(start)?);
                tree.options_end = self.line_end_after(self.last);
            } else if self.at_keyword("implements") {
                self.advance()?;
                let interface = self.type_ref()?;
                tree.implements.push(ImplementsClause {
                    interface,
                    range: self.range_from(start),
                });
                declarations_end = Some(self.line_end_after(self.last));
            } else if self.at_keyword("attribute") {
                self.skip_line();
            } else if self.at_keyword("sub")
                || self.at_keyword("function")
                || self.at_keyword("property")
            {
                let procedure = self.procedure(
                    start,
                    accessibility.unwrap_or(Accessibility::Implicit),
                    is_static,
                    annotations,
                )?;
                tree.items.push(ModuleItem::Procedure(procedure));
                // Annotations inside the body belong to nothing at module level.
                self.take_annotations(self.last + 1);
            } else {
                let item = self.module_declaration(start, accessibility, annotations)?;
                tree.items.push(item);
                declarations_end = Some(self.line_end_after(self.last));
            }
            self.expect_statement_end()?;
        }

        self.take_annotations(self.tokens.len());
        tree.annotations = std::mem::take(&mut self.module_annotations);
        tree.declarations_end = declarations_end.unwrap_or(tree.options_end).max(tree.options_end);
        Ok(tree)
    }

    /// Skip `VERSION` and `Begin ... End` blocks and record `Attribute` lines.
    fn header(&mut self) -> PResult<(Vec<ModuleAttribute>, u64)> {
        let mut attributes = Vec::new();
        let mut body_start = 0;
        loop {
            self.skip_separators();
            let Some(token) = self.peek() else { break };
            let word = self.text_of(token);
            if token.kind == TokenKind::Identifier && word.eq_ignore_ascii_case("version") {
                self.skip_line();
            } else if self.at_keyword("begin") {
                self.skip_designer_block()?;
            } else if self.at_keyword("attribute") {
                self.advance()?;
                let name = self.member_name()?;
                self.expect_operator("=")?;
                let value_start = self.peek().map(|t| t.span.start as usize);
                self.skip_line();
                let value_end = self.tokens[self.last].span.end as usize;
                let value = value_start
                    .map(|s| self.text[s..value_end.max(s)].trim().to_string())
                    .unwrap_or_default();
                attributes.push(ModuleAttribute {
                    name: name.name,
                    value,
                });
            } else {
                break;
            }
            body_start = self.line_end_after(self.last);
        }
        Ok((attributes, body_start))
    }

    fn skip_designer_block(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            self.skip_separators();
            let Some(token) = self.peek() else {
                return self.error("unterminated 'Begin' block");
            };
            let word = self.text_of(token);
            let opens = (token.kind == TokenKind::Keyword && word.eq_ignore_ascii_case("begin"))
                || word.eq_ignore_ascii_case("beginproperty");
            let closes = word.eq_ignore_ascii_case("endproperty")
                || (self.at_keyword("end")
                    && self
                        .nth(1)
                        .map(|t| t.kind == TokenKind::Newline)
                        .unwrap_or(true));
            self.skip_line();
            if opens {
                depth += 1;
            } else if closes {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(());
                }
            }
        }
    }

    fn option_statement(&mut self, start: usize) -> PResult<OptionStatement> {
        self.expect_keyword("option")?;
        let mut words = Vec::new();
        while !self.at_statement_end() {
            let token = self.advance()?;
            words.push(self.text_of(token).to_string());
        }
        if words.is_empty() {
            return self.error("expected an option after 'Option'");
        }
        Ok(OptionStatement {
            text: words.join(" "),
            range: self.range_from(start),
        })
    }

    fn module_declaration(
        &mut self,
        start: usize,
        accessibility: Option<Accessibility>,
        annotations: Vec<Annotation>,
    ) -> PResult<ModuleItem> {
        let declared = accessibility.unwrap_or(Accessibility::Implicit);
        if self.eat_keyword("dim") || (accessibility.is_some() && self.at_variable_start()) {
            let declarators = self.declarators()?;
            return Ok(ModuleItem::Variables {
                accessibility: accessibility.unwrap_or(Accessibility::Private),
                declarators,
                range: self.range_from(start),
                annotations,
            });
        }
        if self.eat_keyword("const") {
            let constants = self.const_declarators()?;
            return Ok(ModuleItem::Constants {
                accessibility: accessibility.unwrap_or(Accessibility::Private),
                constants,
                range: self.range_from(start),
                annotations,
            });
        }
        if self.eat_keyword("type") {
            let name = self.ident()?;
            let members = self.type_members()?;
            return Ok(ModuleItem::Type {
                accessibility: declared,
                name,
                members,
                range: self.range_from(start),
            });
        }
        if self.eat_keyword("enum") {
            let name = self.ident()?;
            let members = self.enum_members()?;
            return Ok(ModuleItem::Enum {
                accessibility: declared,
                name,
                members,
                range: self.range_from(start),
            });
        }
        if self.eat_keyword("event") {
            let name = self.ident()?;
            let params = if self.at_punct("(") {
                self.parameters()?
            } else {
                Vec::new()
            };
            return Ok(ModuleItem::Event {
                accessibility: declared,
                name,
                params,
                range: self.range_from(start),
            });
        }
        if self.eat_keyword("declare") {
            return self.declare(start, declared).map(ModuleItem::Declare);
        }
        self.error(format!("unexpected {} at module level", self.found()))
    }

    fn at_variable_start(&self) -> bool {
        self.at_keyword("withevents")
            || self
                .peek()
                .map(|t| t.kind == TokenKind::Identifier)
                .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    fn declarators(&mut self) -> PResult<Vec<Declarator>> {
        let mut declarators = Vec::new();
        loop {
            declarators.push(self.declarator()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(declarators)
    }

    fn declarator(&mut self) -> PResult<Declarator> {
        let start = self.peek_index();
        let with_events = self.eat_keyword("withevents");
        let name = self.ident()?;
        let mut is_array = false;
        let mut bounds = Vec::new();
        if self.eat_punct("(") {
            is_array = true;
            bounds = self.bounds()?;
            self.expect_punct(")")?;
        }
        let mut is_new = false;
        let mut as_type = None;
        if self.eat_keyword("as") {
            is_new = self.eat_keyword("new");
            as_type = Some(self.type_ref()?);
        }
        Ok(Declarator {
            name,
            is_array,
            bounds,
            as_type,
            is_new,
            with_events,
            range: self.range_from(start),
        })
    }

    /// Array bounds up to (not including) `)`.
    fn bounds(&mut self) -> PResult<Vec<Expr>> {
        let mut bounds = Vec::new();
        while !self.at_punct(")") {
            bounds.push(self.expr(0)?);
            if self.eat_keyword("to") {
                bounds.push(self.expr(0)?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(bounds)
    }

    fn const_declarators(&mut self) -> PResult<Vec<ConstDeclarator>> {
        let mut constants = Vec::new();
        loop {
            let start = self.peek_index();
            let name = self.ident()?;
            let as_type = if self.eat_keyword("as") {
                Some(self.type_ref()?)
            } else {
                None
            };
            self.expect_operator("=")?;
            let value = self.expr(0)?;
            constants.push(ConstDeclarator {
                name,
                as_type,
                value,
                range: self.range_from(start),
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(constants)
    }

    fn type_ref(&mut self) -> PResult<TypeRef> {
        let start = self.peek_index();
        let Some(token) = self.peek() else {
            return self.error("expected a type name");
        };
        let word = self.text_of(token);
        let mut path = Vec::new();
        let intrinsic;
        if token.kind == TokenKind::Keyword && is_intrinsic_type(word) {
            self.advance()?;
            path.push(self.ident_from(token));
            intrinsic = true;
        } else if token.kind == TokenKind::Identifier {
            path.push(self.ident()?);
            while self.eat_punct(".") {
                path.push(self.member_name()?);
            }
            intrinsic = path.len() == 1 && word.eq_ignore_ascii_case("any");
        } else {
            return self.error(format!("expected a type name, found {}", self.found()));
        }
        let fixed_length = if self.eat_operator("*") {
            Some(Box::new(self.primary(false)?))
        } else {
            None
        };
        Ok(TypeRef {
            path,
            intrinsic,
            fixed_length,
            range: self.range_from(start),
        })
    }

    fn type_members(&mut self) -> PResult<Vec<Declarator>> {
        let mut members = Vec::new();
        loop {
            self.skip_separators();
            if self.at_keyword("end") && self.nth_is_keyword(1, "type") {
                self.advance()?;
                self.advance()?;
                return Ok(members);
            }
            if self.at_eof() {
                return self.error("expected 'End Type'");
            }
            members.push(self.declarator()?);
            self.expect_statement_end()?;
        }
    }

    fn enum_members(&mut self) -> PResult<Vec<EnumMember>> {
        let mut members = Vec::new();
        loop {
            self.skip_separators();
            if self.at_keyword("end") && self.nth_is_keyword(1, "enum") {
                self.advance()?;
                self.advance()?;
                return Ok(members);
            }
            if self.at_eof() {
                return self.error("expected 'End Enum'");
            }
            let start = self.peek_index();
            let name = self.ident()?;
            let value = if self.eat_operator("=") {
                Some(self.expr(0)?)
            } else {
                None
            };
            members.push(EnumMember {
                name,
                value,
                range: self.range_from(start),
            });
            self.expect_statement_end()?;
        }
    }

    fn declare(&mut self, start: usize, accessibility: Accessibility) -> PResult<ExternalProcedure> {
        self.eat_keyword("ptrsafe");
        let is_function = if self.eat_keyword("function") {
            true
        } else {
            self.expect_keyword("sub")?;
            false
        };
        let name = self.ident()?;
        self.expect_keyword("lib")?;
        let library = match self.peek() {
            Some(t) if t.kind == TokenKind::StringLiteral => {
                self.advance()?;
                self.text_of(t).trim_matches('"').to_string()
            }
            _ => return self.error("expected a library name string"),
        };
        if self.eat_keyword("alias") {
            self.advance()?;
        }
        let params = if self.at_punct("(") {
            self.parameters()?
        } else {
            Vec::new()
        };
        let return_type = if self.eat_keyword("as") {
            Some(self.type_ref()?)
        } else {
            None
        };
        Ok(ExternalProcedure {
            accessibility,
            is_function,
            name,
            library,
            params,
            return_type,
            range: self.range_from(start),
        })
    }

    fn parameters(&mut self) -> PResult<Vec<Parameter>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let start = self.peek_index();
            let mut by_val = false;
            let mut optional = false;
            let mut param_array = false;
            loop {
                if self.eat_keyword("optional") {
                    optional = true;
                } else if self.eat_keyword("byval") {
                    by_val = true;
                } else if self.eat_keyword("byref") {
                    by_val = false;
                } else if self.eat_keyword("paramarray") {
                    param_array = true;
                } else {
                    break;
                }
            }
            let name = self.ident()?;
            let mut is_array = false;
            if self.eat_punct("(") {
                self.expect_punct(")")?;
                is_array = true;
            }
            let as_type = if self.eat_keyword("as") {
                Some(self.type_ref()?)
            } else {
                None
            };
            let default = if self.eat_operator("=") {
                Some(self.expr(0)?)
            } else {
                None
            };
            params.push(Parameter {
                name,
                by_val,
                optional,
                param_array,
                is_array,
                as_type,
                default,
                range: self.range_from(start),
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    // ------------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------------

    fn procedure(
        &mut self,
        start: usize,
        accessibility: Accessibility,
        is_static: bool,
        annotations: Vec<Annotation>,
    ) -> PResult<Procedure> {
        let kind = if self.eat_keyword("sub") {
            ProcedureKind::Sub
        } else if self.eat_keyword("function") {
            ProcedureKind::Function
        } else {
            self.expect_keyword("property")?;
            if self.eat_keyword("get") {
                ProcedureKind::PropertyGet
            } else if self.eat_keyword("let") {
                ProcedureKind::PropertyLet
            } else if self.eat_keyword("set") {
                ProcedureKind::PropertySet
            } else {
                return self.error("expected 'Get', 'Let' or 'Set' after 'Property'");
            }
        };
        let name = self.ident()?;
        let params = if self.at_punct("(") {
            self.parameters()?
        } else {
            Vec::new()
        };
        let return_type = if self.eat_keyword("as") {
            let ty = self.type_ref()?;
            if self.eat_punct("(") {
                self.expect_punct(")")?;
            }
            Some(ty)
        } else {
            None
        };
        let signature = self.range_from(start);
        self.expect_statement_end()?;

        let body = self.block(kind.end_keyword(), |p| {
            p.at_keyword("end")
                && (p.nth_is_keyword(1, "sub")
                    || p.nth_is_keyword(1, "function")
                    || p.nth_is_keyword(1, "property"))
        })?;
        self.expect_keyword("end")?;
        self.advance()?;

        Ok(Procedure {
            kind,
            accessibility,
            is_static,
            name,
            params,
            return_type,
            body,
            range: self.range_from(start),
            signature,
            annotations,
        })
    }

    /// Statements until `done` holds at the start of a statement.
    fn block(&mut self, expected: &str, done: impl Fn(&Self) -> bool) -> PResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.at_eof() {
                return self.error(format!("expected '{}' before end of module", expected));
            }
            if done(&*self) {
                return Ok(statements);
            }
            if let Some(statement) = self.statement()? {
                statements.push(statement);
            }
            self.expect_statement_end()?;
        }
    }

    /// Statements of a single-line `If`, up to the newline or `Else`.
    fn inline_statements(&mut self) -> PResult<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.eat_punct(":") {}
            if self.at_eof() || self.at_newline() || self.at_keyword("else") {
                return Ok(statements);
            }
            if let Some(statement) = self.statement()? {
                statements.push(statement);
            }
            self.expect_statement_end()?;
        }
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn statement(&mut self) -> PResult<Option<Statement>> {
        let start = self.peek_index();
        let Some(token) = self.peek() else {
            return self.error("expected a statement");
        };

        if token.kind == TokenKind::Identifier
            && self.is_symbol(self.nth(1), TokenKind::Punctuation, ":")
            && self.last_was_line_start()
        {
            let name = self.ident()?;
            self.advance()?;
            return Ok(Some(Statement::Label {
                name,
                range: self.range_from(start),
            }));
        }

        if token.kind != TokenKind::Keyword {
            return self.expression_statement(start).map(Some);
        }

        let keyword = self.text_of(token).to_ascii_lowercase();
        let statement = match keyword.as_str() {
            "dim" | "static" => {
                self.advance()?;
                let declarators = self.declarators()?;
                Statement::Dim {
                    is_static: keyword == "static",
                    declarators,
                    range: self.range_from(start),
                }
            }
            "const" => {
                self.advance()?;
                let constants = self.const_declarators()?;
                Statement::Const {
                    constants,
                    range: self.range_from(start),
                }
            }
            "set" | "let" => {
                self.advance()?;
                let target = self.postfix_expr(false)?;
                self.expect_operator("=")?;
                let value = self.expr(0)?;
                Statement::Assign {
                    kind: if keyword == "set" {
                        AssignKind::Set
                    } else {
                        AssignKind::Let
                    },
                    target,
                    value,
                    range: self.range_from(start),
                }
            }
            "call" => {
                self.advance()?;
                let (callee, args) = match self.postfix_expr(false)? {
                    Expr::Call { callee, args, .. } => (*callee, args),
                    other => (other, Vec::new()),
                };
                Statement::Call {
                    callee,
                    args,
                    explicit: true,
                    range: self.range_from(start),
                }
            }
            "if" => self.if_statement(start)?,
            "for" => self.for_statement(start)?,
            "do" => {
                self.advance()?;
                let mut condition = self.loop_condition()?;
                let body = self.block("Loop", |p| p.at_keyword("loop"))?;
                self.expect_keyword("loop")?;
                if let Some(post) = self.loop_condition()? {
                    condition = Some(post);
                }
                Statement::Do {
                    condition,
                    body,
                    range: self.range_from(start),
                }
            }
            "while" => {
                self.advance()?;
                let condition = self.expr(0)?;
                let body = self.block("Wend", |p| p.at_keyword("wend"))?;
                self.expect_keyword("wend")?;
                Statement::While {
                    condition,
                    body,
                    range: self.range_from(start),
                }
            }
            "with" => {
                self.advance()?;
                let object = self.expr(0)?;
                let body = self.block("End With", |p| {
                    p.at_keyword("end") && p.nth_is_keyword(1, "with")
                })?;
                self.advance()?;
                self.advance()?;
                Statement::With {
                    object,
                    body,
                    range: self.range_from(start),
                }
            }
            "select" => self.select_statement(start)?,
            "exit" => {
                self.advance()?;
                self.advance()?;
                Statement::Exit {
                    range: self.range_from(start),
                }
            }
            "goto" | "gosub" => {
                self.advance()?;
                let label = self.ident()?;
                Statement::GoTo {
                    label,
                    range: self.range_from(start),
                }
            }
            "on" => {
                self.advance()?;
                self.expect_keyword("error")?;
                let mut label = None;
                if self.eat_keyword("goto") {
                    match self.peek() {
                        Some(t) if t.kind == TokenKind::Identifier => label = Some(self.ident()?),
                        _ => {
                            self.eat_operator("-");
                            self.advance()?;
                        }
                    }
                } else {
                    self.expect_keyword("resume")?;
                    self.expect_keyword("next")?;
                }
                Statement::OnError {
                    label,
                    range: self.range_from(start),
                }
            }
            "resume" => {
                self.advance()?;
                let mut label = None;
                if !self.eat_keyword("next") && !self.at_statement_end() {
                    match self.peek() {
                        Some(t) if t.kind == TokenKind::Identifier => label = Some(self.ident()?),
                        _ => {
                            self.advance()?;
                        }
                    }
                }
                Statement::Resume {
                    label,
                    range: self.range_from(start),
                }
            }
            "redim" => {
                self.advance()?;
                let preserve = self.eat_keyword("preserve");
                let mut targets = Vec::new();
                loop {
                    let mut target = self.primary(false)?;
                    while self.eat_punct(".") {
                        let member = self.member_name()?;
                        let range = target.range().cover(&member.range);
                        target = Expr::Member {
                            object: Box::new(target),
                            member,
                            range,
                        };
                    }
                    self.expect_punct("(")?;
                    let bounds = self.bounds()?;
                    self.expect_punct(")")?;
                    let as_type = if self.eat_keyword("as") {
                        Some(self.type_ref()?)
                    } else {
                        None
                    };
                    targets.push(ReDimTarget {
                        target,
                        bounds,
                        as_type,
                    });
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                Statement::ReDim {
                    preserve,
                    targets,
                    range: self.range_from(start),
                }
            }
            "erase" => {
                self.advance()?;
                let mut targets = vec![self.postfix_expr(false)?];
                while self.eat_punct(",") {
                    targets.push(self.postfix_expr(false)?);
                }
                Statement::Erase {
                    targets,
                    range: self.range_from(start),
                }
            }
            "raiseevent" => {
                self.advance()?;
                let name = self.ident()?;
                let mut args = Vec::new();
                if self.eat_punct("(") {
                    args = self.paren_args()?;
                    self.expect_punct(")")?;
                }
                Statement::RaiseEvent {
                    name,
                    args,
                    range: self.range_from(start),
                }
            }
            "stop" | "end" | "return" => {
                self.advance()?;
                Statement::Control {
                    keyword: self.text_of(token).to_string(),
                    range: self.range_from(start),
                }
            }
            "attribute" => {
                self.skip_line();
                return Ok(None);
            }
            "me" => self.expression_statement(start)?,
            _ if KEYWORD_FUNCTIONS.contains(&keyword.as_str()) => {
                self.expression_statement(start)?
            }
            _ => {
                return self.error(format!("unexpected {} at start of statement", self.found()));
            }
        };
        Ok(Some(statement))
    }

    fn expression_statement(&mut self, start: usize) -> PResult<Statement> {
        let target = self.postfix_expr(true)?;
        if self.eat_operator("=") {
            let value = self.expr(0)?;
            return Ok(Statement::Assign {
                kind: AssignKind::Implicit,
                target,
                value,
                range: self.range_from(start),
            });
        }
        if self.at_statement_end() {
            let (callee, args) = match target {
                Expr::Call { callee, args, .. } => (*callee, args),
                other => (other, Vec::new()),
            };
            return Ok(Statement::Call {
                callee,
                args,
                explicit: false,
                range: self.range_from(start),
            });
        }
        let mut args = Vec::new();
        while !self.at_statement_end() {
            if self.eat_punct(",") || self.eat_punct(";") {
                continue;
            }
            args.push(self.arg()?);
        }
        Ok(Statement::Call {
            callee: target,
            args,
            explicit: false,
            range: self.range_from(start),
        })
    }

    fn if_statement(&mut self, start: usize) -> PResult<Statement> {
        self.expect_keyword("if")?;
        let condition = self.expr(0)?;
        self.expect_keyword("then")?;

        if !self.at_eof() && !self.at_newline() {
            self.single_line_if += 1;
            let bodies = self.single_line_bodies();
            self.single_line_if -= 1;
            let (body, else_body) = bodies?;
            return Ok(Statement::If {
                arms: vec![ConditionalBlock { condition, body }],
                else_body,
                range: self.range_from(start),
            });
        }

        let arm_done = |p: &Self| {
            p.at_keyword("elseif")
                || p.at_keyword("else")
                || (p.at_keyword("end") && p.nth_is_keyword(1, "if"))
        };
        let body = self.block("End If", arm_done)?;
        let mut arms = vec![ConditionalBlock { condition, body }];
        let mut else_body = Vec::new();
        loop {
            if self.eat_keyword("elseif") {
                let condition = self.expr(0)?;
                self.expect_keyword("then")?;
                let body = self.block("End If", arm_done)?;
                arms.push(ConditionalBlock { condition, body });
            } else if self.eat_keyword("else") {
                else_body = self.block("End If", |p| {
                    p.at_keyword("end") && p.nth_is_keyword(1, "if")
                })?;
            } else {
                self.expect_keyword("end")?;
                self.expect_keyword("if")?;
                break;
            }
        }
        Ok(Statement::If {
            arms,
            else_body,
            range: self.range_from(start),
        })
    }

    fn single_line_bodies(&mut self) -> PResult<(Vec<Statement>, Vec<Statement>)> {
        let body = self.inline_statements()?;
        let else_body = if self.eat_keyword("else") {
            self.inline_statements()?
        } else {
            Vec::new()
        };
        Ok((body, else_body))
    }

    fn for_statement(&mut self, start: usize) -> PResult<Statement> {
        self.expect_keyword("for")?;
        if self.eat_keyword("each") {
            let element = self.postfix_expr(false)?;
            self.expect_keyword("in")?;
            let collection = self.expr(0)?;
            let body = self.block("Next", |p| p.at_keyword("next"))?;
            self.finish_next()?;
            return Ok(Statement::ForEach {
                element,
                collection,
                body,
                range: self.range_from(start),
            });
        }
        let counter = self.postfix_expr(false)?;
        self.expect_operator("=")?;
        let from = self.expr(0)?;
        self.expect_keyword("to")?;
        let to = self.expr(0)?;
        let step = if self.eat_keyword("step") {
            Some(self.expr(0)?)
        } else {
            None
        };
        let body = self.block("Next", |p| p.at_keyword("next"))?;
        self.finish_next()?;
        Ok(Statement::For {
            counter,
            start: from,
            end: to,
            step,
            body,
            range: self.range_from(start),
        })
    }

    fn finish_next(&mut self) -> PResult<()> {
        self.expect_keyword("next")?;
        while !self.at_statement_end() {
            self.advance()?;
        }
        Ok(())
    }

    fn loop_condition(&mut self) -> PResult<Option<Expr>> {
        if self.eat_keyword("while") || self.eat_keyword("until") {
            Ok(Some(self.expr(0)?))
        } else {
            Ok(None)
        }
    }

    fn select_statement(&mut self, start: usize) -> PResult<Statement> {
        self.expect_keyword("select")?;
        self.expect_keyword("case")?;
        let subject = self.expr(0)?;
        self.expect_statement_end()?;
        let mut cases = Vec::new();
        loop {
            self.skip_separators();
            if self.at_keyword("end") && self.nth_is_keyword(1, "select") {
                self.advance()?;
                self.advance()?;
                break;
            }
            self.expect_keyword("case")?;
            let mut tests = Vec::new();
            if !self.eat_keyword("else") {
                loop {
                    if self.eat_keyword("is") {
                        self.advance()?;
                        tests.push(self.expr(0)?);
                    } else {
                        tests.push(self.expr(0)?);
                        if self.eat_keyword("to") {
                            tests.push(self.expr(0)?);
                        }
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
            }
            let body = self.block("End Select", |p| {
                p.at_keyword("case") || (p.at_keyword("end") && p.nth_is_keyword(1, "select"))
            })?;
            cases.push(CaseClause { tests, body });
        }
        Ok(Statement::Select {
            subject,
            cases,
            range: self.range_from(start),
        })
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn binary_op(&self) -> Option<(String, u8)> {
        let token = self.peek()?;
        let text = self.text_of(token);
        let power = match token.kind {
            TokenKind::Operator => match text {
                "^" => 14,
                "*" | "/" => 12,
                "\\" => 11,
                "+" | "-" => 9,
                "&" => 8,
                "=" | "<>" | "<" | ">" | "<=" | ">=" => 7,
                _ => return None,
            },
            TokenKind::Keyword => match text.to_ascii_lowercase().as_str() {
                "mod" => 10,
                "like" | "is" => 7,
                "and" => 5,
                "or" => 4,
                "xor" => 3,
                "eqv" => 2,
                "imp" => 1,
                _ => return None,
            },
            _ => return None,
        };
        Some((text.to_string(), power))
    }

    fn expr(&mut self, min_power: u8) -> PResult<Expr> {
        let start = self.peek_index();
        let mut lhs = if self.at_keyword("not") {
            self.advance()?;
            let operand = self.expr(6)?;
            Expr::Unary {
                op: "Not".into(),
                operand: Box::new(operand),
                range: self.range_from(start),
            }
        } else if self.at_operator("-") || self.at_operator("+") {
            let token = self.advance()?;
            let op = self.text_of(token).to_string();
            let operand = self.expr(13)?;
            Expr::Unary {
                op,
                operand: Box::new(operand),
                range: self.range_from(start),
            }
        } else if self.eat_keyword("addressof") {
            let operand = self.postfix_expr(false)?;
            Expr::Unary {
                op: "AddressOf".into(),
                operand: Box::new(operand),
                range: self.range_from(start),
            }
        } else {
            self.postfix_expr(false)?
        };

        while let Some((op, power)) = self.binary_op() {
            if power < min_power {
                break;
            }
            self.advance()?;
            let rhs = self.expr(power + 1)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
                range: self.range_from(start),
            };
        }
        Ok(lhs)
    }

    /// A primary followed by member accesses and argument lists. At the head
    /// of a call statement, a `(` after whitespace starts the first argument
    /// rather than an argument list.
    fn postfix_expr(&mut self, statement_head: bool) -> PResult<Expr> {
        let mut expr = self.primary(statement_head)?;
        loop {
            if self.at_punct(".") {
                self.advance()?;
                let member = self.member_name()?;
                let range = expr.range().cover(&member.range);
                expr = Expr::Member {
                    object: Box::new(expr),
                    member,
                    range,
                };
            } else if self.at_punct("!") {
                self.advance()?;
                let key = self.member_name()?;
                let range = expr.range().cover(&key.range);
                expr = Expr::Bang {
                    object: Box::new(expr),
                    key,
                    range,
                };
            } else if self.at_punct("(") && !(statement_head && self.space_before_next()) {
                self.advance()?;
                let args = self.paren_args()?;
                self.expect_punct(")")?;
                let range = expr.range().cover(&TokenRange::single(&self.tokens[self.last]));
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    range,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn paren_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        loop {
            if self.eat_punct(",") {
                continue;
            }
            if self.at_punct(")") {
                return Ok(args);
            }
            args.push(self.arg()?);
            if !self.at_punct(",") {
                return Ok(args);
            }
        }
    }

    fn arg(&mut self) -> PResult<Arg> {
        let named = self
            .peek()
            .map(|t| t.kind == TokenKind::Identifier)
            .unwrap_or(false)
            && self.is_symbol(self.nth(1), TokenKind::Operator, ":=");
        let name = if named {
            let name = self.ident()?;
            self.advance()?;
            Some(name)
        } else {
            None
        };
        self.eat_keyword("byval");
        let value = self.expr(0)?;
        Ok(Arg { name, value })
    }

    fn primary(&mut self, statement_head: bool) -> PResult<Expr> {
        let start = self.peek_index();
        let Some(token) = self.peek() else {
            return self.error("expected an expression, found end of module");
        };
        let text = self.text_of(token);
        match token.kind {
            TokenKind::Identifier => Ok(Expr::Name(self.ident()?)),
            TokenKind::NumberLiteral | TokenKind::StringLiteral | TokenKind::DateLiteral => {
                self.advance()?;
                Ok(Expr::Literal {
                    range: TokenRange::single(token),
                })
            }
            TokenKind::Keyword => match text.to_ascii_lowercase().as_str() {
                "me" => {
                    self.advance()?;
                    Ok(Expr::Me {
                        range: TokenRange::single(token),
                    })
                }
                "true" | "false" | "nothing" | "null" | "empty" => {
                    self.advance()?;
                    Ok(Expr::Literal {
                        range: TokenRange::single(token),
                    })
                }
                "new" => {
                    self.advance()?;
                    let ty = self.type_ref()?;
                    Ok(Expr::New {
                        ty,
                        range: self.range_from(start),
                    })
                }
                "typeof" => {
                    self.advance()?;
                    let value = self.postfix_expr(false)?;
                    self.expect_keyword("is")?;
                    let ty = self.type_ref()?;
                    Ok(Expr::TypeOf {
                        value: Box::new(value),
                        ty,
                        range: self.range_from(start),
                    })
                }
                lower if KEYWORD_FUNCTIONS.contains(&lower) => {
                    self.advance()?;
                    Ok(Expr::Name(self.ident_from(token)))
                }
                _ => self.error(format!("expected an expression, found {}", self.found())),
            },
            TokenKind::Punctuation if text == "(" && !statement_head => {
                self.advance()?;
                let inner = self.expr(0)?;
                self.expect_punct(")")?;
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    range: self.range_from(start),
                })
            }
            TokenKind::Punctuation if text == "." || text == "!" => {
                self.advance()?;
                let member = self.member_name()?;
                Ok(Expr::WithMember {
                    member,
                    range: self.range_from(start),
                })
            }
            _ => self.error(format!("expected an expression, found {}", self.found())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ModuleTree {
        parse_module(text).unwrap()
    }

    fn only_procedure(tree: &ModuleTree) -> &Procedure {
        tree.procedures().next().unwrap()
    }

    mod module_tests {
        use super::*;

        #[test]
        fn header_and_attributes_are_skipped() {
            let text = "VERSION 1.0 CLASS\r\nBEGIN\r\n  MultiUse = -1  'True\r\nEND\r\nAttribute VB_Name = \"Class1\"\r\nAttribute VB_PredeclaredId = True\r\nOption Explicit\r\n";
            let tree = parse(text);
            assert_eq!(tree.attribute("VB_Name"), Some("Class1"));
            assert_eq!(tree.attribute("vb_predeclaredid"), Some("True"));
            assert_eq!(&text[tree.body_start as usize..], "Option Explicit\r\n");
            assert!(tree.has_option("Explicit"));
            assert_eq!(tree.options_end as usize, text.len());
        }

        #[test]
        fn options_end_falls_back_to_body_start() {
            let tree = parse("Attribute VB_Name = \"M\"\nPublic x As Long\n");
            assert_eq!(tree.options_end, tree.body_start);
            assert_eq!(tree.declarations_end as usize, "Attribute VB_Name = \"M\"\nPublic x As Long\n".len());
        }

        #[test]
        fn module_annotations_and_member_annotations() {
            let text = "'@TestModule\n'@Folder(\"Tests\")\nOption Explicit\n\n'@TestMethod(\"Unit\")\nPublic Sub TestOne()\nEnd Sub\n";
            let tree = parse(text);
            let names: Vec<_> = tree.annotations.iter().map(|a| a.name.as_str()).collect();
            assert_eq!(names, vec!["TestModule", "Folder"]);
            assert_eq!(tree.annotations[1].args, vec!["Tests".to_string()]);
            let procedure = only_procedure(&tree);
            assert_eq!(procedure.annotations.len(), 1);
            assert_eq!(procedure.annotations[0].name, "TestMethod");
        }

        #[test]
        fn declarations_section_items() {
            let text = "Option Explicit\nImplements IFoo\nPrivate Type Point\n  X As Long\n  Y As Long\nEnd Type\nPublic Enum Color\n  Red = 1\n  Green\nEnd Enum\nPublic Event Changed(ByVal value As Long)\nPrivate Declare PtrSafe Function GetTickCount Lib \"kernel32\" () As Long\nPrivate Const MAX As Long = 10, NAME$ = \"x\"\nPrivate WithEvents source As Foo, items() As String\n";
            let tree = parse(text);
            assert_eq!(tree.implements[0].interface.name(), "IFoo");
            assert_eq!(tree.items.len(), 6);
            match &tree.items[5] {
                ModuleItem::Variables { declarators, accessibility, .. } => {
                    assert_eq!(*accessibility, Accessibility::Private);
                    assert!(declarators[0].with_events);
                    assert!(declarators[1].is_array);
                }
                other => panic!("unexpected item {:?}", other),
            }
            assert_eq!(tree.declarations_end as usize, text.len());
        }

        #[test]
        fn form_designer_block_is_skipped() {
            let text = "VERSION 5.00\nBegin {C62A69F0-16DC-11CE-9E98-00AA00574A4F} UserForm1\n   Caption = \"UserForm1\"\n   OleObjectBlob = \"UserForm1.frx\":0000\nEnd\nAttribute VB_Name = \"UserForm1\"\nPrivate Sub UserForm_Initialize()\nEnd Sub\n";
            let tree = parse(text);
            assert_eq!(tree.attribute("VB_Name"), Some("UserForm1"));
            assert_eq!(only_procedure(&tree).name.name, "UserForm_Initialize");
        }

        #[test]
        fn syntax_error_reports_offset() {
            let err = parse_module("Sub A()\n  x = \nEnd Sub\n").unwrap_err();
            assert!(err.message.contains("expected an expression"));
            assert_eq!(err.offset, 14);
        }

        #[test]
        fn missing_end_sub_is_an_error() {
            let err = parse_module("Sub A()\n  x = 1\n").unwrap_err();
            assert!(err.message.contains("End Sub"));
        }
    }

    mod statement_tests {
        use super::*;

        fn body(text: &str) -> Vec<Statement> {
            let tree = parse(&format!("Sub T()\n{}\nEnd Sub\n", text));
            only_procedure(&tree).body.clone()
        }

        #[test]
        fn call_statement_without_parens() {
            let statements = body("Debug.Print Format(1, \"0\")");
            match &statements[0] {
                Statement::Call { callee, args, explicit, .. } => {
                    assert!(!explicit);
                    assert!(matches!(callee, Expr::Member { member, .. } if member.name == "Print"));
                    assert_eq!(args.len(), 1);
                    assert!(matches!(&args[0].value, Expr::Call { .. }));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn spaced_paren_is_first_argument() {
            let statements = body("DoIt (1), 2");
            match &statements[0] {
                Statement::Call { callee, args, .. } => {
                    assert!(matches!(callee, Expr::Name(_)));
                    assert_eq!(args.len(), 2);
                    assert!(matches!(args[0].value, Expr::Paren { .. }));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn explicit_call_unwraps_arguments() {
            let statements = body("Call B.Foo(1, x:=2)");
            match &statements[0] {
                Statement::Call { callee, args, explicit, .. } => {
                    assert!(explicit);
                    assert!(matches!(callee, Expr::Member { .. }));
                    assert_eq!(args[1].name.as_ref().map(|n| n.name.as_str()), Some("x"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn assignments() {
            let statements = body("x = 1\nSet y = New Collection\nLet z = x + 1\narr(1) = 3");
            let kinds: Vec<_> = statements
                .iter()
                .map(|s| match s {
                    Statement::Assign { kind, .. } => *kind,
                    other => panic!("unexpected {:?}", other),
                })
                .collect();
            assert_eq!(
                kinds,
                vec![AssignKind::Implicit, AssignKind::Set, AssignKind::Let, AssignKind::Implicit]
            );
        }

        #[test]
        fn block_statements() {
            let statements = body(
                "If a Then\n  b = 1\nElseIf c Then\n  b = 2\nElse\n  b = 3\nEnd If\nFor i = 1 To 10 Step 2\nNext i\nFor Each v In coll\nNext\nDo While x < 3\n  x = x + 1\nLoop\nWhile y\nWend\nWith obj\n  .Name = \"n\"\nEnd With\nSelect Case n\n  Case 1, 2 To 4, Is > 10\n  Case Else\nEnd Select",
            );
            assert_eq!(statements.len(), 7);
            match &statements[0] {
                Statement::If { arms, else_body, .. } => {
                    assert_eq!(arms.len(), 2);
                    assert_eq!(else_body.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            }
            match &statements[6] {
                Statement::Select { cases, .. } => {
                    assert_eq!(cases[0].tests.len(), 4);
                    assert!(cases[1].tests.is_empty());
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn single_line_if_with_else() {
            let statements = body("If a Then b = 1: c = 2 Else d = 3");
            match &statements[0] {
                Statement::If { arms, else_body, .. } => {
                    assert_eq!(arms[0].body.len(), 2);
                    assert_eq!(else_body.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn labels_and_error_handling() {
            let statements = body("On Error GoTo Handler\nExit Sub\nHandler:\nResume Next");
            assert!(matches!(&statements[0], Statement::OnError { label: Some(l), .. } if l.name == "Handler"));
            assert!(matches!(&statements[2], Statement::Label { name, .. } if name.name == "Handler"));
            assert!(matches!(&statements[3], Statement::Resume { label: None, .. }));
        }

        #[test]
        fn redim_and_locals() {
            let statements = body("Dim a() As Long, s$\nReDim Preserve a(1 To n)\nStatic count As Integer\nConst K = 2");
            match &statements[1] {
                Statement::ReDim { preserve, targets, .. } => {
                    assert!(preserve);
                    assert_eq!(targets[0].bounds.len(), 2);
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(matches!(&statements[2], Statement::Dim { is_static: true, .. }));
        }

        #[test]
        fn operator_precedence() {
            let statements = body("x = Not a = b And c");
            match &statements[0] {
                Statement::Assign { value: Expr::Binary { op, left, .. }, .. } => {
                    assert_eq!(op, "And");
                    assert!(matches!(**left, Expr::Unary { .. }));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        #[test]
        fn line_continuation_joins_statement() {
            let statements = body("x = 1 + _\n    2");
            assert_eq!(statements.len(), 1);
        }

        #[test]
        fn attribute_lines_inside_procedures_are_ignored() {
            let statements = body("Attribute T.VB_Description = \"does things\"\nx = 1");
            assert_eq!(statements.len(), 1);
        }
    }
}
