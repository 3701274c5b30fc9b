use super::ast::*;
use super::lexer::{tokenize, LexError};
use super::span::Span;
use super::token::{Keyword, Token, TokenKind};
use super::Dialect;
use std::sync::Arc;
use thiserror::Error;

/// A syntax error with a stable numeric code, reported as a diagnostic.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub code: u32,
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    fn new(code: u32, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
        }
    }
}

impl From<LexError> for SyntaxError {
    fn from(error: LexError) -> Self {
        let code = match error {
            LexError::UnterminatedString { .. } => 1002,
            LexError::UnterminatedComment { .. } => 1010,
            LexError::UnexpectedCharacter { .. } => 1127,
            LexError::InvalidNumber { .. } => 1351,
        };
        SyntaxError::new(code, error.to_string(), error.span())
    }
}

/// Parses a complete guest module.
///
/// # Arguments
///
/// * `source` - The module text
/// * `dialect` - Whether typed-only syntax is accepted
///
/// # Returns
///
/// The program, or every syntax error found. Parsing recovers at statement
/// boundaries so one pass reports as many errors as possible.
pub fn parse(source: &str, dialect: Dialect) -> Result<Program, Vec<SyntaxError>> {
    let tokens = tokenize(source)
        .map_err(|errors| errors.into_iter().map(SyntaxError::from).collect::<Vec<_>>())?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        dialect,
        errors: Vec::new(),
        functions: Vec::new(),
        depth: 0,
    };
    let program = parser.parse_program();
    if parser.errors.is_empty() {
        Ok(program)
    } else {
        Err(parser.errors)
    }
}

/// Deepest nesting of statements, expressions and types accepted. Longer
/// left-associative chains such as `a + b + ...` count one level per operand.
pub const MAX_NESTING_DEPTH: usize = 256;

const NESTING_ERROR_CODE: u32 = 1999;
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

type PResult<T> = Result<T, SyntaxError>;

#[derive(Clone, Copy)]
struct FnContext {
    is_async: bool,
}

struct ArrowHead {
    params: Vec<Param>,
    is_async: bool,
    return_type: Option<TypeAnn>,
    start: Span,
}

enum InfixOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix_op(kind: &TokenKind) -> Option<(u8, InfixOp)> {
    let entry = match kind {
        TokenKind::QuestionQuestion => (1, InfixOp::Logical(LogicalOp::Nullish)),
        TokenKind::OrOr => (2, InfixOp::Logical(LogicalOp::Or)),
        TokenKind::AndAnd => (3, InfixOp::Logical(LogicalOp::And)),
        TokenKind::EqEq => (4, InfixOp::Binary(BinaryOp::Eq)),
        TokenKind::NotEq => (4, InfixOp::Binary(BinaryOp::NotEq)),
        TokenKind::EqEqEq => (4, InfixOp::Binary(BinaryOp::StrictEq)),
        TokenKind::NotEqEq => (4, InfixOp::Binary(BinaryOp::StrictNotEq)),
        TokenKind::Lt => (5, InfixOp::Binary(BinaryOp::Lt)),
        TokenKind::Gt => (5, InfixOp::Binary(BinaryOp::Gt)),
        TokenKind::LtEq => (5, InfixOp::Binary(BinaryOp::LtEq)),
        TokenKind::GtEq => (5, InfixOp::Binary(BinaryOp::GtEq)),
        TokenKind::Plus => (6, InfixOp::Binary(BinaryOp::Add)),
        TokenKind::Minus => (6, InfixOp::Binary(BinaryOp::Sub)),
        TokenKind::Star => (7, InfixOp::Binary(BinaryOp::Mul)),
        TokenKind::Slash => (7, InfixOp::Binary(BinaryOp::Div)),
        TokenKind::Percent => (7, InfixOp::Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(entry)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    dialect: Dialect,
    errors: Vec<SyntaxError>,
    functions: Vec<FnContext>,
    depth: usize,
}

impl Parser {
    // ---- token helpers ----

    fn current(&self) -> &Token {
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        &self.tokens[index].kind
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            return self.current().span;
        }
        self.tokens[self.pos - 1].span
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek() == &TokenKind::Keyword(keyword)
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(name) if name == word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.expected(&kind.to_string()))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(SyntaxError::new(
                1003,
                "Identifier expected.",
                self.current().span,
            )),
        }
    }

    fn expect_word(&mut self, word: &str) -> PResult<()> {
        if self.check_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.expected(word))
        }
    }

    /// Accepts identifiers, keywords, strings and numbers as property names.
    fn property_name(&mut self) -> PResult<String> {
        let name = match self.peek().clone() {
            TokenKind::Ident(name) | TokenKind::Str(name) => name,
            TokenKind::Keyword(keyword) => keyword.as_str().to_string(),
            TokenKind::Number(value) => format!("{}", value),
            _ => {
                return Err(SyntaxError::new(
                    1003,
                    "Property name expected.",
                    self.current().span,
                ))
            }
        };
        self.advance();
        Ok(name)
    }

    fn expected(&self, what: &str) -> SyntaxError {
        SyntaxError::new(1005, format!("'{}' expected.", what), self.current().span)
    }

    fn unexpected(&self) -> SyntaxError {
        SyntaxError::new(
            1109,
            format!("Unexpected {}.", self.peek().describe()),
            self.current().span,
        )
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat(&TokenKind::Semicolon) {
            return Ok(());
        }
        let on_new_line = self.pos > 0 && self.current().span.line > self.prev_span().line;
        if matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) || on_new_line {
            return Ok(());
        }
        Err(self.expected(";"))
    }

    fn typed(&self) -> bool {
        self.dialect == Dialect::Typed
    }

    fn in_async(&self) -> bool {
        self.functions.last().is_some_and(|ctx| ctx.is_async)
    }

    fn with_function<T>(
        &mut self,
        ctx: FnContext,
        f: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<T> {
        self.functions.push(ctx);
        let result = f(self);
        self.functions.pop();
        result
    }

    /// Counts one level of nesting, failing once [`MAX_NESTING_DEPTH`] is
    /// reached. Only call inside [`Parser::nested`] or [`Parser::chained`],
    /// which restore the count.
    fn deepen(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(SyntaxError::new(
                NESTING_ERROR_CODE,
                "Expression nested too deeply.",
                self.current().span,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = self.depth;
        let result = match self.deepen() {
            Ok(()) => stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || f(self)),
            Err(error) => Err(error),
        };
        self.depth = saved;
        result
    }

    /// Runs a loop that deepens once per link, restoring the count after.
    fn chained<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved = self.depth;
        let result = f(self);
        self.depth = saved;
        result
    }

    // ---- statements ----

    fn parse_program(&mut self) -> Program {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            let start = self.pos;
            match self.parse_statement(true) {
                Ok(stmt) => body.push(stmt),
                Err(error) => {
                    self.errors.push(error);
                    self.synchronize(start);
                }
            }
        }
        Program { body }
    }

    fn synchronize(&mut self, start: usize) {
        if self.pos == start {
            self.advance();
        }
        while !self.check(&TokenKind::Eof) {
            if self.eat(&TokenKind::Semicolon) || self.eat(&TokenKind::RBrace) {
                return;
            }
            if matches!(
                self.peek(),
                TokenKind::Keyword(
                    Keyword::Function
                        | Keyword::Let
                        | Keyword::Const
                        | Keyword::Var
                        | Keyword::Export
                        | Keyword::Import
                )
            ) {
                return;
            }
            self.advance();
        }
    }

    fn parse_statement(&mut self, top_level: bool) -> PResult<Stmt> {
        self.nested(|p| p.parse_statement_inner(top_level))
    }

    fn parse_statement_inner(&mut self, top_level: bool) -> PResult<Stmt> {
        match self.peek().clone() {
            TokenKind::Keyword(keyword) => match keyword {
                Keyword::Let | Keyword::Const | Keyword::Var => {
                    let stmt = self.parse_var_statement(false)?;
                    self.consume_semicolon()?;
                    Ok(stmt)
                }
                Keyword::Function => {
                    let start = self.current().span;
                    self.parse_function_declaration(false, false, start)
                }
                Keyword::Async if self.peek_at(1) == &TokenKind::Keyword(Keyword::Function) => {
                    let start = self.advance().span;
                    self.parse_function_declaration(true, false, start)
                }
                Keyword::Return => self.parse_return(),
                Keyword::If => self.parse_if(),
                Keyword::While => self.parse_while(),
                Keyword::For => self.parse_for(),
                Keyword::Break => {
                    let span = self.advance().span;
                    self.consume_semicolon()?;
                    Ok(Stmt::Break(span))
                }
                Keyword::Continue => {
                    let span = self.advance().span;
                    self.consume_semicolon()?;
                    Ok(Stmt::Continue(span))
                }
                Keyword::Throw => {
                    let start = self.advance().span;
                    let value = self.parse_expression()?;
                    self.consume_semicolon()?;
                    Ok(Stmt::Throw {
                        value,
                        span: start.merge(&self.prev_span()),
                    })
                }
                Keyword::Try => self.parse_try(),
                Keyword::Export if top_level => self.parse_export(),
                Keyword::Export => Err(SyntaxError::new(
                    1474,
                    "An export declaration can only be used at the top level of a module.",
                    self.current().span,
                )),
                Keyword::Import if self.peek_at(1) != &TokenKind::LParen => {
                    if top_level {
                        self.parse_import()
                    } else {
                        Err(SyntaxError::new(
                            1232,
                            "An import declaration can only be used at the top level of a module.",
                            self.current().span,
                        ))
                    }
                }
                _ => self.parse_expression_statement(),
            },
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Ident(word) if self.typed() => {
                let next_is_ident = matches!(self.peek_at(1), TokenKind::Ident(_));
                match word.as_str() {
                    "type" if next_is_ident => self.parse_type_alias(),
                    "interface" if next_is_ident => self.parse_interface(),
                    "declare"
                        if matches!(
                            self.peek_at(1),
                            TokenKind::Keyword(
                                Keyword::Function
                                    | Keyword::Async
                                    | Keyword::Const
                                    | Keyword::Let
                                    | Keyword::Var
                            )
                        ) =>
                    {
                        self.parse_declare()
                    }
                    _ => self.parse_expression_statement(),
                }
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.expected("}"));
            }
            body.push(self.parse_statement(false)?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_var_statement(&mut self, declare: bool) -> PResult<Stmt> {
        let token = self.advance();
        let kind = match token.kind {
            TokenKind::Keyword(Keyword::Let) => VarKind::Let,
            TokenKind::Keyword(Keyword::Const) => VarKind::Const,
            _ => VarKind::Var,
        };

        let mut decls = Vec::new();
        loop {
            let start = self.current().span;
            let target = self.parse_binding_pattern()?;
            let ty = if self.check(&TokenKind::Colon) {
                Some(self.parse_type_annotation()?)
            } else {
                None
            };
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == VarKind::Const && init.is_none() && !declare {
                return Err(SyntaxError::new(
                    1155,
                    "'const' declarations must be initialized.",
                    start,
                ));
            }
            decls.push(VarDecl {
                target,
                ty,
                init,
                span: start.merge(&self.prev_span()),
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }

        Ok(Stmt::Var {
            kind,
            decls,
            declare,
            span: token.span.merge(&self.prev_span()),
        })
    }

    fn parse_binding_pattern(&mut self) -> PResult<Pattern> {
        self.nested(|p| p.parse_binding_pattern_inner())
    }

    fn parse_binding_pattern_inner(&mut self) -> PResult<Pattern> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Pattern::Ident(name))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut props = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let shorthand = matches!(self.peek(), TokenKind::Ident(_));
                    let key_span = self.current().span;
                    let key = self.property_name()?;
                    let value = if self.eat(&TokenKind::Colon) {
                        self.parse_binding_pattern()?
                    } else if shorthand {
                        Pattern::Ident(key.clone())
                    } else {
                        return Err(SyntaxError::new(1005, "':' expected.", key_span));
                    };
                    let default = if self.eat(&TokenKind::Assign) {
                        Some(self.parse_assignment()?)
                    } else {
                        None
                    };
                    props.push(PropPattern {
                        key,
                        value,
                        default,
                    });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Pattern::Object(props))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    if self.eat(&TokenKind::Comma) {
                        items.push(None);
                        continue;
                    }
                    items.push(Some(self.parse_binding_pattern()?));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Pattern::Array(items))
            }
            _ => Err(SyntaxError::new(
                1003,
                "Identifier expected.",
                self.current().span,
            )),
        }
    }

    fn parse_function_declaration(
        &mut self,
        is_async: bool,
        declare: bool,
        start: Span,
    ) -> PResult<Stmt> {
        self.expect(TokenKind::Keyword(Keyword::Function))?;
        let name = self.expect_ident()?;
        let bodyless_ok = self.typed();
        let function = self.parse_function_rest(Some(name), is_async, start, bodyless_ok || declare)?;
        if declare && function.has_body() {
            return Err(SyntaxError::new(
                1183,
                "An implementation cannot be declared in ambient contexts.",
                function.span,
            ));
        }
        Ok(Stmt::Function(Arc::new(function)))
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        is_async: bool,
        start: Span,
        bodyless_ok: bool,
    ) -> PResult<Function> {
        let params = self.parse_params()?;
        let return_type = if self.check(&TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let body = if self.check(&TokenKind::LBrace) {
            let block = self.with_function(FnContext { is_async }, |p| p.parse_block())?;
            Some(FunctionBody::Block(block))
        } else if bodyless_ok {
            self.consume_semicolon()?;
            None
        } else {
            return Err(self.expected("{"));
        };
        Ok(Function {
            name,
            params,
            body,
            return_type,
            is_async,
            is_arrow: false,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let start = self.current().span;
            let rest = self.eat(&TokenKind::Ellipsis);
            let pattern = self.parse_binding_pattern()?;
            let optional = if self.check(&TokenKind::Question) {
                if !self.typed() {
                    return Err(SyntaxError::new(
                        8009,
                        "The '?' modifier can only be used in typed files.",
                        self.current().span,
                    ));
                }
                self.advance();
                true
            } else {
                false
            };
            let ty = if self.check(&TokenKind::Colon) {
                Some(self.parse_type_annotation()?)
            } else {
                None
            };
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param {
                pattern,
                ty,
                default,
                optional,
                rest,
                span: start.merge(&self.prev_span()),
            });
            if rest && !self.check(&TokenKind::RParen) {
                return Err(SyntaxError::new(
                    1014,
                    "A rest parameter must be last in a parameter list.",
                    start,
                ));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        let token = self.advance();
        if self.functions.is_empty() {
            return Err(SyntaxError::new(
                1108,
                "A 'return' statement can only be used within a function body.",
                token.span,
            ));
        }
        let ends_here = matches!(
            self.peek(),
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        ) || self.current().span.line > token.span.line;
        let value = if ends_here {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon()?;
        Ok(Stmt::Return {
            value,
            span: token.span.merge(&self.prev_span()),
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let consequent = Box::new(self.parse_statement(false)?);
        let alternate = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_statement(false)?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_while(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(TokenKind::LParen)?;
        let test = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement(false)?);
        Ok(Stmt::While { test, body })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(TokenKind::LParen)?;

        let declaration = match self.peek() {
            TokenKind::Keyword(Keyword::Let) => Some(VarKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(VarKind::Const),
            TokenKind::Keyword(Keyword::Var) => Some(VarKind::Var),
            _ => None,
        };

        if let Some(kind) = declaration {
            let save = self.pos;
            self.advance();
            if let Ok(target) = self.parse_binding_pattern() {
                if self.eat_keyword(Keyword::Of) {
                    let iterable = self.parse_assignment()?;
                    self.expect(TokenKind::RParen)?;
                    let body = Box::new(self.parse_statement(false)?);
                    return Ok(Stmt::ForOf {
                        kind,
                        target,
                        iterable,
                        body,
                    });
                }
            }
            self.pos = save;
        }

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if declaration.is_some() {
            Some(Box::new(self.parse_var_statement(false)?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expression()?)))
        };
        self.expect(TokenKind::Semicolon)?;
        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon)?;
        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement(false)?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword(Keyword::Catch) {
            if self.eat(&TokenKind::LParen) {
                param = Some(self.parse_binding_pattern()?);
                if self.check(&TokenKind::Colon) {
                    self.parse_type_annotation()?;
                }
                self.expect(TokenKind::RParen)?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.eat_keyword(Keyword::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(SyntaxError::new(1472, "'catch' or 'finally' expected.", start));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn parse_export(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        match self.peek().clone() {
            TokenKind::Keyword(Keyword::Default) => {
                self.advance();
                let is_function = self.check_keyword(Keyword::Function)
                    || (self.check_keyword(Keyword::Async)
                        && self.peek_at(1) == &TokenKind::Keyword(Keyword::Function));
                let value = if is_function {
                    let expr = self.parse_function_expression()?;
                    self.eat(&TokenKind::Semicolon);
                    expr
                } else {
                    let expr = self.parse_assignment()?;
                    self.consume_semicolon()?;
                    expr
                };
                Ok(Stmt::Export(ModuleExport::Default {
                    value,
                    span: start.merge(&self.prev_span()),
                }))
            }
            TokenKind::Assign => {
                self.advance();
                let value = self.parse_assignment()?;
                self.consume_semicolon()?;
                Ok(Stmt::Export(ModuleExport::Assign {
                    value,
                    span: start.merge(&self.prev_span()),
                }))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut specifiers = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let local = self.expect_ident()?;
                    let exported = if self.check_word("as") {
                        self.advance();
                        self.property_name()?
                    } else {
                        local.clone()
                    };
                    specifiers.push(ExportSpecifier { local, exported });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                self.consume_semicolon()?;
                Ok(Stmt::Export(ModuleExport::Named {
                    specifiers,
                    span: start.merge(&self.prev_span()),
                }))
            }
            _ => {
                let declaration = self.parse_statement(false)?;
                match declaration {
                    Stmt::Function(_)
                    | Stmt::Var { .. }
                    | Stmt::TypeAlias { .. }
                    | Stmt::Interface { .. } => {
                        Ok(Stmt::Export(ModuleExport::Declaration(Box::new(declaration))))
                    }
                    _ => Err(SyntaxError::new(1128, "Declaration expected.", start)),
                }
            }
        }
    }

    fn parse_import(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let mut import = Import {
            source: String::new(),
            default: None,
            namespace: None,
            named: Vec::new(),
            span: start,
        };

        if let TokenKind::Str(source) = self.peek().clone() {
            self.advance();
            self.consume_semicolon()?;
            import.source = source;
            import.span = start.merge(&self.prev_span());
            return Ok(Stmt::Import(import));
        }

        if let TokenKind::Ident(name) = self.peek().clone() {
            self.advance();
            import.default = Some(name);
            if self.eat(&TokenKind::Comma) {
                self.parse_import_bindings(&mut import)?;
            }
        } else {
            self.parse_import_bindings(&mut import)?;
        }

        self.expect_word("from")?;
        match self.peek().clone() {
            TokenKind::Str(source) => {
                self.advance();
                import.source = source;
            }
            _ => return Err(SyntaxError::new(1141, "String literal expected.", self.current().span)),
        }
        self.consume_semicolon()?;
        import.span = start.merge(&self.prev_span());
        Ok(Stmt::Import(import))
    }

    fn parse_import_bindings(&mut self, import: &mut Import) -> PResult<()> {
        if self.eat(&TokenKind::Star) {
            self.expect_word("as")?;
            import.namespace = Some(self.expect_ident()?);
            return Ok(());
        }
        self.expect(TokenKind::LBrace)?;
        while !self.check(&TokenKind::RBrace) {
            let is_ident = matches!(self.peek(), TokenKind::Ident(_));
            let imported = self.property_name()?;
            let local = if self.check_word("as") {
                self.advance();
                self.expect_ident()?
            } else if is_ident {
                imported.clone()
            } else {
                return Err(self.expected("as"));
            };
            import.named.push(ImportSpecifier { imported, local });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    fn parse_type_alias(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let ty = self.parse_type()?;
        self.consume_semicolon()?;
        Ok(Stmt::TypeAlias {
            name,
            ty,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_interface(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        let name = self.expect_ident()?;
        let members = self.parse_type_members()?;
        Ok(Stmt::Interface {
            name,
            members,
            span: start.merge(&self.prev_span()),
        })
    }

    fn parse_declare(&mut self) -> PResult<Stmt> {
        let start = self.advance().span;
        match self.peek() {
            TokenKind::Keyword(Keyword::Function) => self.parse_function_declaration(false, true, start),
            TokenKind::Keyword(Keyword::Async) => {
                self.advance();
                self.parse_function_declaration(true, true, start)
            }
            _ => {
                let stmt = self.parse_var_statement(true)?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
        }
    }

    // ---- types ----

    fn parse_type_annotation(&mut self) -> PResult<TypeAnn> {
        let colon = self.expect(TokenKind::Colon)?;
        if !self.typed() {
            return Err(SyntaxError::new(
                8010,
                "Type annotations can only be used in typed files.",
                colon.span,
            ));
        }
        self.parse_type()
    }

    fn parse_type(&mut self) -> PResult<TypeAnn> {
        self.nested(|p| p.parse_type_inner())
    }

    fn parse_type_inner(&mut self) -> PResult<TypeAnn> {
        self.eat(&TokenKind::Pipe);
        let first = self.parse_array_type()?;
        if !self.check(&TokenKind::Pipe) {
            return Ok(first);
        }
        let mut members = vec![first];
        while self.eat(&TokenKind::Pipe) {
            members.push(self.parse_array_type()?);
        }
        Ok(TypeAnn::Union(members))
    }

    fn parse_array_type(&mut self) -> PResult<TypeAnn> {
        self.chained(|p| {
            let mut ty = p.parse_primary_type()?;
            while p.check(&TokenKind::LBracket) && p.peek_at(1) == &TokenKind::RBracket {
                p.deepen()?;
                p.advance();
                p.advance();
                ty = TypeAnn::Array(Box::new(ty));
            }
            Ok(ty)
        })
    }

    fn parse_primary_type(&mut self) -> PResult<TypeAnn> {
        let named = |name: &str| TypeAnn::Named {
            name: name.to_string(),
            args: Vec::new(),
        };
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                let mut args = Vec::new();
                if self.eat(&TokenKind::Lt) {
                    loop {
                        args.push(self.parse_type()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::Gt)?;
                }
                Ok(TypeAnn::Named { name, args })
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(named("null"))
            }
            TokenKind::Keyword(Keyword::Undefined) => {
                self.advance();
                Ok(named("undefined"))
            }
            TokenKind::Keyword(Keyword::True | Keyword::False) => {
                self.advance();
                Ok(named("boolean"))
            }
            TokenKind::Str(_) => {
                self.advance();
                Ok(named("string"))
            }
            TokenKind::Number(_) => {
                self.advance();
                Ok(named("number"))
            }
            TokenKind::LBrace => Ok(TypeAnn::Object(self.parse_type_members()?)),
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_type()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(TypeAnn::Tuple(items))
            }
            TokenKind::LParen => {
                let save = self.pos;
                match self.parse_function_type() {
                    Ok(ty) => Ok(ty),
                    Err(_) => {
                        self.pos = save;
                        self.advance();
                        let inner = self.parse_type()?;
                        self.expect(TokenKind::RParen)?;
                        Ok(inner)
                    }
                }
            }
            _ => Err(SyntaxError::new(1110, "Type expected.", self.current().span)),
        }
    }

    fn parse_function_type(&mut self) -> PResult<TypeAnn> {
        let params = self.parse_fn_type_params()?;
        self.expect(TokenKind::Arrow)?;
        let ret = self.parse_type()?;
        Ok(TypeAnn::Function {
            params,
            ret: Box::new(ret),
        })
    }

    fn parse_fn_type_params(&mut self) -> PResult<Vec<FnTypeParam>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let rest = self.eat(&TokenKind::Ellipsis);
            let name = self.expect_ident()?;
            let optional = self.eat(&TokenKind::Question);
            let ty = if self.eat(&TokenKind::Colon) {
                self.parse_type()?
            } else {
                TypeAnn::Named {
                    name: "any".to_string(),
                    args: Vec::new(),
                }
            };
            params.push(FnTypeParam {
                name,
                ty,
                optional,
                rest,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_type_members(&mut self) -> PResult<Vec<TypeMember>> {
        self.expect(TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let name = self.property_name()?;
            if self.check(&TokenKind::LParen) {
                let params = self.parse_fn_type_params()?;
                self.expect(TokenKind::Colon)?;
                let ret = self.parse_type()?;
                members.push(TypeMember {
                    name,
                    ty: TypeAnn::Function {
                        params,
                        ret: Box::new(ret),
                    },
                    optional: false,
                });
            } else {
                let optional = self.eat(&TokenKind::Question);
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                members.push(TypeMember { name, ty, optional });
            }
            if !self.eat(&TokenKind::Semicolon) && !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(members)
    }

    // ---- expressions ----

    fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(|p| p.parse_assignment_inner())
    }

    fn parse_assignment_inner(&mut self) -> PResult<Expr> {
        if let Some(head) = self.try_arrow_head() {
            return self.parse_arrow_body(head);
        }

        let target = self.parse_conditional()?;
        let op = match self.peek() {
            TokenKind::Assign => AssignOp::Assign,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Sub,
            TokenKind::StarAssign => AssignOp::Mul,
            TokenKind::SlashAssign => AssignOp::Div,
            _ => return Ok(target),
        };
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(SyntaxError::new(
                2364,
                "The left-hand side of an assignment expression must be a variable or a property access.",
                target.span,
            ));
        }
        self.advance();
        let value = self.parse_assignment()?;
        let span = target.span.merge(&value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn try_arrow_head(&mut self) -> Option<ArrowHead> {
        let candidate = match self.peek() {
            TokenKind::Ident(_) => self.peek_at(1) == &TokenKind::Arrow,
            TokenKind::LParen => true,
            TokenKind::Keyword(Keyword::Async) => {
                matches!(self.peek_at(1), TokenKind::Ident(_) | TokenKind::LParen)
            }
            _ => false,
        };
        if !candidate {
            return None;
        }
        let save = self.pos;
        match self.parse_arrow_head() {
            Ok(head) => Some(head),
            Err(_) => {
                self.pos = save;
                None
            }
        }
    }

    fn parse_arrow_head(&mut self) -> PResult<ArrowHead> {
        let start = self.current().span;
        let is_async = if self.check_keyword(Keyword::Async) {
            self.advance();
            true
        } else {
            false
        };
        let params = if let TokenKind::Ident(name) = self.peek().clone() {
            let span = self.advance().span;
            vec![Param {
                pattern: Pattern::Ident(name),
                ty: None,
                default: None,
                optional: false,
                rest: false,
                span,
            }]
        } else {
            self.parse_params()?
        };
        let return_type = if self.check(&TokenKind::Colon) {
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        self.expect(TokenKind::Arrow)?;
        Ok(ArrowHead {
            params,
            is_async,
            return_type,
            start,
        })
    }

    fn parse_arrow_body(&mut self, head: ArrowHead) -> PResult<Expr> {
        let ctx = FnContext {
            is_async: head.is_async,
        };
        let body = if self.check(&TokenKind::LBrace) {
            FunctionBody::Block(self.with_function(ctx, |p| p.parse_block())?)
        } else {
            FunctionBody::Expr(Box::new(self.with_function(ctx, |p| p.parse_assignment())?))
        };
        let span = head.start.merge(&self.prev_span());
        let function = Function {
            name: None,
            params: head.params,
            body: Some(body),
            return_type: head.return_type,
            is_async: head.is_async,
            is_arrow: true,
            span,
        };
        Ok(Expr::new(ExprKind::Function(Arc::new(function)), span))
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_binary(1)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(TokenKind::Colon)?;
        let alternate = self.parse_assignment()?;
        let span = test.span.merge(&alternate.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> PResult<Expr> {
        self.chained(|p| p.parse_binary_chain(min_precedence))
    }

    fn parse_binary_chain(&mut self, min_precedence: u8) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((precedence, op)) = infix_op(self.peek()) {
            if precedence < min_precedence {
                break;
            }
            self.deepen()?;
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let span = left.span.merge(&right.span);
            let kind = match op {
                InfixOp::Binary(op) => ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                InfixOp::Logical(op) => ExprKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
            left = Expr::new(kind, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let start = self.current().span;
        let unary = match self.peek() {
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.nested(|p| p.parse_unary())?;
            let span = start.merge(&operand.span);
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }

        match self.peek() {
            TokenKind::Keyword(Keyword::Typeof) => {
                self.advance();
                let operand = self.nested(|p| p.parse_unary())?;
                let span = start.merge(&operand.span);
                Ok(Expr::new(ExprKind::Typeof(Box::new(operand)), span))
            }
            TokenKind::Keyword(Keyword::Await) => {
                if !self.in_async() {
                    return Err(SyntaxError::new(
                        1308,
                        "'await' expressions are only allowed within async functions.",
                        start,
                    ));
                }
                self.advance();
                let operand = self.nested(|p| p.parse_unary())?;
                let span = start.merge(&operand.span);
                Ok(Expr::new(ExprKind::Await(Box::new(operand)), span))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.advance().kind == TokenKind::PlusPlus {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                let target = self.nested(|p| p.parse_unary())?;
                self.update_expr(op, true, target, start)
            }
            _ => self.parse_postfix(),
        }
    }

    fn update_expr(&self, op: UpdateOp, prefix: bool, target: Expr, start: Span) -> PResult<Expr> {
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(SyntaxError::new(
                2357,
                "The operand of an increment or decrement operator must be a variable or a property access.",
                target.span,
            ));
        }
        let span = start.merge(&self.prev_span());
        Ok(Expr::new(
            ExprKind::Update {
                op,
                prefix,
                target: Box::new(target),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_call_member()?;
        let same_line = self.current().span.line == self.prev_span().line;
        let op = match self.peek() {
            TokenKind::PlusPlus if same_line => UpdateOp::Increment,
            TokenKind::MinusMinus if same_line => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        self.advance();
        let start = expr.span;
        self.update_expr(op, false, expr, start)
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        self.chained(|p| p.parse_call_member_chain())
    }

    fn parse_call_member_chain(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(self.peek(), TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen) {
                self.deepen()?;
            }
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.property_name()?;
                    let span = expr.span.merge(&self.prev_span());
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket)?;
                    let span = expr.span.merge(&self.prev_span());
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    let args = self.parse_arguments()?;
                    let span = expr.span.merge(&self.prev_span());
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_function_expression(&mut self) -> PResult<Expr> {
        let start = self.current().span;
        let is_async = self.eat_keyword(Keyword::Async);
        self.expect(TokenKind::Keyword(Keyword::Function))?;
        let name = match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let function = self.parse_function_rest(name, is_async, start, false)?;
        let span = function.span;
        Ok(Expr::new(ExprKind::Function(Arc::new(function)), span))
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.current().clone();
        let literal = match &token.kind {
            TokenKind::Number(value) => Some(ExprKind::Number(*value)),
            TokenKind::Str(value) => Some(ExprKind::Str(value.clone())),
            TokenKind::Keyword(Keyword::True) => Some(ExprKind::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Some(ExprKind::Bool(false)),
            TokenKind::Keyword(Keyword::Null) => Some(ExprKind::Null),
            TokenKind::Keyword(Keyword::Undefined) => Some(ExprKind::Undefined),
            TokenKind::Ident(name) => Some(ExprKind::Ident(name.clone())),
            _ => None,
        };
        if let Some(kind) = literal {
            self.advance();
            return Ok(Expr::new(kind, token.span));
        }

        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_assignment()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::new(
                    ExprKind::Array(items),
                    token.span.merge(&self.prev_span()),
                ))
            }
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::Keyword(Keyword::Function) => self.parse_function_expression(),
            TokenKind::Keyword(Keyword::Async)
                if self.peek_at(1) == &TokenKind::Keyword(Keyword::Function) =>
            {
                self.parse_function_expression()
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        let start = self.advance().span;
        let mut props = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key_token = self.current().clone();
            let key = self.property_name()?;
            if self.check(&TokenKind::LParen) {
                let method = self.parse_function_rest(Some(key.clone()), false, key_token.span, false)?;
                let span = method.span;
                props.push(Property {
                    key,
                    value: Expr::new(ExprKind::Function(Arc::new(method)), span),
                });
            } else if self.eat(&TokenKind::Colon) {
                let value = self.parse_assignment()?;
                props.push(Property { key, value });
            } else if matches!(key_token.kind, TokenKind::Ident(_)) {
                props.push(Property {
                    value: Expr::new(ExprKind::Ident(key.clone()), key_token.span),
                    key,
                });
            } else {
                return Err(self.expected(":"));
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(
            ExprKind::Object(props),
            start.merge(&self.prev_span()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_script(source: &str) -> Program {
        parse(source, Dialect::Script).expect("script should parse")
    }

    fn parse_typed(source: &str) -> Program {
        parse(source, Dialect::Typed).expect("typed source should parse")
    }

    fn first_function(program: &Program) -> Arc<Function> {
        for stmt in &program.body {
            match stmt {
                Stmt::Function(function) => return function.clone(),
                Stmt::Export(ModuleExport::Declaration(decl)) => {
                    if let Stmt::Function(function) = decl.as_ref() {
                        return function.clone();
                    }
                }
                _ => {}
            }
        }
        panic!("no function in program");
    }

    #[test]
    fn test_parse_exported_function() {
        let program = parse_script("export function add(left, right) { return left + right; }");
        let function = first_function(&program);
        assert_eq!(function.name.as_deref(), Some("add"));
        let names: Vec<_> = function.params.iter().filter_map(|p| p.simple_name()).collect();
        assert_eq!(names, vec!["left", "right"]);
        assert!(!function.is_async);
    }

    #[test]
    fn test_parse_destructured_and_default_params() {
        let program = parse_script("function g({x}, y = 1, ...rest) { return x; }");
        let function = first_function(&program);
        assert!(matches!(function.params[0].pattern, Pattern::Object(_)));
        assert!(function.params[1].default.is_some());
        assert!(function.params[2].rest);
    }

    #[test]
    fn test_parse_arrow_functions() {
        let program = parse_script(
            "const f = (a, b) => a * b;\nconst g = async x => { return x; };\nconst h = (1 + 2);",
        );
        assert_eq!(program.body.len(), 3);
        let Stmt::Var { decls, .. } = &program.body[1] else {
            panic!("expected declaration");
        };
        let Some(Expr {
            kind: ExprKind::Function(function),
            ..
        }) = &decls[0].init
        else {
            panic!("expected arrow");
        };
        assert!(function.is_async && function.is_arrow);
    }

    #[test]
    fn test_conditional_with_parenthesized_branch_is_not_an_arrow() {
        let program = parse_typed("const x = true ? (1) : 2;");
        let Stmt::Var { decls, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            decls[0].init.as_ref().map(|e| &e.kind),
            Some(ExprKind::Conditional { .. })
        ));
    }

    #[test]
    fn test_parse_typed_overloads_and_aliases() {
        let program = parse_typed(
            "type Pair = [number, string];\n\
             interface Point { x: number; y?: number }\n\
             export function f(a: number): number;\n\
             export function f(a: any): any { return a; }\n\
             declare function g(x: string): void;",
        );
        assert!(matches!(program.body[0], Stmt::TypeAlias { .. }));
        assert!(matches!(program.body[1], Stmt::Interface { .. }));
        let overload = first_function(&program);
        assert!(!overload.has_body());
        assert_eq!(
            overload.return_type,
            Some(TypeAnn::Named {
                name: "number".to_string(),
                args: vec![]
            })
        );
    }

    #[test]
    fn test_parse_union_array_and_generic_types() {
        let program = parse_typed("let x: Promise<string | number[]> = undefined;");
        let Stmt::Var { decls, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(TypeAnn::Named { name, args }) = &decls[0].ty else {
            panic!("expected named type");
        };
        assert_eq!(name, "Promise");
        assert!(matches!(args[0], TypeAnn::Union(_)));
    }

    #[test]
    fn test_parse_imports_and_exports() {
        let program = parse_script(
            "import helper, { a, b as c } from './lib';\n\
             import * as ns from 'pkg';\n\
             export { a as default };\n\
             export default function () {}\n\
             export = helper;",
        );
        let Stmt::Import(import) = &program.body[0] else {
            panic!("expected import");
        };
        assert_eq!(import.default.as_deref(), Some("helper"));
        assert_eq!(import.named.len(), 2);
        assert_eq!(import.named[1].local, "c");
        assert!(matches!(
            program.body[2],
            Stmt::Export(ModuleExport::Named { .. })
        ));
        assert!(matches!(
            program.body[4],
            Stmt::Export(ModuleExport::Assign { .. })
        ));
    }

    #[test]
    fn test_type_annotations_rejected_in_script_dialect() {
        let errors = parse("function f(a: number) {}", Dialect::Script).unwrap_err();
        assert!(errors.iter().any(|e| e.code == 8010));
    }

    #[test]
    fn test_await_outside_async_is_an_error() {
        let errors = parse("function f(p) { return await p; }", Dialect::Script).unwrap_err();
        assert_eq!(errors[0].code, 1308);
    }

    #[test]
    fn test_errors_recover_at_statement_boundaries() {
        let errors = parse("let = 1;\nlet ok = 2;\nconst missing;", Dialect::Script).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].span.line, 1);
        assert_eq!(errors[1].code, 1155);
    }

    #[test]
    fn test_asi_on_newlines() {
        let program = parse_script("let a = 1\nlet b = a + 1\nb++");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_object_literals() {
        let program = parse_script("const o = { a: 1, b, 'c': 2, d(x) { return x; }, default: 3 };");
        let Stmt::Var { decls, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr {
            kind: ExprKind::Object(props),
            ..
        }) = &decls[0].init
        else {
            panic!("expected object");
        };
        let keys: Vec<_> = props.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d", "default"]);
    }

    #[test]
    fn test_nesting_beyond_limit_is_a_diagnostic() {
        let chain = format!("export const v = 1{};", " + 1".repeat(5000));
        let errors = parse(&chain, Dialect::Script).unwrap_err();
        assert_eq!(errors[0].code, NESTING_ERROR_CODE);
        assert_eq!(errors[0].message, "Expression nested too deeply.");

        let parens = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let errors = parse(&parens, Dialect::Script).unwrap_err();
        assert!(errors.iter().any(|e| e.code == NESTING_ERROR_CODE));

        let types = format!("let t: {}number{};", "Array<".repeat(400), ">".repeat(400));
        assert!(parse(&types, Dialect::Typed).is_err());
    }

    #[test]
    fn test_nesting_within_limit_parses() {
        parse_script(&format!("export const v = 1{};", " + 1".repeat(200)));
        parse_script(&format!("export const v = {}1{};", "(".repeat(100), ")".repeat(100)));
        parse_script(&format!("export const v = {}x;", "!".repeat(100)));
    }
}
