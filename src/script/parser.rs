//! Recursive descent parser producing [`ast::Module`].

use std::rc::Rc;

use super::ast::{
    BinOp, BoolOp, ClassDef, CmpOp, Const, Expr, ExprKind, FunctionDef, Handler, Keyword, Module,
    Param, Stmt, StmtKind, UnaryOp,
};
use super::lexer::{tokenize, Tok, Token};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}:{col}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

/// Parse a whole source file.
pub fn parse_module(
    source: &str,
    name: impl Into<String>,
    file: impl Into<String>,
) -> Result<Module, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    parser.skip_newlines();
    while !parser.at(&Tok::Eof) {
        body.extend(parser.statement()?);
        parser.skip_newlines();
    }
    Ok(Module {
        name: name.into(),
        file: file.into(),
        body,
    })
}

/// Parse a single expression.
pub fn parse_expr(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr_list()?;
    parser.skip_newlines();
    if !parser.at(&Tok::Eof) {
        return Err(parser.unexpected("end of input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_tok(&self) -> &Tok {
        &self.peek().tok
    }

    fn peek_second(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek_tok() == tok
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(self.peek_tok(), Tok::Punct(q) if *q == p)
    }

    fn at_keyword(&self, k: &str) -> bool {
        matches!(self.peek_tok(), Tok::Keyword(q) if *q == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.at_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ParseError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{p}'")))
        }
    }

    fn expect_keyword(&mut self, k: &str) -> Result<(), ParseError> {
        if self.eat_keyword(k) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{k}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek_tok().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if self.at(&Tok::Newline) {
            self.advance();
            Ok(())
        } else if self.at(&Tok::Eof) || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(&Tok::Newline) {
            self.advance();
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = match &token.tok {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Keyword(k) => format!("'{k}'"),
            Tok::Punct(p) => format!("'{p}'"),
            Tok::Int(n) => n.to_string(),
            Tok::Float(x) => x.to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Bytes(_) => "bytes".to_string(),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        ParseError::new(
            format!("expected {expected}, found {found}"),
            token.line,
            token.col,
        )
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// One logical line may hold several `;`-separated simple statements.
    fn statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let line = self.line();
        if self.at_punct("@") {
            return Ok(vec![self.decorated()?]);
        }
        let compound = match self.peek_tok() {
            Tok::Keyword("def") => Some(self.def(Vec::new())?),
            Tok::Keyword("class") => Some(self.class(Vec::new())?),
            Tok::Keyword("if") => Some(self.if_stmt()?),
            Tok::Keyword("while") => Some(self.while_stmt()?),
            Tok::Keyword("for") => Some(self.for_stmt()?),
            Tok::Keyword("try") => Some(self.try_stmt()?),
            _ => None,
        };
        if let Some(kind) = compound {
            return Ok(vec![Stmt { kind, line }]);
        }

        let mut stmts = vec![self.simple_statement()?];
        while self.eat_punct(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek_tok() {
            Tok::Keyword("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Keyword("break") => {
                self.advance();
                StmtKind::Break
            }
            Tok::Keyword("continue") => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Keyword("return") => {
                self.advance();
                if self.at_end_of_simple() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr_list()?))
                }
            }
            Tok::Keyword("raise") => {
                self.advance();
                if self.at_end_of_simple() {
                    StmtKind::Raise(None)
                } else {
                    StmtKind::Raise(Some(self.expr()?))
                }
            }
            Tok::Keyword("import") => {
                self.advance();
                let module = self.dotted_name()?;
                let alias = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                StmtKind::Import { module, alias }
            }
            Tok::Keyword("from") => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_keyword("import")?;
                let parenthesized = self.eat_punct("(");
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name()?;
                    let alias = if self.eat_keyword("as") {
                        Some(self.expect_name()?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat_punct(",") || (parenthesized && self.at_punct(")")) {
                        break;
                    }
                }
                if parenthesized {
                    self.expect_punct(")")?;
                }
                StmtKind::FromImport { module, names }
            }
            _ => self.expr_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn at_end_of_simple(&self) -> bool {
        matches!(self.peek_tok(), Tok::Newline | Tok::Eof | Tok::Punct(";"))
    }

    fn expr_statement(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.expr_list()?;
        if self.eat_punct("=") {
            check_target(&first)?;
            let value = self.expr_list()?;
            if self.at_punct("=") {
                return Err(self.unexpected("end of line (chained assignment)"));
            }
            return Ok(StmtKind::Assign {
                target: first,
                value,
            });
        }

        let aug = match self.peek_tok() {
            Tok::Punct("+=") => Some(BinOp::Add),
            Tok::Punct("-=") => Some(BinOp::Sub),
            Tok::Punct("*=") => Some(BinOp::Mul),
            Tok::Punct("/=") => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            check_target(&first)?;
            if matches!(first.kind, ExprKind::Tuple(_)) {
                return Err(ParseError::new(
                    "augmented assignment to a tuple",
                    first.line,
                    0,
                ));
            }
            let value = self.expr()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_name()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct(":")?;
        if !self.at(&Tok::Newline) {
            // Single-line suite: `if x: return 1`
            let mut stmts = vec![self.simple_statement()?];
            while self.eat_punct(";") {
                if self.at(&Tok::Newline) {
                    break;
                }
                stmts.push(self.simple_statement()?);
            }
            self.expect_newline()?;
            return Ok(stmts);
        }
        self.advance();
        self.skip_newlines();
        if !self.at(&Tok::Indent) {
            return Err(self.unexpected("an indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(&Tok::Dedent) {
                self.advance();
                break;
            }
            if self.at(&Tok::Eof) {
                break;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    fn decorated(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let mut decorators = Vec::new();
        while self.eat_punct("@") {
            decorators.push(self.expr()?);
            self.expect_newline()?;
            self.skip_newlines();
        }
        let kind = if self.at_keyword("def") {
            self.def(decorators)?
        } else if self.at_keyword("class") {
            self.class(decorators)?
        } else {
            return Err(self.unexpected("'def' or 'class' after decorator"));
        };
        Ok(Stmt { kind, line })
    }

    fn def(&mut self, decorators: Vec<Expr>) -> Result<StmtKind, ParseError> {
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_punct("(")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at_punct(")") {
            let param_name = self.expect_name()?;
            let default = if self.eat_punct("=") {
                Some(self.expr()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.unexpected("a default value"));
            }
            if params.iter().any(|p| p.name == param_name) {
                return Err(ParseError::new(
                    format!("duplicate parameter '{param_name}'"),
                    self.line(),
                    0,
                ));
            }
            params.push(Param {
                name: param_name,
                default,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        if self.eat_punct("->") {
            // Return annotations are accepted and ignored.
            self.expr()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Rc::new(FunctionDef {
            name,
            params,
            body,
            decorators,
        })))
    }

    fn class(&mut self, decorators: Vec<Expr>) -> Result<StmtKind, ParseError> {
        self.expect_keyword("class")?;
        let name = self.expect_name()?;
        if self.eat_punct("(") {
            // Base classes are not supported; allow an empty list.
            self.expect_punct(")")?;
        }
        let body = self.block()?;
        Ok(StmtKind::Class(Rc::new(ClassDef {
            name,
            body,
            decorators,
        })))
    }

    fn if_stmt(&mut self) -> Result<StmtKind, ParseError> {
        // Shared by `if` and `elif`.
        self.advance();
        let test = self.expr()?;
        let body = self.block()?;
        self.skip_newlines();
        let orelse = if self.at_keyword("elif") {
            let line = self.line();
            vec![Stmt {
                kind: self.if_stmt()?,
                line,
            }]
        } else if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("while")?;
        let test = self.expr()?;
        let body = self.block()?;
        Ok(StmtKind::While { test, body })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("for")?;
        let line = self.line();
        let mut targets = vec![self.postfix()?];
        while self.eat_punct(",") {
            targets.push(self.postfix()?);
        }
        let target = if targets.len() == 1 {
            targets.remove(0)
        } else {
            Expr::new(ExprKind::Tuple(targets), line)
        };
        check_target(&target)?;
        self.expect_keyword("in")?;
        let iter = self.expr_list()?;
        let body = self.block()?;
        Ok(StmtKind::For { target, iter, body })
    }

    fn try_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("try")?;
        let body = self.block()?;
        self.skip_newlines();
        let mut handlers = Vec::new();
        while self.at_keyword("except") {
            let line = self.line();
            self.advance();
            let kind = match self.peek_tok() {
                Tok::Name(_) => Some(self.expect_name()?),
                _ => None,
            };
            let name = if self.eat_keyword("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(Handler {
                kind,
                name,
                body,
                line,
            });
            self.skip_newlines();
        }
        if handlers.is_empty() {
            return Err(self.unexpected("'except'"));
        }
        Ok(StmtKind::Try { body, handlers })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// `a, b` forms a tuple; a single expression stays as is.
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let first = self.expr()?;
        if !self.at_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.at_end_of_expr_list() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn at_end_of_expr_list(&self) -> bool {
        matches!(
            self.peek_tok(),
            Tok::Newline | Tok::Eof | Tok::Punct("=") | Tok::Punct(")") | Tok::Punct(":")
        )
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let body = self.or_expr()?;
        if self.at_keyword("if") {
            self.advance();
            let test = self.or_expr()?;
            self.expect_keyword("else")?;
            let orelse = self.expr()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            let line = self.line();
            self.advance();
            let right = self.and_expr()?;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            let line = self.line();
            self.advance();
            let right = self.not_expr()?;
            left = Expr::new(
                ExprKind::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("not") {
            let line = self.line();
            self.advance();
            let operand = self.not_expr()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek_tok() {
                Tok::Punct("==") => CmpOp::Eq,
                Tok::Punct("!=") => CmpOp::NotEq,
                Tok::Punct("<") => CmpOp::Lt,
                Tok::Punct("<=") => CmpOp::LtE,
                Tok::Punct(">") => CmpOp::Gt,
                Tok::Punct(">=") => CmpOp::GtE,
                Tok::Keyword("in") => CmpOp::In,
                Tok::Keyword("is") => {
                    if matches!(self.peek_second(), Tok::Keyword("not")) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Keyword("not") if matches!(self.peek_second(), Tok::Keyword("in")) => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            line,
        ))
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Punct("+") => BinOp::Add,
                Tok::Punct("-") => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.term()?;
            left = binop(left, op, right, line);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Punct("*") => BinOp::Mul,
                Tok::Punct("/") => BinOp::Div,
                Tok::Punct("//") => BinOp::FloorDiv,
                Tok::Punct("%") => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.advance();
            let right = self.factor()?;
            left = binop(left, op, right, line);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let op = match self.peek_tok() {
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.factor()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                line,
            ));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.at_punct("**") {
            let line = self.line();
            self.advance();
            // Right associative, binds tighter than unary minus on the left.
            let exponent = self.factor()?;
            return Ok(binop(base, BinOp::Pow, exponent, line));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            let line = self.line();
            if self.eat_punct("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    },
                    line,
                );
            } else if self.eat_punct("[") {
                let index = self.subscript()?;
                self.expect_punct("]")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_punct(".") {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    line,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<Keyword> = Vec::new();
        while !self.at_punct(")") {
            let is_keyword =
                matches!(self.peek_tok(), Tok::Name(_)) && matches!(self.peek_second(), Tok::Punct("="));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_punct("=")?;
                if kwargs.iter().any(|k| k.name == name) {
                    return Err(ParseError::new(
                        format!("keyword argument repeated: {name}"),
                        self.line(),
                        0,
                    ));
                }
                kwargs.push(Keyword {
                    name,
                    value: self.expr()?,
                });
            } else {
                if !kwargs.is_empty() {
                    return Err(self.unexpected("keyword argument (positional follows keyword)"));
                }
                args.push(self.expr()?);
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let lower = if self.at_punct(":") {
            None
        } else {
            Some(self.expr()?)
        };
        if !self.eat_punct(":") {
            return lower.ok_or_else(|| self.unexpected("index"));
        }
        let upper = if self.at_punct("]") {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper,
            },
            line,
        ))
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let token = self.peek().clone();
        let kind = match token.tok {
            Tok::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Tok::Int(n) => {
                self.advance();
                ExprKind::Const(Const::Int(n))
            }
            Tok::Float(x) => {
                self.advance();
                ExprKind::Const(Const::Float(x))
            }
            Tok::Str(_) => {
                // Adjacent string literals concatenate.
                let mut text = String::new();
                while let Tok::Str(s) = self.peek_tok().clone() {
                    text.push_str(&s);
                    self.advance();
                }
                ExprKind::Const(Const::Str(text))
            }
            Tok::Bytes(b) => {
                self.advance();
                ExprKind::Const(Const::Bytes(b))
            }
            Tok::Keyword("None") => {
                self.advance();
                ExprKind::Const(Const::None)
            }
            Tok::Keyword("True") => {
                self.advance();
                ExprKind::Const(Const::Bool(true))
            }
            Tok::Keyword("False") => {
                self.advance();
                ExprKind::Const(Const::Bool(false))
            }
            Tok::Punct("(") => {
                self.advance();
                if self.eat_punct(")") {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.expr()?;
                    if self.eat_punct(")") {
                        return Ok(first);
                    }
                    let mut items = vec![first];
                    while self.eat_punct(",") {
                        if self.at_punct(")") {
                            break;
                        }
                        items.push(self.expr()?);
                    }
                    self.expect_punct(")")?;
                    ExprKind::Tuple(items)
                }
            }
            Tok::Punct("[") => {
                self.advance();
                let items = self.sequence("]")?;
                ExprKind::List(items)
            }
            Tok::Punct("{") => {
                self.advance();
                self.brace_display()?
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, line))
    }

    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.at_punct(close) {
            items.push(self.expr()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(close)?;
        Ok(items)
    }

    /// `{}` is an empty dict; `{a: b}` a dict; `{a, b}` a set.
    fn brace_display(&mut self) -> Result<ExprKind, ParseError> {
        if self.eat_punct("}") {
            return Ok(ExprKind::Dict(Vec::new()));
        }
        let first = self.expr()?;
        if self.eat_punct(":") {
            let mut entries = vec![(first, self.expr()?)];
            while self.eat_punct(",") {
                if self.at_punct("}") {
                    break;
                }
                let key = self.expr()?;
                self.expect_punct(":")?;
                entries.push((key, self.expr()?));
            }
            self.expect_punct("}")?;
            return Ok(ExprKind::Dict(entries));
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            if self.at_punct("}") {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect_punct("}")?;
        Ok(ExprKind::Set(items))
    }
}

fn binop(left: Expr, op: BinOp, right: Expr, line: u32) -> Expr {
    Expr::new(
        ExprKind::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        line,
    )
}

fn check_target(target: &Expr) -> Result<(), ParseError> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().try_for_each(check_target),
        _ => Err(ParseError::new("cannot assign to expression", target.line, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source, "wf", "wf.flow").unwrap()
    }

    #[test]
    fn parses_function_with_defaults() {
        let module = parse("def f(a, b=2):\n    return a + b\n");
        let StmtKind::Def(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
    }

    #[test]
    fn parses_keyword_arguments() {
        let expr = parse_expr("f(1, x=2)").unwrap();
        let ExprKind::Call { args, kwargs, .. } = expr.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].name, "x");
    }

    #[test]
    fn parses_chained_calls() {
        let expr = parse_expr("x().y().z()").unwrap();
        let ExprKind::Call { func, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(func.kind, ExprKind::Attribute { ref attr, .. } if attr == "z"));
    }

    #[test]
    fn parses_if_elif_else() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn parses_decorated_def() {
        let module = parse("@activity\ndef fetch(x):\n    return x\n");
        let StmtKind::Def(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(def.decorators.len(), 1);
    }

    #[test]
    fn parses_try_except() {
        let module = parse("try:\n    f()\nexcept ValueError as e:\n    pass\nexcept:\n    pass\n");
        let StmtKind::Try { handlers, .. } = &module.body[0].kind else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].kind.as_deref(), Some("ValueError"));
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
    }

    #[test]
    fn parses_tuple_unpacking_in_for() {
        let module = parse("for k, v in d.items():\n    pass\n");
        let StmtKind::For { target, .. } = &module.body[0].kind else {
            panic!("expected for");
        };
        assert!(matches!(target.kind, ExprKind::Tuple(ref items) if items.len() == 2));
    }

    #[test]
    fn brace_displays() {
        assert!(matches!(parse_expr("{}").unwrap().kind, ExprKind::Dict(_)));
        assert!(matches!(parse_expr("{1, 2}").unwrap().kind, ExprKind::Set(_)));
        assert!(matches!(parse_expr("{'a': 1}").unwrap().kind, ExprKind::Dict(_)));
    }

    #[test]
    fn reports_position_of_syntax_errors() {
        let err = parse_module("x = (1,\n", "wf", "wf.flow").unwrap_err();
        assert!(err.message.contains("expected"));
        let err = parse_module("def f(:\n    pass\n", "wf", "wf.flow").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn rejects_assignment_to_call() {
        assert!(parse_module("f() = 1\n", "wf", "wf.flow").is_err());
    }
}
