//! Minimal hand-written recursive-descent front end, turning `.metac`
//! source text into the flat [`Layout`] the reader expects.
//!
//! The parser builds real `Node`s directly into the shared arena — exactly
//! the shape a contributed-from-meta node already has — then writes just
//! the top-level declarations to a [`LayoutWriter`] followed by one final
//! reduce marker. Nested structure doesn't need its own layout entries: a
//! declaration's children are already ordinary `NodeId` fields on it, and
//! the reader only ever looks one level deep into the flat stream.

use crate::ast::*;
use crate::context::CompilerContext;
use crate::error::{error, ErrorReported};
use crate::ident::Symbol;
use crate::layout::{Layout, LayoutWriter};
use crate::pos::{FileId, RawIndex, Span};

/// Registers `source` under `filename` and parses it directly into a flat
/// layout, ready for [`crate::reader::structure_compilation_unit`].
pub fn parse_source(ctx: &mut CompilerContext, filename: &str, source: &[u8]) -> Result<(FileId, Layout), ErrorReported> {
    let file_id = ctx.files.add(filename, source);
    let text = std::str::from_utf8(source).map_err(|_| ErrorReported::silent())?;
    let layout = parse_layout(ctx, file_id, text)?;
    Ok((file_id, layout))
}

/// Parses already-registered source text into a flat layout. Exposed
/// separately from [`parse_source`] for callers (tests, `structure_meta_unit`
/// reuse) that already hold a `FileId`.
pub fn parse_layout(ctx: &mut CompilerContext, file_id: FileId, text: &str) -> Result<Layout, ErrorReported> {
    let tokens = lex(ctx, file_id, text)?;
    let mut parser = Parser { ctx, tokens, pos: 0 };
    let decls = parser.parse_program()?;

    // Only the top-level declarations themselves go in the layout — each
    // one is already a complete subtree (its children are ordinary `NodeId`
    // fields), and the reader's cursor only ever looks one level deep.
    let mut writer = LayoutWriter::new();
    for decl in &decls {
        writer.direct_write(*decl);
    }
    writer.mark_reduce();
    Ok(writer.build())
}

// -------------------------------------------------------------------------
// Lexer
// -------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    Ident(Symbol),
    Int(i32),
    True,
    False,
    KwInt,
    KwVoid,
    KwConst,
    KwMeta,
    KwIf,
    KwElse,
    KwReturn,
    KwCalc,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Lt,
    Gt,
    Comma,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    LtEq,
    Eof,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    span: Span,
}

fn lex(ctx: &mut CompilerContext, file_id: FileId, text: &str) -> Result<Vec<Tok>, ErrorReported> {
    let bytes = text.as_bytes();
    let mut i = 0usize;
    let mut out = Vec::new();
    let mut flag = crate::error::ErrorFlag::new();

    let span_at = |start: usize, end: usize| Span::new(file_id, start as RawIndex, end as RawIndex);

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == '/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            let text = &text[start..i];
            match text.parse::<i32>() {
                Ok(value) => out.push(Tok { kind: TokKind::Int(value), span: span_at(start, i) }),
                Err(_) => {
                    flag.set(error!(ctx.diagnostics, ConversionFailure { span: span_at(start, i) }));
                    out.push(Tok { kind: TokKind::Int(0), span: span_at(start, i) });
                }
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &text[start..i];
            let span = span_at(start, i);
            let kind = match word {
                "int" => TokKind::KwInt,
                "void" => TokKind::KwVoid,
                "const" => TokKind::KwConst,
                "meta" => TokKind::KwMeta,
                "if" => TokKind::KwIf,
                "else" => TokKind::KwElse,
                "return" => TokKind::KwReturn,
                "calc" => TokKind::KwCalc,
                "true" => TokKind::True,
                "false" => TokKind::False,
                _ => TokKind::Ident(ctx.interner.intern(word)),
            };
            out.push(Tok { kind, span });
            continue;
        }
        let two = bytes.get(i + 1).copied();
        let (kind, len) = match (c, two) {
            ('=', Some(b'=')) => (TokKind::EqEq, 2),
            ('!', Some(b'=')) => (TokKind::NotEq, 2),
            ('<', Some(b'=')) => (TokKind::LtEq, 2),
            ('(', _) => (TokKind::LParen, 1),
            (')', _) => (TokKind::RParen, 1),
            ('{', _) => (TokKind::LBrace, 1),
            ('}', _) => (TokKind::RBrace, 1),
            ('<', _) => (TokKind::Lt, 1),
            ('>', _) => (TokKind::Gt, 1),
            (',', _) => (TokKind::Comma, 1),
            (';', _) => (TokKind::Semi, 1),
            ('=', _) => (TokKind::Assign, 1),
            ('+', _) => (TokKind::Plus, 1),
            ('-', _) => (TokKind::Minus, 1),
            ('*', _) => (TokKind::Star, 1),
            ('/', _) => (TokKind::Slash, 1),
            ('%', _) => (TokKind::Percent, 1),
            _ => {
                flag.set(error!(ctx.diagnostics, Syntactic { span: span_at(i, i + 1), expected: vec![] }));
                (TokKind::Eof, 1)
            }
        };
        out.push(Tok { kind, span: span_at(i, i + len) });
        i += len;
    }
    let eof_span = span_at(bytes.len(), bytes.len());
    out.push(Tok { kind: TokKind::Eof, span: eof_span });
    flag.into_result(out)
}

/// Lexes `text` and returns a `(kind, represents)` pair per token, for the
/// `-emit-tokens` dump — run independently of `parse_layout` so a lex-only
/// request never builds any `Node`s.
pub fn dump_tokens(ctx: &mut CompilerContext, file_id: FileId, text: &str) -> Result<Vec<(&'static str, Option<String>)>, ErrorReported> {
    let tokens = lex(ctx, file_id, text)?;
    Ok(tokens.iter().map(|t| (tok_kind_name(&t.kind), tok_represents(ctx, &t.kind))).collect())
}

fn tok_kind_name(kind: &TokKind) -> &'static str {
    match kind {
        TokKind::Ident(_) => "Ident",
        TokKind::Int(_) => "Int",
        TokKind::True => "True",
        TokKind::False => "False",
        TokKind::KwInt => "KwInt",
        TokKind::KwVoid => "KwVoid",
        TokKind::KwConst => "KwConst",
        TokKind::KwMeta => "KwMeta",
        TokKind::KwIf => "KwIf",
        TokKind::KwElse => "KwElse",
        TokKind::KwReturn => "KwReturn",
        TokKind::KwCalc => "KwCalc",
        TokKind::LParen => "LParen",
        TokKind::RParen => "RParen",
        TokKind::LBrace => "LBrace",
        TokKind::RBrace => "RBrace",
        TokKind::Lt => "Lt",
        TokKind::Gt => "Gt",
        TokKind::Comma => "Comma",
        TokKind::Semi => "Semi",
        TokKind::Assign => "Assign",
        TokKind::Plus => "Plus",
        TokKind::Minus => "Minus",
        TokKind::Star => "Star",
        TokKind::Slash => "Slash",
        TokKind::Percent => "Percent",
        TokKind::EqEq => "EqEq",
        TokKind::NotEq => "NotEq",
        TokKind::LtEq => "LtEq",
        TokKind::Eof => "Eof",
    }
}

fn tok_represents(ctx: &CompilerContext, kind: &TokKind) -> Option<String> {
    match kind {
        TokKind::Ident(sym) => Some(ctx.interner.resolve(*sym).to_owned()),
        TokKind::Int(value) => Some(value.to_string()),
        _ => None,
    }
}

// -------------------------------------------------------------------------
// Parser
// -------------------------------------------------------------------------

struct Parser<'a> {
    ctx: &'a mut CompilerContext,
    tokens: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokKind { &self.tokens[self.pos].kind }
    fn peek_at(&self, offset: usize) -> &TokKind {
        self.tokens.get(self.pos + offset).map(|t| &t.kind).unwrap_or(&TokKind::Eof)
    }
    fn span(&self) -> Span { self.tokens[self.pos].span }

    fn bump(&mut self) -> Tok {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokKind, what: &str) -> Result<Tok, ErrorReported> {
        if self.peek() == kind {
            Ok(self.bump())
        } else {
            Err(error!(self.ctx.diagnostics, Syntactic { span: self.span(), expected: vec![what.to_owned()] }))
        }
    }

    fn expect_ident(&mut self) -> Result<crate::ident::Identifier, ErrorReported> {
        match self.peek().clone() {
            TokKind::Ident(sym) => {
                let span = self.span();
                self.bump();
                Ok(crate::ident::identifier(span, sym))
            }
            _ => Err(error!(self.ctx.diagnostics, Syntactic { span: self.span(), expected: vec!["identifier".to_owned()] })),
        }
    }

    // -- top level --------------------------------------------------------

    fn parse_program(&mut self) -> Result<Vec<NodeId>, ErrorReported> {
        let mut decls = Vec::new();
        let mut flag = crate::error::ErrorFlag::new();
        while *self.peek() != TokKind::Eof {
            match self.parse_top_decl() {
                Ok(id) => decls.push(id),
                Err(e) => {
                    flag.set(e);
                    self.skip_to_recovery_point();
                }
            }
        }
        flag.into_result(decls)
    }

    /// After a top-level parse error, skips forward to the next token that
    /// plausibly starts a new top-level declaration, so one bad declaration
    /// doesn't cascade into spurious errors for the rest of the file.
    fn skip_to_recovery_point(&mut self) {
        while *self.peek() != TokKind::Eof {
            match self.peek() {
                TokKind::KwInt | TokKind::KwVoid | TokKind::KwConst | TokKind::KwMeta => return,
                _ => { self.bump(); }
            }
        }
    }

    fn parse_top_decl(&mut self) -> Result<NodeId, ErrorReported> {
        match self.peek().clone() {
            TokKind::KwConst => self.parse_global_constant(),
            TokKind::KwMeta => self.parse_meta_decl(),
            TokKind::KwInt | TokKind::KwVoid => self.parse_function_decl(),
            _ => Err(error!(self.ctx.diagnostics, Syntactic {
                span: self.span(),
                expected: vec!["a declaration".to_owned()],
            })),
        }
    }

    fn parse_global_constant(&mut self) -> Result<NodeId, ErrorReported> {
        self.expect(&TokKind::KwConst, "const")?;
        self.expect(&TokKind::KwInt, "int")?;
        let name = self.expect_ident()?;
        self.expect(&TokKind::Assign, "=")?;
        let value = self.parse_constant_expr()?;
        self.expect(&TokKind::Semi, ";")?;
        Ok(self.ctx.ast.alloc(Node::GlobalConstantDecl(GlobalConstantDecl {
            name,
            def_id: None,
            value,
            containing_unit: None,
        })))
    }

    fn parse_constant_expr(&mut self) -> Result<NodeId, ErrorReported> {
        match self.peek().clone() {
            TokKind::Int(value) => {
                let span = self.span();
                self.bump();
                Ok(self.ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span, value })))
            }
            TokKind::True | TokKind::False => {
                let value = *self.peek() == TokKind::True;
                let span = self.span();
                self.bump();
                Ok(self.ctx.ast.alloc(Node::BooleanLiteralExpr(BooleanLiteralExpr { span, value })))
            }
            _ => Err(error!(self.ctx.diagnostics, Syntactic {
                span: self.span(),
                expected: vec!["an integer or boolean literal".to_owned()],
            })),
        }
    }

    fn parse_function_decl(&mut self) -> Result<NodeId, ErrorReported> {
        let has_return = match self.peek() {
            TokKind::KwInt => true,
            TokKind::KwVoid => false,
            _ => unreachable!("caller checked the leading keyword"),
        };
        self.bump();
        let name = self.expect_ident()?;
        self.expect(&TokKind::LParen, "(")?;
        let args = self.parse_param_list()?;
        self.expect(&TokKind::RParen, ")")?;
        let return_arg = if has_return {
            Some(self.ctx.ast.alloc(Node::AnonymousArgumentDecl(AnonymousArgumentDecl { span: name.span })))
        } else {
            None
        };
        let body = self.parse_unscoped_block()?;
        Ok(self.ctx.ast.alloc(Node::FunctionDecl(FunctionDecl {
            name,
            def_id: None,
            args,
            return_arg,
            body,
            containing_unit: None,
        })))
    }

    fn parse_param_list(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        let mut args = Vec::new();
        if *self.peek() != TokKind::RParen {
            loop {
                args.push(self.parse_param()?);
                if *self.peek() == TokKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span, args })))
    }

    fn parse_param(&mut self) -> Result<NodeId, ErrorReported> {
        let kw_span = self.span();
        self.expect(&TokKind::KwInt, "int")?;
        if let TokKind::Ident(sym) = self.peek().clone() {
            let span = self.span();
            self.bump();
            Ok(self.ctx.ast.alloc(Node::NamedArgumentDecl(NamedArgumentDecl {
                name: crate::ident::identifier(span, sym),
                def_id: None,
            })))
        } else {
            Ok(self.ctx.ast.alloc(Node::AnonymousArgumentDecl(AnonymousArgumentDecl { span: kw_span })))
        }
    }

    // -- meta declarations --------------------------------------------------

    fn parse_meta_decl(&mut self) -> Result<NodeId, ErrorReported> {
        self.expect(&TokKind::KwMeta, "meta")?;
        let name = self.expect_ident()?;
        self.expect(&TokKind::Lt, "<")?;
        let args = self.parse_param_list_angled()?;
        self.expect(&TokKind::Gt, ">")?;
        let body = self.parse_meta_contribution()?;
        Ok(self.ctx.ast.alloc(Node::MetaDecl(MetaDecl {
            name,
            def_id: None,
            args,
            body,
            containing_unit: None,
        })))
    }

    fn parse_param_list_angled(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        let mut args = Vec::new();
        if *self.peek() != TokKind::Gt {
            loop {
                args.push(self.parse_param()?);
                if *self.peek() == TokKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span, args })))
    }

    fn parse_meta_contribution(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        self.expect(&TokKind::LBrace, "{")?;
        let mut children = Vec::new();
        while *self.peek() != TokKind::RBrace {
            children.push(self.parse_contribution_item()?);
        }
        self.expect(&TokKind::RBrace, "}")?;
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::MetaContribution(MetaContribution { span, children })))
    }

    fn parse_contribution_item(&mut self) -> Result<NodeId, ErrorReported> {
        match self.peek().clone() {
            TokKind::KwMeta => match self.peek_at(1).clone() {
                TokKind::KwIf => self.parse_meta_if(),
                TokKind::KwCalc => self.parse_meta_calc(),
                _ => self.parse_meta_decl(),
            },
            _ => self.parse_top_decl(),
        }
    }

    fn parse_meta_if(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        self.expect(&TokKind::KwMeta, "meta")?;
        self.expect(&TokKind::KwIf, "if")?;
        self.expect(&TokKind::LParen, "(")?;
        let cond = self.parse_expr()?;
        self.expect(&TokKind::RParen, ")")?;
        let then_branch = self.parse_meta_contribution()?;
        let else_branch = if *self.peek() == TokKind::KwElse {
            self.bump();
            Some(self.parse_meta_contribution()?)
        } else {
            None
        };
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::MetaIfStmt(MetaIfStmt { span, cond, then_branch, else_branch })))
    }

    fn parse_meta_calc(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        self.expect(&TokKind::KwMeta, "meta")?;
        self.expect(&TokKind::KwCalc, "calc")?;
        let stmt = self.parse_stmt()?;
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::MetaCalculationStmt(MetaCalculationStmt { span, stmt, exported_decls: vec![] })))
    }

    // -- statements ----------------------------------------------------

    fn parse_scoped_block(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        self.expect(&TokKind::LBrace, "{")?;
        let mut stmts = Vec::new();
        while *self.peek() != TokKind::RBrace {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokKind::RBrace, "}")?;
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::CompoundStmt(CompoundStmt { span, stmts })))
    }

    fn parse_unscoped_block(&mut self) -> Result<NodeId, ErrorReported> {
        let start_span = self.span();
        self.expect(&TokKind::LBrace, "{")?;
        let mut stmts = Vec::new();
        while *self.peek() != TokKind::RBrace {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokKind::RBrace, "}")?;
        let span = start_span.merge(self.span());
        Ok(self.ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span, stmts })))
    }

    fn parse_stmt(&mut self) -> Result<NodeId, ErrorReported> {
        match self.peek().clone() {
            TokKind::LBrace => self.parse_scoped_block(),
            TokKind::KwReturn => {
                let start_span = self.span();
                self.bump();
                let value = if *self.peek() == TokKind::Semi { None } else { Some(self.parse_expr()?) };
                self.expect(&TokKind::Semi, ";")?;
                let span = start_span.merge(self.span());
                Ok(self.ctx.ast.alloc(Node::ReturnStmt(ReturnStmt { span, value })))
            }
            TokKind::KwIf => {
                let start_span = self.span();
                self.bump();
                self.expect(&TokKind::LParen, "(")?;
                let cond = self.parse_expr()?;
                self.expect(&TokKind::RParen, ")")?;
                let then_branch = self.parse_stmt()?;
                let else_branch = if *self.peek() == TokKind::KwElse {
                    self.bump();
                    Some(self.parse_stmt()?)
                } else {
                    None
                };
                let span = start_span.merge(self.span());
                Ok(self.ctx.ast.alloc(Node::IfStmt(IfStmt { span, cond, then_branch, else_branch })))
            }
            TokKind::KwMeta => match self.peek_at(1).clone() {
                TokKind::KwCalc => self.parse_meta_calc(),
                _ => Err(error!(self.ctx.diagnostics, Syntactic {
                    span: self.span(),
                    expected: vec!["meta calc".to_owned()],
                })),
            },
            TokKind::KwInt if matches!(self.peek_at(1), TokKind::Ident(_)) && *self.peek_at(2) == TokKind::Assign => {
                self.bump();
                let name = self.expect_ident()?;
                self.expect(&TokKind::Assign, "=")?;
                let init = self.parse_expr()?;
                self.expect(&TokKind::Semi, ";")?;
                Ok(self.ctx.ast.alloc(Node::DeclStmt(DeclStmt { name, def_id: None, init })))
            }
            _ => {
                let start_span = self.span();
                let expr = self.parse_expr()?;
                self.expect(&TokKind::Semi, ";")?;
                let span = start_span.merge(self.span());
                Ok(self.ctx.ast.alloc(Node::ExpressionStmt(ExpressionStmt { span, expr })))
            }
        }
    }

    // -- expressions -----------------------------------------------------

    fn parse_expr(&mut self) -> Result<NodeId, ErrorReported> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u32) -> Result<NodeId, ErrorReported> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, len) = match self.peek_binop() {
                Some(pair) => pair,
                None => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            let op_span = self.span();
            for _ in 0..len {
                self.bump();
            }
            // `=` is right-associative; everything else is left-associative.
            let next_min = if op == BinOp::Assign { prec } else { prec + 1 };
            let rhs = self.parse_binary(next_min)?;
            let span = self.node_span(lhs).merge(self.node_span(rhs));
            lhs = self.ctx.ast.alloc(Node::BinaryOperatorExpr(BinaryOperatorExpr {
                span,
                op: crate::pos::Sp::new_from(op_span, op),
                lhs,
                rhs,
            }));
        }
        Ok(lhs)
    }

    fn peek_binop(&self) -> Option<(BinOp, usize)> {
        Some(match self.peek() {
            TokKind::Plus => (BinOp::Add, 1),
            TokKind::Minus => (BinOp::Sub, 1),
            TokKind::Star => (BinOp::Mul, 1),
            TokKind::Slash => (BinOp::Div, 1),
            TokKind::Percent => (BinOp::Rem, 1),
            TokKind::Assign => (BinOp::Assign, 1),
            TokKind::EqEq => (BinOp::Eq, 1),
            TokKind::NotEq => (BinOp::Ne, 1),
            TokKind::LtEq => (BinOp::Le, 1),
            TokKind::Lt => (BinOp::Lt, 1),
            TokKind::Gt => (BinOp::Gt, 1),
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Result<NodeId, ErrorReported> {
        if *self.peek() == TokKind::Minus {
            let span = self.span();
            self.bump();
            let operand = self.parse_unary()?;
            let zero = self.ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span, value: 0 }));
            let full_span = span.merge(self.node_span(operand));
            return Ok(self.ctx.ast.alloc(Node::BinaryOperatorExpr(BinaryOperatorExpr {
                span: full_span,
                op: crate::pos::Sp::new_from(span, BinOp::Sub),
                lhs: zero,
                rhs: operand,
            })));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<NodeId, ErrorReported> {
        match self.peek().clone() {
            TokKind::Int(value) => {
                let span = self.span();
                self.bump();
                Ok(self.ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span, value })))
            }
            TokKind::True | TokKind::False => {
                let value = *self.peek() == TokKind::True;
                let span = self.span();
                self.bump();
                Ok(self.ctx.ast.alloc(Node::BooleanLiteralExpr(BooleanLiteralExpr { span, value })))
            }
            TokKind::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(&TokKind::RParen, ")")?;
                Ok(inner)
            }
            TokKind::Ident(_) => self.parse_ident_led_expr(),
            _ => Err(error!(self.ctx.diagnostics, Syntactic { span: self.span(), expected: vec!["an expression".to_owned()] })),
        }
    }

    fn parse_ident_led_expr(&mut self) -> Result<NodeId, ErrorReported> {
        let callee = self.expect_ident()?;
        if *self.peek() == TokKind::LParen {
            self.bump();
            let args = self.parse_arg_exprs(&TokKind::RParen)?;
            let end = self.span();
            self.expect(&TokKind::RParen, ")")?;
            let span = callee.span.merge(end);
            return Ok(self.ctx.ast.alloc(Node::CallExpr(CallExpr { span, callee, resolved: None, args })));
        }
        if *self.peek() == TokKind::Lt && self.looks_like_meta_instantiation() {
            self.bump(); // '<'
            let args = self.parse_arg_exprs(&TokKind::Gt)?;
            self.expect(&TokKind::Gt, ">")?;
            let call_args = if *self.peek() == TokKind::LParen {
                self.bump();
                let a = self.parse_arg_exprs(&TokKind::RParen)?;
                self.expect(&TokKind::RParen, ")")?;
                a
            } else {
                Vec::new()
            };
            let span = callee.span.merge(self.span());
            return Ok(self.ctx.ast.alloc(Node::MetaInstantiationExpr(MetaInstantiationExpr {
                span,
                callee,
                resolved: None,
                args,
                call_args,
            })));
        }
        Ok(self.ctx.ast.alloc(Node::DeclRefExpr(DeclRefExpr { name: callee, resolved: None })))
    }

    /// A `<` after an identifier is ambiguous with the comparison operator;
    /// meta arguments are integer literals only (`sema::check_expr` enforces
    /// this downstream too), so `INT (, INT)* >` is a deterministic lookahead
    /// that never collides with a comparison expression's right-hand side.
    fn looks_like_meta_instantiation(&self) -> bool {
        let mut offset = 1; // skip '<'
        if *self.peek_at(offset) == TokKind::Gt {
            return true; // `name<>` — zero meta arguments
        }
        loop {
            match self.peek_at(offset) {
                TokKind::Int(_) => offset += 1,
                _ => return false,
            }
            match self.peek_at(offset) {
                TokKind::Comma => offset += 1,
                TokKind::Gt => return true,
                _ => return false,
            }
        }
    }

    fn parse_arg_exprs(&mut self, terminator: &TokKind) -> Result<Vec<NodeId>, ErrorReported> {
        let mut args = Vec::new();
        if self.peek() != terminator {
            loop {
                args.push(self.parse_expr()?);
                if *self.peek() == TokKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        Ok(args)
    }

    fn node_span(&self, id: NodeId) -> Span {
        use Node::*;
        match self.ctx.ast.get(id) {
            CompilationUnit(n) => n.span,
            MetaUnit(n) => n.span,
            FunctionDecl(n) => n.name.span,
            MetaDecl(n) => n.name.span,
            GlobalConstantDecl(n) => n.name.span,
            ArgumentDeclList(n) => n.span,
            AnonymousArgumentDecl(n) => n.span,
            NamedArgumentDecl(n) => n.name.span,
            CompoundStmt(n) => n.span,
            UnscopedCompoundStmt(n) => n.span,
            ReturnStmt(n) => n.span,
            ExpressionStmt(n) => n.span,
            DeclStmt(n) => n.name.span,
            IfStmt(n) => n.span,
            MetaIfStmt(n) => n.span,
            MetaCalculationStmt(n) => n.span,
            MetaContribution(n) => n.span,
            DeclRefExpr(n) => n.name.span,
            IntegerLiteralExpr(n) => n.span,
            BooleanLiteralExpr(n) => n.span,
            BinaryOperatorExpr(n) => n.span,
            CallExpr(n) => n.span,
            MetaInstantiationExpr(n) => n.span,
            ErroneousExpr(n) => n.span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(ctx: &mut CompilerContext, src: &str) -> Layout {
        let (_, layout) = parse_source(ctx, "<test>", src.as_bytes()).expect("should parse");
        layout
    }

    #[test]
    fn parses_function_and_resolves_call() {
        let mut ctx = CompilerContext::new();
        let layout = parse_ok(&mut ctx, "int main() { return helper(1); } int helper(int x) { return x; }");
        let unit = crate::reader::structure_compilation_unit(&mut ctx, &layout).expect("structures cleanly");
        assert!(!ctx.has_errors());
        assert!(matches!(ctx.ast.get(unit), Node::CompilationUnit(_)));
    }

    #[test]
    fn parses_meta_decl_with_meta_if_and_calc() {
        let mut ctx = CompilerContext::new();
        let layout = parse_ok(&mut ctx, r#"
            meta k<int n> {
                meta if (n) {
                    const int v = 1;
                } else {
                    const int v = 0;
                }
            }
            int main() { return k<1>; }
        "#);
        let unit = crate::reader::structure_compilation_unit(&mut ctx, &layout).expect("structures cleanly");
        assert!(!ctx.has_errors());
        assert!(matches!(ctx.ast.get(unit), Node::CompilationUnit(_)));
    }

    #[test]
    fn meta_instantiation_call_syntax_parses_call_args_separately_from_template_args() {
        let mut ctx = CompilerContext::new();
        let layout = parse_ok(&mut ctx, r#"
            meta add<int a> {
                int add(int x) { return x + a; }
            }
            int main() { return add<3>(4); }
        "#);
        let unit = crate::reader::structure_compilation_unit(&mut ctx, &layout).expect("structures cleanly");
        assert!(!ctx.has_errors());
        assert!(matches!(ctx.ast.get(unit), Node::CompilationUnit(_)));
    }

    #[test]
    fn reserved_name_on_meta_decl_is_rejected() {
        let mut ctx = CompilerContext::new();
        let layout = parse_ok(&mut ctx, "meta int<int n> { }");
        let _ = crate::reader::structure_compilation_unit(&mut ctx, &layout);
        assert!(ctx.has_errors());
    }

    #[test]
    fn comparison_operator_on_an_identifier_is_not_confused_with_meta_instantiation() {
        let mut ctx = CompilerContext::new();
        let layout = parse_ok(&mut ctx, "int f(int x) { return x < 2; }");
        let unit = crate::reader::structure_compilation_unit(&mut ctx, &layout).expect("structures cleanly");
        assert!(!ctx.has_errors());
        assert!(matches!(ctx.ast.get(unit), Node::CompilationUnit(_)));
    }
}
