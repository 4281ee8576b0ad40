//! Render a syntax tree back to source text.
//!
//! Output is normalized (four-space indentation, minimal parentheses) and
//! parses back to an equivalent tree.

use std::fmt::Write;

use super::ast::{BinOp, BoolOp, Const, Expr, ExprKind, Module, Stmt, StmtKind, UnaryOp};

pub fn unparse_module(module: &Module) -> String {
    let mut out = String::new();
    write_block(&mut out, &module.body, 0);
    out
}

pub fn unparse_stmt(stmt: &Stmt) -> String {
    let mut out = String::new();
    write_stmt(&mut out, stmt, 0);
    out
}

pub fn unparse_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr, 0);
    out
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

fn write_block(out: &mut String, body: &[Stmt], level: usize) {
    if body.is_empty() {
        indent(out, level);
        out.push_str("pass\n");
        return;
    }
    for stmt in body {
        write_stmt(out, stmt, level);
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt, level: usize) {
    match &stmt.kind {
        StmtKind::Def(def) => {
            for decorator in &def.decorators {
                indent(out, level);
                out.push('@');
                write_expr(out, decorator, 0);
                out.push('\n');
            }
            indent(out, level);
            let _ = write!(out, "def {}(", def.name);
            for (i, param) in def.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&param.name);
                if let Some(default) = &param.default {
                    out.push('=');
                    write_expr(out, default, 0);
                }
            }
            out.push_str("):\n");
            write_block(out, &def.body, level + 1);
        }
        StmtKind::Class(class) => {
            for decorator in &class.decorators {
                indent(out, level);
                out.push('@');
                write_expr(out, decorator, 0);
                out.push('\n');
            }
            indent(out, level);
            let _ = writeln!(out, "class {}:", class.name);
            write_block(out, &class.body, level + 1);
        }
        StmtKind::If { test, body, orelse } => {
            indent(out, level);
            out.push_str("if ");
            write_if_chain(out, test, body, orelse, level);
        }
        StmtKind::While { test, body } => {
            indent(out, level);
            out.push_str("while ");
            write_expr(out, test, 0);
            out.push_str(":\n");
            write_block(out, body, level + 1);
        }
        StmtKind::For { target, iter, body } => {
            indent(out, level);
            out.push_str("for ");
            write_tuple_bare(out, target);
            out.push_str(" in ");
            write_tuple_bare(out, iter);
            out.push_str(":\n");
            write_block(out, body, level + 1);
        }
        StmtKind::Try { body, handlers } => {
            indent(out, level);
            out.push_str("try:\n");
            write_block(out, body, level + 1);
            for handler in handlers {
                indent(out, level);
                out.push_str("except");
                if let Some(kind) = &handler.kind {
                    out.push(' ');
                    out.push_str(kind);
                }
                if let Some(name) = &handler.name {
                    let _ = write!(out, " as {name}");
                }
                out.push_str(":\n");
                write_block(out, &handler.body, level + 1);
            }
        }
        simple => {
            indent(out, level);
            write_simple(out, simple);
            out.push('\n');
        }
    }
}

fn write_if_chain(out: &mut String, test: &Expr, body: &[Stmt], orelse: &[Stmt], level: usize) {
    write_expr(out, test, 0);
    out.push_str(":\n");
    write_block(out, body, level + 1);
    match orelse {
        [] => {}
        [Stmt {
            kind:
                StmtKind::If {
                    test,
                    body,
                    orelse,
                },
            ..
        }] => {
            indent(out, level);
            out.push_str("elif ");
            write_if_chain(out, test, body, orelse, level);
        }
        _ => {
            indent(out, level);
            out.push_str("else:\n");
            write_block(out, orelse, level + 1);
        }
    }
}

fn write_simple(out: &mut String, kind: &StmtKind) {
    match kind {
        StmtKind::Expr(expr) => write_tuple_bare(out, expr),
        StmtKind::Assign { target, value } => {
            write_tuple_bare(out, target);
            out.push_str(" = ");
            write_tuple_bare(out, value);
        }
        StmtKind::AugAssign { target, op, value } => {
            write_expr(out, target, 0);
            let _ = write!(out, " {}= ", op.symbol());
            write_expr(out, value, 0);
        }
        StmtKind::Return(value) => {
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                write_tuple_bare(out, value);
            }
        }
        StmtKind::Raise(value) => {
            out.push_str("raise");
            if let Some(value) = value {
                out.push(' ');
                write_expr(out, value, 0);
            }
        }
        StmtKind::Import { module, alias } => {
            let _ = write!(out, "import {module}");
            if let Some(alias) = alias {
                let _ = write!(out, " as {alias}");
            }
        }
        StmtKind::FromImport { module, names } => {
            let _ = write!(out, "from {module} import ");
            for (i, (name, alias)) in names.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                if let Some(alias) = alias {
                    let _ = write!(out, " as {alias}");
                }
            }
        }
        StmtKind::Break => out.push_str("break"),
        StmtKind::Continue => out.push_str("continue"),
        StmtKind::Pass => out.push_str("pass"),
        _ => {}
    }
}

/// Tuples in statement position render without parentheses.
fn write_tuple_bare(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Tuple(items) if !items.is_empty() => {
            write_list(out, items);
            if items.len() == 1 {
                out.push(',');
            }
        }
        _ => write_expr(out, expr, 0),
    }
}

fn write_list(out: &mut String, items: &[Expr]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, item, 0);
    }
}

// Binding strength, loosest first.
const PREC_IFEXP: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_NOT: u8 = 4;
const PREC_CMP: u8 = 5;
const PREC_ARITH: u8 = 6;
const PREC_TERM: u8 = 7;
const PREC_UNARY: u8 = 8;
const PREC_POWER: u8 = 9;
const PREC_ATOM: u8 = 10;

fn precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::IfExp { .. } => PREC_IFEXP,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => PREC_OR,
        ExprKind::BoolOp { op: BoolOp::And, .. } => PREC_AND,
        ExprKind::Unary {
            op: UnaryOp::Not, ..
        } => PREC_NOT,
        ExprKind::Compare { .. } => PREC_CMP,
        ExprKind::BinOp { op, .. } => binop_precedence(*op),
        ExprKind::Unary { .. } => PREC_UNARY,
        ExprKind::Const(Const::Int(n)) if *n < 0 => PREC_UNARY,
        ExprKind::Const(Const::Float(x)) if x.is_sign_negative() => PREC_UNARY,
        _ => PREC_ATOM,
    }
}

fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Add | BinOp::Sub => PREC_ARITH,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => PREC_TERM,
        BinOp::Pow => PREC_POWER,
    }
}

fn write_expr(out: &mut String, expr: &Expr, min: u8) {
    let prec = precedence(expr);
    let parens = prec < min;
    if parens {
        out.push('(');
    }
    match &expr.kind {
        ExprKind::Name(name) => out.push_str(name),
        ExprKind::Const(c) => write_const(out, c),
        ExprKind::List(items) => {
            out.push('[');
            write_list(out, items);
            out.push(']');
        }
        ExprKind::Tuple(items) => {
            out.push('(');
            write_list(out, items);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        ExprKind::Set(items) => {
            out.push('{');
            write_list(out, items);
            out.push('}');
        }
        ExprKind::Dict(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, k, 0);
                out.push_str(": ");
                write_expr(out, v, 0);
            }
            out.push('}');
        }
        ExprKind::Attribute { value, attr } => {
            write_expr(out, value, PREC_ATOM);
            out.push('.');
            out.push_str(attr);
        }
        ExprKind::Subscript { value, index } => {
            write_expr(out, value, PREC_ATOM);
            out.push('[');
            write_expr(out, index, 0);
            out.push(']');
        }
        ExprKind::Slice { lower, upper } => {
            if let Some(lower) = lower {
                write_expr(out, lower, 0);
            }
            out.push(':');
            if let Some(upper) = upper {
                write_expr(out, upper, 0);
            }
        }
        ExprKind::Call { func, args, kwargs } => {
            write_expr(out, func, PREC_ATOM);
            out.push('(');
            write_list(out, args);
            for (i, kw) in kwargs.iter().enumerate() {
                if i > 0 || !args.is_empty() {
                    out.push_str(", ");
                }
                out.push_str(&kw.name);
                out.push('=');
                write_expr(out, &kw.value, 0);
            }
            out.push(')');
        }
        ExprKind::BinOp { left, op, right } => {
            let p = binop_precedence(*op);
            if *op == BinOp::Pow {
                // Right associative.
                write_expr(out, left, p + 1);
                let _ = write!(out, " {} ", op.symbol());
                write_expr(out, right, PREC_UNARY);
            } else {
                write_expr(out, left, p);
                let _ = write!(out, " {} ", op.symbol());
                write_expr(out, right, p + 1);
            }
        }
        ExprKind::Unary { op, operand } => match op {
            UnaryOp::Not => {
                out.push_str("not ");
                write_expr(out, operand, PREC_NOT);
            }
            UnaryOp::Neg => {
                out.push('-');
                write_expr(out, operand, PREC_UNARY);
            }
            UnaryOp::Pos => {
                out.push('+');
                write_expr(out, operand, PREC_UNARY);
            }
        },
        ExprKind::BoolOp { op, left, right } => {
            let (p, word) = match op {
                BoolOp::Or => (PREC_OR, "or"),
                BoolOp::And => (PREC_AND, "and"),
            };
            write_expr(out, left, p);
            let _ = write!(out, " {word} ");
            write_expr(out, right, p + 1);
        }
        ExprKind::Compare { left, ops } => {
            write_expr(out, left, PREC_CMP + 1);
            for (op, right) in ops {
                let _ = write!(out, " {} ", op.symbol());
                write_expr(out, right, PREC_CMP + 1);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            write_expr(out, body, PREC_OR);
            out.push_str(" if ");
            write_expr(out, test, PREC_OR);
            out.push_str(" else ");
            write_expr(out, orelse, PREC_IFEXP);
        }
    }
    if parens {
        out.push(')');
    }
}

fn write_const(out: &mut String, c: &Const) {
    match c {
        Const::None => out.push_str("None"),
        Const::Bool(true) => out.push_str("True"),
        Const::Bool(false) => out.push_str("False"),
        Const::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Const::Float(x) => {
            if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                let _ = write!(out, "{x:.1}");
            } else {
                let _ = write!(out, "{x}");
            }
        }
        Const::Str(s) => write_quoted(out, s),
        Const::Bytes(bytes) => {
            out.push_str("b\"");
            for b in bytes {
                match b {
                    b'"' => out.push_str("\\\""),
                    b'\\' => out.push_str("\\\\"),
                    b'\n' => out.push_str("\\n"),
                    0x20..=0x7e => out.push(*b as char),
                    _ => {
                        let _ = write!(out, "\\x{b:02x}");
                    }
                }
            }
            out.push('"');
        }
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expr, parse_module};

    fn roundtrip_expr(src: &str) -> String {
        unparse_expr(&parse_expr(src).unwrap())
    }

    #[test]
    fn keeps_required_parentheses() {
        assert_eq!(roundtrip_expr("(a + b) * c"), "(a + b) * c");
        assert_eq!(roundtrip_expr("a + b * c"), "a + b * c");
        assert_eq!(roundtrip_expr("a - (b - c)"), "a - (b - c)");
        assert_eq!(roundtrip_expr("not (a and b)"), "not (a and b)");
    }

    #[test]
    fn renders_calls_with_keywords() {
        assert_eq!(roundtrip_expr("f(1,  x = 'y')"), "f(1, x=\"y\")");
    }

    #[test]
    fn module_output_reparses_to_same_tree() {
        let src = "\
@activity
def f(a, b=1):
    if a:
        return a
    elif b:
        x, y = 1, 2
    else:
        pass
    for k in range(3):
        a += k
    try:
        g()
    except ValueError as e:
        raise
    return [a, {'k': b}]
";
        let module = parse_module(src, "wf", "wf.flow").unwrap();
        let text = unparse_module(&module);
        let again = parse_module(&text, "wf", "wf.flow").unwrap();
        assert_eq!(unparse_module(&again), text);
        assert!(text.contains("elif b:"));
    }
}
