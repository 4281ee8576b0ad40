//! Call-interception rewrite.
//!
//! Every call expression `f(a, k=v)` becomes `__hook__(f, a, k=v)` so the
//! dispatcher sees each call before it happens. Calls to bare builtin names
//! and to the hook itself are left as they are. Arguments are rewritten
//! before the call that receives them, so `g(f(x))` becomes
//! `__hook__(g, __hook__(f, x))`.

use std::rc::Rc;

use crate::script::ast::{ClassDef, Expr, ExprKind, FunctionDef, Handler, Keyword, Module, Param, Stmt, StmtKind};
use crate::script::parser::{parse_module, ParseError};
use crate::script::stdlib::BUILTIN_NAMES;

/// Rewrite every call in `module` to go through `hook`.
pub fn instrument(module: Module, hook: &str) -> Module {
    let rewriter = Rewriter { hook };
    Module {
        name: module.name,
        file: module.file,
        body: rewriter.block(module.body),
    }
}

/// Parse and instrument in one step.
pub fn instrument_source(
    source: &str,
    name: &str,
    file: &str,
    hook: &str,
) -> Result<Module, ParseError> {
    Ok(instrument(parse_module(source, name, file)?, hook))
}

struct Rewriter<'a> {
    hook: &'a str,
}

impl Rewriter<'_> {
    fn is_exempt(&self, func: &Expr) -> bool {
        match &func.kind {
            ExprKind::Name(name) => name == self.hook || BUILTIN_NAMES.contains(&name.as_str()),
            _ => false,
        }
    }

    fn block(&self, body: Vec<Stmt>) -> Vec<Stmt> {
        body.into_iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&self, stmt: Stmt) -> Stmt {
        let kind = match stmt.kind {
            StmtKind::Expr(e) => StmtKind::Expr(self.expr(e)),
            StmtKind::Assign { target, value } => StmtKind::Assign {
                target: self.expr(target),
                value: self.expr(value),
            },
            StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: self.expr(target),
                op,
                value: self.expr(value),
            },
            StmtKind::Return(value) => StmtKind::Return(value.map(|e| self.expr(e))),
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test),
                body: self.block(body),
                orelse: self.block(orelse),
            },
            StmtKind::While { test, body } => StmtKind::While {
                test: self.expr(test),
                body: self.block(body),
            },
            StmtKind::For { target, iter, body } => StmtKind::For {
                target: self.expr(target),
                iter: self.expr(iter),
                body: self.block(body),
            },
            StmtKind::Def(def) => StmtKind::Def(Rc::new(self.function(&def))),
            StmtKind::Class(class) => StmtKind::Class(Rc::new(ClassDef {
                name: class.name.clone(),
                body: self.block(class.body.clone()),
                decorators: self.exprs(class.decorators.clone()),
            })),
            StmtKind::Try { body, handlers } => StmtKind::Try {
                body: self.block(body),
                handlers: handlers
                    .into_iter()
                    .map(|h| Handler {
                        body: self.block(h.body),
                        ..h
                    })
                    .collect(),
            },
            StmtKind::Raise(value) => StmtKind::Raise(value.map(|e| self.expr(e))),
            other @ (StmtKind::Import { .. }
            | StmtKind::FromImport { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass) => other,
        };
        Stmt {
            kind,
            line: stmt.line,
        }
    }

    fn function(&self, def: &FunctionDef) -> FunctionDef {
        FunctionDef {
            name: def.name.clone(),
            params: def
                .params
                .iter()
                .map(|p| Param {
                    name: p.name.clone(),
                    default: p.default.clone().map(|e| self.expr(e)),
                })
                .collect(),
            body: self.block(def.body.clone()),
            decorators: self.exprs(def.decorators.clone()),
        }
    }

    fn exprs(&self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&self, expr: Box<Expr>) -> Box<Expr> {
        Box::new(self.expr(*expr))
    }

    fn expr(&self, expr: Expr) -> Expr {
        let line = expr.line;
        let kind = match expr.kind {
            ExprKind::Call { func, args, kwargs } => {
                let exempt = self.is_exempt(&func);
                let func = self.expr(*func);
                let args = self.exprs(args);
                let kwargs: Vec<Keyword> = kwargs
                    .into_iter()
                    .map(|kw| Keyword {
                        name: kw.name,
                        value: self.expr(kw.value),
                    })
                    .collect();
                if exempt {
                    ExprKind::Call {
                        func: Box::new(func),
                        args,
                        kwargs,
                    }
                } else {
                    let mut hooked = Vec::with_capacity(args.len() + 1);
                    hooked.push(func);
                    hooked.extend(args);
                    ExprKind::Call {
                        func: Box::new(Expr::name(self.hook, line)),
                        args: hooked,
                        kwargs,
                    }
                }
            }
            ExprKind::List(items) => ExprKind::List(self.exprs(items)),
            ExprKind::Tuple(items) => ExprKind::Tuple(self.exprs(items)),
            ExprKind::Set(items) => ExprKind::Set(self.exprs(items)),
            ExprKind::Dict(entries) => ExprKind::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| (self.expr(k), self.expr(v)))
                    .collect(),
            ),
            ExprKind::Attribute { value, attr } => ExprKind::Attribute {
                value: self.boxed(value),
                attr,
            },
            ExprKind::Subscript { value, index } => ExprKind::Subscript {
                value: self.boxed(value),
                index: self.boxed(index),
            },
            ExprKind::Slice { lower, upper } => ExprKind::Slice {
                lower: lower.map(|e| self.boxed(e)),
                upper: upper.map(|e| self.boxed(e)),
            },
            ExprKind::BinOp { left, op, right } => ExprKind::BinOp {
                left: self.boxed(left),
                op,
                right: self.boxed(right),
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: self.boxed(operand),
            },
            ExprKind::BoolOp { op, left, right } => ExprKind::BoolOp {
                op,
                left: self.boxed(left),
                right: self.boxed(right),
            },
            ExprKind::Compare { left, ops } => ExprKind::Compare {
                left: self.boxed(left),
                ops: ops.into_iter().map(|(op, e)| (op, self.expr(e))).collect(),
            },
            ExprKind::IfExp { test, body, orelse } => ExprKind::IfExp {
                test: self.boxed(test),
                body: self.boxed(body),
                orelse: self.boxed(orelse),
            },
            other @ (ExprKind::Name(_) | ExprKind::Const(_)) => other,
        };
        Expr { kind, line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_expr;
    use crate::script::unparse::{unparse_expr, unparse_module};
    use crate::script::HOOK_NAME;

    fn rewrite(source: &str) -> String {
        let module = instrument_source(source, "wf", "wf.flow", HOOK_NAME).unwrap();
        unparse_module(&module).trim_end().to_string()
    }

    fn rewrite_expr(source: &str) -> String {
        let module = Module {
            name: "wf".into(),
            file: "wf.flow".into(),
            body: vec![Stmt {
                kind: StmtKind::Expr(parse_expr(source).unwrap()),
                line: 1,
            }],
        };
        let StmtKind::Expr(expr) = &instrument(module, HOOK_NAME).body[0].kind else {
            unreachable!();
        };
        unparse_expr(expr)
    }

    #[test]
    fn nested_calls_are_rewritten_inside_out() {
        assert_eq!(rewrite_expr("g(f(x))"), "__hook__(g, __hook__(f, x))");
    }

    #[test]
    fn keyword_arguments_and_order_are_kept() {
        assert_eq!(
            rewrite_expr("f(1, 2, key=3, other=g(4))"),
            "__hook__(f, 1, 2, key=3, other=__hook__(g, 4))"
        );
    }

    #[test]
    fn dotted_subscript_and_chained_calls() {
        assert_eq!(rewrite_expr("a.b.c()"), "__hook__(a.b.c)");
        assert_eq!(rewrite_expr("xs[0]()"), "__hook__(xs[0])");
        assert_eq!(
            rewrite_expr("x().y().z()"),
            "__hook__(__hook__(__hook__(x).y).z)"
        );
    }

    #[test]
    fn builtins_and_the_hook_are_exempt() {
        assert_eq!(rewrite_expr("len(f(x))"), "len(__hook__(f, x))");
        assert_eq!(rewrite_expr("__hook__(f, 1)"), "__hook__(f, 1)");
        // Only bare names are exempt; an attribute that happens to be
        // called `len` is still intercepted.
        assert_eq!(rewrite_expr("obj.len()"), "__hook__(obj.len)");
    }

    #[test]
    fn non_call_expressions_are_untouched() {
        assert_eq!(rewrite_expr("a + b[1] * c.d"), "a + b[1] * c.d");
    }

    #[test]
    fn decorators_defaults_and_bodies_are_rewritten() {
        let out = rewrite("\
@deco(make())
def f(x=default()):
    while ready():
        step(x)
");
        assert_eq!(
            out,
            "\
@__hook__(deco, __hook__(make))
def f(x=__hook__(default)):
    while __hook__(ready):
        __hook__(step, x)"
        );
    }

    #[test]
    fn class_bodies_are_rewritten() {
        let out = rewrite("\
class Order:
    created = now()
");
        assert!(out.contains("created = __hook__(now)"), "{out}");
    }

    #[test]
    fn unparsable_source_is_an_error() {
        assert!(instrument_source("def (:\n", "wf", "wf.flow", HOOK_NAME).is_err());
    }
}
