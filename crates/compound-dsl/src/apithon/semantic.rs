//! Semantic checks for a parsed APIthon body.
//!
//! These are the placement rules the grammar cannot express: `break` and
//! `continue` need a loop in the same function, `await` needs an enclosing
//! `async def`, and `nonlocal` or `yield` need an enclosing function.

use super::ast::*;
use super::SyntaxError;

#[derive(Debug, Clone, Copy)]
enum Scope {
    Function { is_async: bool },
    Class,
}

#[derive(Default)]
struct ScopeChecker {
    loop_depth: usize,
    /// Enclosing definitions; empty means the implicit (non-async) body
    scopes: Vec<Scope>,
    first: Option<SyntaxError>,
}

/// First misplaced statement or expression in `module`, in source order
pub fn check_module(module: &Module) -> Result<(), SyntaxError> {
    let mut checker = ScopeChecker::default();
    walk_module(&mut checker, module);
    match checker.first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl ScopeChecker {
    fn fail(&mut self, line: usize, message: impl Into<String>) {
        if self.first.is_none() {
            self.first = Some(SyntaxError::new(line, message));
        }
    }

    fn in_async_function(&self) -> bool {
        matches!(self.scopes.last(), Some(Scope::Function { is_async: true }))
    }

    /// Run `visit` inside `scope`; loops outside it no longer apply
    fn scoped(&mut self, scope: Scope, visit: impl FnOnce(&mut Self)) {
        let loop_depth = std::mem::take(&mut self.loop_depth);
        self.scopes.push(scope);
        visit(self);
        self.scopes.pop();
        self.loop_depth = loop_depth;
    }

    fn loop_body(&mut self, body: &[Stmt]) {
        self.loop_depth += 1;
        walk_body(self, body);
        self.loop_depth -= 1;
    }
}

impl Visitor for ScopeChecker {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Break if self.loop_depth == 0 => self.fail(stmt.line, "'break' outside loop"),
            StmtKind::Continue if self.loop_depth == 0 => {
                self.fail(stmt.line, "'continue' not properly in loop")
            }
            StmtKind::Return(_) if matches!(self.scopes.last(), Some(Scope::Class)) => {
                self.fail(stmt.line, "'return' outside function")
            }
            StmtKind::Nonlocal(names) if self.scopes.is_empty() => {
                if let Some(name) = names.first() {
                    self.fail(stmt.line, format!("no binding for nonlocal '{}' found", name));
                }
            }
            StmtKind::ImportFrom { names, .. } if names.iter().any(|alias| alias.name == "*") => {
                self.fail(stmt.line, "import * only allowed at module level")
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test);
                self.loop_body(body);
                walk_body(self, orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async && !self.in_async_function() {
                    self.fail(stmt.line, "'async for' outside async function");
                }
                self.visit_expr(target);
                self.visit_expr(iter);
                self.loop_body(body);
                walk_body(self, orelse);
            }
            StmtKind::With { is_async, .. } => {
                if *is_async && !self.in_async_function() {
                    self.fail(stmt.line, "'async with' outside async function");
                }
                walk_stmt(self, stmt);
            }
            StmtKind::FunctionDef {
                params,
                returns,
                decorators,
                body,
                is_async,
                ..
            } => {
                for decorator in decorators {
                    self.visit_expr(decorator);
                }
                for param in params {
                    self.visit_param(param);
                }
                if let Some(returns) = returns {
                    self.visit_expr(returns);
                }
                self.scoped(Scope::Function { is_async: *is_async }, |checker| {
                    walk_body(checker, body)
                });
            }
            StmtKind::ClassDef {
                bases,
                keywords,
                decorators,
                body,
                ..
            } => {
                for expr in decorators.iter().chain(bases) {
                    self.visit_expr(expr);
                }
                for keyword in keywords {
                    self.visit_keyword(keyword);
                }
                self.scoped(Scope::Class, |checker| walk_body(checker, body));
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Await(_) if !self.in_async_function() => {
                self.fail(expr.line, "'await' outside async function")
            }
            ExprKind::Yield(_) | ExprKind::YieldFrom(_)
                if matches!(self.scopes.last(), Some(Scope::Class)) =>
            {
                self.fail(expr.line, "'yield' outside function")
            }
            ExprKind::Lambda { params, body } => {
                for param in params {
                    self.visit_param(param);
                }
                self.scoped(Scope::Function { is_async: false }, |checker| {
                    checker.visit_expr(body)
                });
                return;
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}
