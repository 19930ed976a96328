//! Rule checks over the APIthon parse tree.
//!
//! Each rule looks at one aspect of the tree. Adding a rule means
//! implementing [`ApithonRule`] and listing it in [`default_rules`].

use std::collections::HashSet;

use lazy_static::lazy_static;

use super::ast::*;
use super::ApithonIssue;

/// Built-ins scripts may call
pub const ALLOWED_BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "bytes", "callable", "chr", "dict", "divmod",
    "enumerate", "filter", "float", "format", "frozenset", "hash", "hex", "int", "isinstance",
    "issubclass", "iter", "len", "list", "map", "max", "min", "next", "oct", "ord", "pow",
    "print", "range", "repr", "reversed", "round", "set", "slice", "sorted", "str", "sum",
    "tuple", "type", "zip",
    // exceptions a script may raise
    "Exception", "ValueError", "TypeError", "KeyError", "IndexError", "RuntimeError",
    "ZeroDivisionError", "AttributeError", "NotImplementedError", "StopIteration",
    "ArithmeticError", "LookupError", "AssertionError",
];

/// Built-ins that reach into the interpreter
pub const DANGEROUS_BUILTINS: &[&str] = &[
    "eval", "exec", "compile", "globals", "locals", "vars", "dir", "hasattr", "getattr",
    "setattr", "delattr",
];

pub const FILE_FUNCTIONS: &[&str] = &["open", "file"];

pub const SYSTEM_MODULES: &[&str] = &["os", "sys", "subprocess"];

lazy_static! {
    static ref ALLOWED_BUILTIN_SET: HashSet<&'static str> =
        ALLOWED_BUILTINS.iter().copied().collect();
}

/// Whether `name` is callable from a script without being defined there
pub fn is_allowed_builtin(name: &str) -> bool {
    ALLOWED_BUILTIN_SET.contains(name)
}

/// A check over a parsed script
pub trait ApithonRule: Send + Sync {
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// `known_names` are bound by the caller (e.g. a step's input arguments)
    fn check(&self, module: &Module, known_names: &HashSet<&str>) -> Vec<ApithonIssue>;
}

/// Every built-in rule
pub fn default_rules() -> Vec<Box<dyn ApithonRule>> {
    vec![
        Box::new(ImportRule),
        Box::new(ClassDefinitionRule),
        Box::new(FunctionDefinitionRule),
        Box::new(PrivateIdentifierRule),
        Box::new(RestrictedCallRule),
        Box::new(SystemAccessRule),
        Box::new(UnknownFunctionRule),
    ]
}

/// Run every built-in rule over `module`
pub fn check_module(module: &Module, known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
    default_rules()
        .iter()
        .flat_map(|rule| rule.check(module, known_names))
        .collect()
}

/// Collects every statement matching a predicate, at any depth
struct StmtFinder<F: Fn(&StmtKind) -> bool> {
    predicate: F,
    found: bool,
}

impl<F: Fn(&StmtKind) -> bool> Visitor for StmtFinder<F> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if (self.predicate)(&stmt.kind) {
            self.found = true;
        }
        walk_stmt(self, stmt);
    }
}

fn contains_stmt<F: Fn(&StmtKind) -> bool>(module: &Module, predicate: F) -> bool {
    let mut finder = StmtFinder {
        predicate,
        found: false,
    };
    walk_module(&mut finder, module);
    finder.found
}

pub struct ImportRule;

impl ApithonRule for ImportRule {
    fn id(&self) -> &'static str {
        "no-import"
    }

    fn description(&self) -> &'static str {
        "Scripts cannot import modules"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        let found = contains_stmt(module, |kind| {
            matches!(kind, StmtKind::Import(_) | StmtKind::ImportFrom { .. })
        });
        if found {
            vec![ApithonIssue::ImportStatement]
        } else {
            Vec::new()
        }
    }
}

pub struct ClassDefinitionRule;

impl ApithonRule for ClassDefinitionRule {
    fn id(&self) -> &'static str {
        "no-class"
    }

    fn description(&self) -> &'static str {
        "Scripts cannot define classes"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        if contains_stmt(module, |kind| matches!(kind, StmtKind::ClassDef { .. })) {
            vec![ApithonIssue::ClassDefinition]
        } else {
            Vec::new()
        }
    }
}

/// Only top-level definitions are flagged; anything nested already sits
/// inside a flagged definition or class
pub struct FunctionDefinitionRule;

impl ApithonRule for FunctionDefinitionRule {
    fn id(&self) -> &'static str {
        "no-function-definition"
    }

    fn description(&self) -> &'static str {
        "Scripts cannot define functions"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        let top_level = module
            .body
            .iter()
            .any(|stmt| matches!(stmt.kind, StmtKind::FunctionDef { .. }));
        if top_level {
            vec![ApithonIssue::FunctionDefinition]
        } else {
            Vec::new()
        }
    }
}

pub struct PrivateIdentifierRule;

struct PrivateNameFinder {
    found: bool,
}

impl PrivateNameFinder {
    fn check(&mut self, name: &str) {
        if name.starts_with('_') {
            self.found = true;
        }
    }
}

impl Visitor for PrivateNameFinder {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } => {
                self.check(name)
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                names.iter().for_each(|name| self.check(name))
            }
            StmtKind::Try { handlers, .. } => handlers
                .iter()
                .filter_map(|handler| handler.name.as_deref())
                .for_each(|name| self.check(name)),
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name(name) => self.check(name),
            ExprKind::Attribute { attr, .. } => self.check(attr),
            _ => {}
        }
        walk_expr(self, expr);
    }

    fn visit_param(&mut self, param: &Param) {
        self.check(&param.name);
        walk_param(self, param);
    }

    fn visit_keyword(&mut self, keyword: &Keyword) {
        if let Some(arg) = &keyword.arg {
            self.check(arg);
        }
        self.visit_expr(&keyword.value);
    }
}

impl ApithonRule for PrivateIdentifierRule {
    fn id(&self) -> &'static str {
        "no-private-identifier"
    }

    fn description(&self) -> &'static str {
        "Names, attributes, parameters and keyword arguments cannot start with '_'"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        let mut finder = PrivateNameFinder { found: false };
        walk_module(&mut finder, module);
        if finder.found {
            vec![ApithonIssue::PrivateIdentifier]
        } else {
            Vec::new()
        }
    }
}

/// Names of every bare-name call in the tree, in source order
struct CallCollector {
    calls: Vec<String>,
}

impl Visitor for CallCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Call { func, .. } = &expr.kind {
            if let ExprKind::Name(name) = &func.kind {
                self.calls.push(name.clone());
            }
        }
        walk_expr(self, expr);
    }
}

fn called_names(module: &Module) -> Vec<String> {
    let mut collector = CallCollector { calls: Vec::new() };
    walk_module(&mut collector, module);
    collector.calls
}

/// Calls of dangerous built-ins and file functions
pub struct RestrictedCallRule;

impl ApithonRule for RestrictedCallRule {
    fn id(&self) -> &'static str {
        "no-restricted-call"
    }

    fn description(&self) -> &'static str {
        "Scripts cannot call introspection or file built-ins"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        called_names(module)
            .into_iter()
            .filter_map(|name| {
                if DANGEROUS_BUILTINS.contains(&name.as_str()) {
                    Some(ApithonIssue::DangerousBuiltin(name))
                } else if FILE_FUNCTIONS.contains(&name.as_str()) {
                    Some(ApithonIssue::FileAccess)
                } else {
                    None
                }
            })
            .collect()
    }
}

pub struct SystemAccessRule;

struct SystemAttributeFinder {
    modules: Vec<String>,
}

impl Visitor for SystemAttributeFinder {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Attribute { value, .. } = &expr.kind {
            if let ExprKind::Name(name) = &value.kind {
                if SYSTEM_MODULES.contains(&name.as_str()) {
                    self.modules.push(name.clone());
                }
            }
        }
        walk_expr(self, expr);
    }
}

impl ApithonRule for SystemAccessRule {
    fn id(&self) -> &'static str {
        "no-system-access"
    }

    fn description(&self) -> &'static str {
        "Scripts cannot reach os, sys or subprocess"
    }

    fn check(&self, module: &Module, _known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        let mut finder = SystemAttributeFinder {
            modules: Vec::new(),
        };
        walk_module(&mut finder, module);
        finder
            .modules
            .into_iter()
            .map(ApithonIssue::SystemAccess)
            .collect()
    }
}

/// Every name a script binds, wherever it is bound
#[derive(Default)]
struct BindingCollector {
    bound: HashSet<String>,
}

impl BindingCollector {
    fn bind_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bound.insert(name.clone());
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().for_each(|item| self.bind_target(item))
            }
            ExprKind::Starred(inner) => self.bind_target(inner),
            _ => {}
        }
    }

    fn bind_generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.bind_target(&generator.target);
        }
    }
}

impl Visitor for BindingCollector {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().for_each(|t| self.bind_target(t)),
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                self.bind_target(target)
            }
            StmtKind::For { target, .. } => self.bind_target(target),
            StmtKind::With { items, .. } => items
                .iter()
                .filter_map(|item| item.target.as_ref())
                .for_each(|target| self.bind_target(target)),
            StmtKind::Try { handlers, .. } => {
                for name in handlers.iter().filter_map(|h| h.name.as_ref()) {
                    self.bound.insert(name.clone());
                }
            }
            StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } => {
                self.bound.insert(name.clone());
            }
            StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
                for alias in aliases {
                    let bound = alias
                        .asname
                        .clone()
                        .unwrap_or_else(|| alias.name.split('.').next().unwrap_or_default().to_string());
                    self.bound.insert(bound);
                }
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                self.bound.extend(names.iter().cloned());
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::NamedExpr { target, .. } => self.bind_target(target),
            ExprKind::ListComp { generators, .. }
            | ExprKind::SetComp { generators, .. }
            | ExprKind::GeneratorExp { generators, .. }
            | ExprKind::DictComp { generators, .. } => self.bind_generators(generators),
            _ => {}
        }
        walk_expr(self, expr);
    }

    fn visit_param(&mut self, param: &Param) {
        self.bound.insert(param.name.clone());
        walk_param(self, param);
    }
}

/// Warns about calls that will not resolve at runtime
pub struct UnknownFunctionRule;

impl ApithonRule for UnknownFunctionRule {
    fn id(&self) -> &'static str {
        "unknown-function"
    }

    fn description(&self) -> &'static str {
        "Called names should be allowed built-ins or bound in the script"
    }

    fn check(&self, module: &Module, known_names: &HashSet<&str>) -> Vec<ApithonIssue> {
        let mut bindings = BindingCollector::default();
        walk_module(&mut bindings, module);

        called_names(module)
            .into_iter()
            .filter(|name| {
                !is_allowed_builtin(name)
                    && !bindings.bound.contains(name)
                    && !known_names.contains(name.as_str())
                    // reported by their own rules
                    && !DANGEROUS_BUILTINS.contains(&name.as_str())
                    && !FILE_FUNCTIONS.contains(&name.as_str())
                    && !name.starts_with('_')
            })
            .map(ApithonIssue::UnknownFunction)
            .collect()
    }
}
