//! Static policy checker
//!
//! Parses a submission and reports every disallowed import, denied builtin
//! call and attribute access on a denied module, before anything runs.
//!
//! The check is syntactic. It does not resolve aliases or follow data flow:
//! `import math as os` is accepted while `os.system` is flagged even when `os`
//! is a local variable, and a module bound under another name
//! (`m = __builtins__`, re-exports, `type(x).__subclasses__()`) is not traced.
//! The worker's guarded import hook narrows this gap at run time but does not
//! close it.

pub mod builtins;

use rustpython_parser::{ast, Parse};
use serde::Serialize;
use tracing::debug;

use crate::core::policy::PolicyConfig;
use builtins::{BUILTINS_TABLE_VERSION, IMPORT_HOOK, PYTHON_BUILTINS};

/// File name reported in parser errors
const SOURCE_PATH: &str = "<sandbox>";

/// Builtin namespace handed to the worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestrictedBuiltins {
    /// Builtins copied into the namespace as-is
    pub names: Vec<String>,
    /// `__import__` is replaced by a hook that re-checks the policy
    pub guarded_import: bool,
    /// Builtins table the names were taken from
    pub table_version: &'static str,
}

impl RestrictedBuiltins {
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

/// Static analysis checker for code policy compliance
#[derive(Debug, Clone, Default)]
pub struct PolicyChecker {
    config: PolicyConfig,
}

impl PolicyChecker {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Check code for policy violations.
    ///
    /// An empty list means nothing was found. All violations are returned in
    /// source order; a parse failure yields a single `syntax error:` entry.
    pub fn check(&self, code: &str) -> Vec<String> {
        let suite = match ast::Suite::parse(code, SOURCE_PATH) {
            Ok(suite) => suite,
            Err(e) => return vec![format!("syntax error: {}", e)],
        };

        let mut walker = PolicyWalker {
            config: &self.config,
            violations: Vec::new(),
        };
        walker.visit_body(&suite);

        debug!("Policy check found {} violation(s)", walker.violations.len());
        walker.violations
    }

    /// Whether `module` may be imported, as judged by the guarded hook
    pub fn import_allowed(&self, module: &str) -> bool {
        self.config.import_allowed(module)
    }

    /// Builtins for the worker namespace: the fixed table minus denied names
    pub fn restricted_builtins(&self) -> RestrictedBuiltins {
        let names = PYTHON_BUILTINS
            .iter()
            .filter(|name| **name != IMPORT_HOOK)
            .filter(|name| !self.config.is_denied_builtin(name))
            .map(|name| name.to_string())
            .collect();

        RestrictedBuiltins {
            names,
            guarded_import: true,
            table_version: BUILTINS_TABLE_VERSION,
        }
    }
}

struct PolicyWalker<'a> {
    config: &'a PolicyConfig,
    violations: Vec<String>,
}

impl PolicyWalker<'_> {
    fn check_import(&mut self, module: &str) {
        if !self.config.import_allowed(module) {
            self.violations.push(format!("import not allowed: {}", module));
        }
    }

    fn visit_body(&mut self, body: &[ast::Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_exprs(&mut self, exprs: &[ast::Expr]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_opt(&mut self, expr: &Option<Box<ast::Expr>>) {
        if let Some(expr) = expr {
            self.visit_expr(expr);
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt) {
        use ast::Stmt;

        match stmt {
            Stmt::Import(ast::StmtImport { names, .. }) => {
                for alias in names {
                    self.check_import(alias.name.as_str());
                }
            }
            Stmt::ImportFrom(ast::StmtImportFrom { module, .. }) => {
                if let Some(module) = module {
                    self.check_import(module.as_str());
                }
            }
            Stmt::FunctionDef(ast::StmtFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            })
            | Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
                args,
                body,
                decorator_list,
                returns,
                ..
            }) => {
                self.visit_exprs(decorator_list);
                self.visit_arguments(args);
                self.visit_opt(returns);
                self.visit_body(body);
            }
            Stmt::ClassDef(ast::StmtClassDef {
                bases,
                keywords,
                body,
                decorator_list,
                ..
            }) => {
                self.visit_exprs(decorator_list);
                self.visit_exprs(bases);
                self.visit_keywords(keywords);
                self.visit_body(body);
            }
            Stmt::Return(ast::StmtReturn { value, .. }) => self.visit_opt(value),
            Stmt::Delete(ast::StmtDelete { targets, .. }) => self.visit_exprs(targets),
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.visit_exprs(targets);
                self.visit_expr(value);
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                ..
            }) => {
                self.visit_expr(target);
                self.visit_expr(annotation);
                self.visit_opt(value);
            }
            Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            })
            | Stmt::AsyncFor(ast::StmtAsyncFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.visit_expr(target);
                self.visit_expr(iter);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            })
            | Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test);
                self.visit_body(body);
                self.visit_body(orelse);
            }
            Stmt::With(ast::StmtWith { items, body, .. })
            | Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
                for item in items {
                    self.visit_expr(&item.context_expr);
                    self.visit_opt(&item.optional_vars);
                }
                self.visit_body(body);
            }
            Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
                self.visit_expr(subject);
                for case in cases {
                    self.visit_pattern(&case.pattern);
                    self.visit_opt(&case.guard);
                    self.visit_body(&case.body);
                }
            }
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.visit_opt(exc);
                self.visit_opt(cause);
            }
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            })
            | Stmt::TryStar(ast::StmtTryStar {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.visit_body(body);
                for handler in handlers {
                    match handler {
                        ast::ExceptHandler::ExceptHandler(handler) => {
                            self.visit_opt(&handler.type_);
                            self.visit_body(&handler.body);
                        }
                    }
                }
                self.visit_body(orelse);
                self.visit_body(finalbody);
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.visit_expr(test);
                self.visit_opt(msg);
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => self.visit_expr(value),
            _ => {}
        }
    }

    /// Value and class patterns hold ordinary expressions (`case os.sep:`)
    fn visit_pattern(&mut self, pattern: &ast::Pattern) {
        use ast::Pattern;

        match pattern {
            Pattern::MatchValue(ast::PatternMatchValue { value, .. }) => self.visit_expr(value),
            Pattern::MatchSequence(ast::PatternMatchSequence { patterns, .. })
            | Pattern::MatchOr(ast::PatternMatchOr { patterns, .. }) => {
                for pattern in patterns {
                    self.visit_pattern(pattern);
                }
            }
            Pattern::MatchMapping(ast::PatternMatchMapping { keys, patterns, .. }) => {
                self.visit_exprs(keys);
                for pattern in patterns {
                    self.visit_pattern(pattern);
                }
            }
            Pattern::MatchClass(ast::PatternMatchClass {
                cls,
                patterns,
                kwd_patterns,
                ..
            }) => {
                self.visit_expr(cls);
                for pattern in patterns.iter().chain(kwd_patterns) {
                    self.visit_pattern(pattern);
                }
            }
            Pattern::MatchAs(ast::PatternMatchAs { pattern, .. }) => {
                if let Some(pattern) = pattern {
                    self.visit_pattern(pattern);
                }
            }
            Pattern::MatchSingleton(_) | Pattern::MatchStar(_) => {}
        }
    }

    fn visit_expr(&mut self, expr: &ast::Expr) {
        use ast::Expr;

        match expr {
            Expr::Call(ast::ExprCall {
                func,
                args,
                keywords,
                ..
            }) => {
                if let Expr::Name(ast::ExprName { id, .. }) = func.as_ref() {
                    if self.config.is_denied_builtin(id.as_str()) {
                        self.violations
                            .push(format!("builtin not allowed: {}", id.as_str()));
                    }
                }
                self.visit_expr(func);
                self.visit_exprs(args);
                self.visit_keywords(keywords);
            }
            Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                if let Expr::Name(ast::ExprName { id, .. }) = value.as_ref() {
                    if self.config.is_denied_module(id.as_str()) {
                        self.violations.push(format!(
                            "module attribute access not allowed: {}.{}",
                            id.as_str(),
                            attr.as_str()
                        ));
                    }
                }
                self.visit_expr(value);
            }
            Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.visit_exprs(values),
            Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.visit_expr(operand),
            Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.visit_arguments(args);
                self.visit_expr(body);
            }
            Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.visit_expr(test);
                self.visit_expr(body);
                self.visit_expr(orelse);
            }
            Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                for key in keys.iter().flatten() {
                    self.visit_expr(key);
                }
                self.visit_exprs(values);
            }
            Expr::Set(ast::ExprSet { elts, .. })
            | Expr::List(ast::ExprList { elts, .. })
            | Expr::Tuple(ast::ExprTuple { elts, .. }) => self.visit_exprs(elts),
            Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            })
            | Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            })
            | Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.visit_comprehensions(generators);
                self.visit_expr(elt);
            }
            Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.visit_comprehensions(generators);
                self.visit_expr(key);
                self.visit_expr(value);
            }
            Expr::Await(ast::ExprAwait { value, .. })
            | Expr::YieldFrom(ast::ExprYieldFrom { value, .. })
            | Expr::Starred(ast::ExprStarred { value, .. }) => self.visit_expr(value),
            Expr::Yield(ast::ExprYield { value, .. }) => self.visit_opt(value),
            Expr::Compare(ast::ExprCompare {
                left, comparators, ..
            }) => {
                self.visit_expr(left);
                self.visit_exprs(comparators);
            }
            Expr::FormattedValue(ast::ExprFormattedValue {
                value, format_spec, ..
            }) => {
                self.visit_expr(value);
                self.visit_opt(format_spec);
            }
            Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.visit_exprs(values),
            Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.visit_expr(value);
                self.visit_expr(slice);
            }
            Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.visit_opt(lower);
                self.visit_opt(upper);
                self.visit_opt(step);
            }
            _ => {}
        }
    }

    fn visit_keywords(&mut self, keywords: &[ast::Keyword]) {
        for keyword in keywords {
            self.visit_expr(&keyword.value);
        }
    }

    fn visit_comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for generator in generators {
            self.visit_expr(&generator.target);
            self.visit_expr(&generator.iter);
            self.visit_exprs(&generator.ifs);
        }
    }

    fn visit_arguments(&mut self, args: &ast::Arguments) {
        for arg in args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
        {
            self.visit_opt(&arg.def.annotation);
            self.visit_opt(&arg.default);
        }
        for arg in args.vararg.iter().chain(args.kwarg.iter()) {
            self.visit_opt(&arg.annotation);
        }
    }
}
