//! pest-based parser for APIthon.
//!
//! Source is parsed as the body of a function, so a top-level `return` is
//! legal. The `layout` rule first blanks out comments, explicit line joins and
//! line breaks inside brackets without moving any byte; `body` then parses the
//! blanked text and the builder below turns its pairs into an [`ast::Module`].
//! Line numbers always come from byte offsets in the original source.
//!
//! [`ast::Module`]: super::ast::Module

use lazy_static::lazy_static;
use pest::error::{ErrorVariant, InputLocation};
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use super::ast::*;
use super::semantic;
use super::SyntaxError;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "apithon/apithon.pest"]
struct ApithonParser;

type ParseResult<T> = Result<T, SyntaxError>;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Deepest bracket or indentation nesting accepted
const MAX_NESTING: usize = 50;

/// Longest run of prefix operators, `**`, lambdas or conditionals in one expression
const MAX_CHAIN: usize = 100;

lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::op_or, Assoc::Left))
        .op(Op::infix(Rule::op_and, Assoc::Left))
        .op(Op::prefix(Rule::op_not))
        .op(Op::infix(Rule::op_in, Assoc::Left)
            | Op::infix(Rule::op_not_in, Assoc::Left)
            | Op::infix(Rule::op_is, Assoc::Left)
            | Op::infix(Rule::op_is_not, Assoc::Left)
            | Op::infix(Rule::op_lt, Assoc::Left)
            | Op::infix(Rule::op_le, Assoc::Left)
            | Op::infix(Rule::op_gt, Assoc::Left)
            | Op::infix(Rule::op_ge, Assoc::Left)
            | Op::infix(Rule::op_eq, Assoc::Left)
            | Op::infix(Rule::op_ne, Assoc::Left))
        .op(Op::infix(Rule::op_bitor, Assoc::Left))
        .op(Op::infix(Rule::op_bitxor, Assoc::Left))
        .op(Op::infix(Rule::op_bitand, Assoc::Left))
        .op(Op::infix(Rule::op_lshift, Assoc::Left) | Op::infix(Rule::op_rshift, Assoc::Left))
        .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
        .op(Op::infix(Rule::op_mul, Assoc::Left)
            | Op::infix(Rule::op_matmul, Assoc::Left)
            | Op::infix(Rule::op_div, Assoc::Left)
            | Op::infix(Rule::op_floordiv, Assoc::Left)
            | Op::infix(Rule::op_mod, Assoc::Left))
        .op(Op::prefix(Rule::op_neg) | Op::prefix(Rule::op_pos) | Op::prefix(Rule::op_invert))
        .op(Op::infix(Rule::op_pow, Assoc::Right))
        .op(Op::prefix(Rule::op_await));
}

/* ===================== Public API ===================== */

/// Whether `name` is a reserved word
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parse APIthon source as a function body
///
/// Layout errors (unbalanced brackets, unterminated strings) win over grammar
/// errors, which win over the checks in [`semantic`].
pub fn parse_apithon_body(code: &str) -> Result<Module, SyntaxError> {
    let lines = LineIndex::new(code);
    let text = blank_layout(code, &lines)?;
    check_indentation(&text, &lines)?;

    let body = ApithonParser::parse(Rule::body, &text)
        .map_err(|err| parse_failure(&err, &text, &lines))?
        .next()
        .ok_or_else(|| SyntaxError::new(1, "invalid syntax"))?;

    let module = Builder { lines: &lines }.module(body)?;
    semantic::check_module(&module)?;
    Ok(module)
}

/* ===================== Layout ===================== */

/// Byte offset to line number lookup over the original source
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(index, _)| index + 1));
        LineIndex { starts }
    }

    /// 1-based line holding `offset`
    fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset)
    }
}

/// Copy of `code` with comments, line joins and bracketed line breaks turned
/// into spaces; every other byte stays where it was
fn blank_layout(code: &str, lines: &LineIndex) -> ParseResult<String> {
    let layout = ApithonParser::parse(Rule::layout, code).map_err(|err| parse_failure(&err, code, lines))?;
    let mut text = code.as_bytes().to_vec();
    let mut open: Vec<(&str, usize)> = Vec::new();

    for token in layout.flatten() {
        let span = token.as_span();
        let line = lines.line(span.start());
        match token.as_rule() {
            Rule::comment | Rule::line_join => text[span.start()..span.end()].fill(b' '),
            Rule::line_break if !open.is_empty() => text[span.start()..span.end()].fill(b' '),
            Rule::open_bracket => {
                if open.len() >= MAX_NESTING {
                    return Err(SyntaxError::new(line, "too many nested parentheses"));
                }
                open.push((span.as_str(), span.start()));
            }
            Rule::close_bracket => {
                let closing = span.as_str();
                match open.pop() {
                    Some((opening, _)) if closes(opening, closing) => {}
                    Some((opening, _)) => {
                        return Err(SyntaxError::new(
                            line,
                            format!(
                                "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                closing, opening
                            ),
                        ))
                    }
                    None => return Err(SyntaxError::new(line, format!("unmatched '{}'", closing))),
                }
            }
            Rule::unterminated_string => {
                let message = if span.as_str().ends_with("\"\"\"") || span.as_str().ends_with("'''") {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(SyntaxError::new(line, message));
            }
            _ => {}
        }
    }

    if let Some((opening, start)) = open.last() {
        return Err(SyntaxError::new(
            lines.line(*start),
            format!("'{}' was never closed", opening),
        ));
    }
    String::from_utf8(text).map_err(|_| SyntaxError::new(1, "source is not valid UTF-8"))
}

fn closes(opening: &str, closing: &str) -> bool {
    matches!((opening, closing), ("(", ")") | ("[", "]") | ("{", "}"))
}

/// Indentation levels are counted before parsing so deep blocks fail cleanly
fn check_indentation(text: &str, lines: &LineIndex) -> ParseResult<()> {
    let mut widths = vec![0];
    let mut offset = 0;
    for line in text.split('\n') {
        let content = line.trim_start_matches(|c: char| matches!(c, ' ' | '\t' | '\x0C'));
        let width = line.len() - content.len();
        if !content.trim().is_empty() {
            while widths.last().map_or(false, |&last| last > width) {
                widths.pop();
            }
            if widths.last().map_or(true, |&last| last < width) {
                widths.push(width);
            }
            if widths.len() > MAX_NESTING {
                return Err(SyntaxError::new(
                    lines.line(offset + width),
                    "too many levels of indentation",
                ));
            }
        }
        offset += line.len() + 1;
    }
    Ok(())
}

/* ===================== Error Mapping ===================== */

fn parse_failure(err: &pest::error::Error<Rule>, text: &str, lines: &LineIndex) -> SyntaxError {
    let offset = match err.location {
        InputLocation::Pos(offset) => offset,
        InputLocation::Span((start, _)) => start,
    };
    let message = match &err.variant {
        ErrorVariant::ParsingError { positives, .. } => failure_message(positives, offset, text),
        ErrorVariant::CustomError { message } => message.clone(),
    };
    SyntaxError::new(lines.line(offset), message)
}

/// Message for the rules pest expected at the furthest position it reached
fn failure_message(expected: &[Rule], offset: usize, text: &str) -> String {
    let message = if expected.contains(&Rule::indent) {
        "expected an indented block"
    } else if expected.contains(&Rule::colon) {
        "expected ':'"
    } else if expected.contains(&Rule::kw_except) && !expected.contains(&Rule::kw_else) {
        "expected 'except' or 'finally' block"
    } else if expected == [Rule::EOI] {
        "unexpected indent"
    } else if offset >= text.trim_end().len() {
        "unexpected EOF while parsing"
    } else {
        "invalid syntax"
    };
    message.to_string()
}

/* ===================== AST Builder ===================== */

struct Builder<'a> {
    lines: &'a LineIndex,
}

/// `key: value`, `**mapping` or plain element of a brace display
enum BraceEntry {
    Item(Expr),
    KeyValue(Expr, Expr),
    Unpack(Expr),
}

/// Inner pairs that carry content; keywords, colons and indentation are dropped
fn content<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|inner| !is_marker(inner.as_rule()))
}

fn is_marker(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::colon
            | Rule::indent
            | Rule::EOI
            | Rule::kw_if
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_try
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_with
            | Rule::kw_as
            | Rule::kw_async
            | Rule::kw_def
            | Rule::kw_class
            | Rule::kw_return
            | Rule::kw_raise
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_nonlocal
            | Rule::kw_del
            | Rule::kw_assert
            | Rule::kw_import
            | Rule::kw_lambda
            | Rule::kw_yield
    )
}

fn has(pair: &Pair<'_, Rule>, rule: Rule) -> bool {
    pair.clone().into_inner().any(|inner| inner.as_rule() == rule)
}

fn next_pair<'i>(parts: &mut impl Iterator<Item = Pair<'i, Rule>>, line: usize) -> ParseResult<Pair<'i, Rule>> {
    parts.next().ok_or_else(|| SyntaxError::new(line, "invalid syntax"))
}

fn tuple_or_single(line: usize, mut items: Vec<Expr>, trailing_comma: bool) -> Expr {
    if items.len() == 1 && !trailing_comma {
        if let Some(item) = items.pop() {
            return item;
        }
    }
    Expr::new(line, ExprKind::Tuple(items))
}

/// Literal text between the quotes, prefix dropped
fn string_body(literal: &str) -> &str {
    let quoted = literal.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(body) = quoted.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return body;
        }
    }
    quoted
}

fn alias(pair: Pair<'_, Rule>) -> Alias {
    let mut parts = content(pair);
    let name = parts.next().map(|name| name.as_str().to_string()).unwrap_or_default();
    let asname = parts.next().map(|name| name.as_str().to_string());
    Alias { name, asname }
}

fn names(pair: Pair<'_, Rule>) -> Vec<String> {
    content(pair).map(|name| name.as_str().to_string()).collect()
}

fn is_positional(rule: Rule) -> bool {
    !matches!(rule, Rule::keyword_arg | Rule::kwargs_unpack | Rule::args_unpack)
}

fn comparison_operator(rule: Rule) -> Option<CmpOperator> {
    Some(match rule {
        Rule::op_eq => CmpOperator::Eq,
        Rule::op_ne => CmpOperator::NotEq,
        Rule::op_lt => CmpOperator::Lt,
        Rule::op_le => CmpOperator::LtE,
        Rule::op_gt => CmpOperator::Gt,
        Rule::op_ge => CmpOperator::GtE,
        Rule::op_is => CmpOperator::Is,
        Rule::op_is_not => CmpOperator::IsNot,
        Rule::op_in => CmpOperator::In,
        Rule::op_not_in => CmpOperator::NotIn,
        _ => return None,
    })
}

impl Builder<'_> {
    fn line(&self, pair: &Pair<'_, Rule>) -> usize {
        self.lines.line(pair.as_span().start())
    }

    fn unexpected(&self, pair: &Pair<'_, Rule>) -> SyntaxError {
        SyntaxError::new(self.line(pair), "invalid syntax")
    }

    fn too_deep(line: usize) -> SyntaxError {
        SyntaxError::new(line, "too many nested expressions")
    }

    /// First content pair inside `pair`
    fn first<'i>(&self, pair: Pair<'i, Rule>) -> ParseResult<Pair<'i, Rule>> {
        let line = self.line(&pair);
        next_pair(&mut content(pair), line)
    }

    fn module(&self, body: Pair<'_, Rule>) -> ParseResult<Module> {
        Ok(Module {
            body: self.statements(body)?,
        })
    }

    /* ---------- statements ---------- */

    /// Statements directly inside the body or a suite
    fn statements(&self, pair: Pair<'_, Rule>) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::simple_line => {
                    for simple in inner.into_inner() {
                        body.push(self.simple_statement(simple)?);
                    }
                }
                Rule::indent | Rule::EOI => {}
                _ => body.push(self.compound_statement(inner)?),
            }
        }
        Ok(body)
    }

    /// Body of an `else`/`finally` style clause
    fn clause_body(&self, clause: Pair<'_, Rule>) -> ParseResult<Vec<Stmt>> {
        let line = self.line(&clause);
        let suite = clause
            .into_inner()
            .find(|inner| inner.as_rule() == Rule::suite)
            .ok_or_else(|| SyntaxError::new(line, "expected an indented block"))?;
        self.statements(suite)
    }

    fn simple_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let inner = next_pair(&mut pair.into_inner(), line)?;
        let kind = match inner.as_rule() {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => {
                StmtKind::Return(content(inner).next().map(|value| self.expr(value)).transpose()?)
            }
            Rule::raise_stmt => {
                let mut parts = content(inner);
                let exc = parts.next().map(|value| self.expr(value)).transpose()?;
                let cause = parts.next().map(|value| self.expr(value)).transpose()?;
                StmtKind::Raise { exc, cause }
            }
            Rule::global_stmt => StmtKind::Global(names(inner)),
            Rule::nonlocal_stmt => StmtKind::Nonlocal(names(inner)),
            Rule::del_stmt => {
                let (targets, _) = self.items(self.first(inner)?)?;
                for target in &targets {
                    validate_target(target, "delete")?;
                }
                StmtKind::Delete(targets)
            }
            Rule::assert_stmt => {
                let mut parts = content(inner);
                let test = self.expr(next_pair(&mut parts, line)?)?;
                let msg = parts.next().map(|value| self.expr(value)).transpose()?;
                StmtKind::Assert { test, msg }
            }
            Rule::import_stmt => StmtKind::Import(content(inner).map(alias).collect()),
            Rule::from_import => {
                let mut module = None;
                let mut names = Vec::new();
                let mut level = 0;
                for part in content(inner) {
                    match part.as_rule() {
                        Rule::relative_dots => level = part.as_str().len(),
                        Rule::dotted_name => module = Some(part.as_str().to_string()),
                        Rule::import_all => names.push(Alias {
                            name: "*".to_string(),
                            asname: None,
                        }),
                        _ => names.push(alias(part)),
                    }
                }
                StmtKind::ImportFrom { module, names, level }
            }
            Rule::expr_stmt => self.expression_statement(line, inner)?,
            _ => return Err(self.unexpected(&inner)),
        };
        Ok(Stmt { line, kind })
    }

    fn expression_statement(&self, line: usize, pair: Pair<'_, Rule>) -> ParseResult<StmtKind> {
        let mut parts = pair.into_inner();
        let first = self.expr(next_pair(&mut parts, line)?)?;
        let tails: Vec<Pair<'_, Rule>> = parts.collect();
        let rule = match tails.first() {
            Some(tail) => tail.as_rule(),
            None => return Ok(StmtKind::Expr(first)),
        };

        match rule {
            Rule::assign_tail => {
                let mut targets = vec![first];
                for tail in tails {
                    targets.push(self.expr(self.first(tail)?)?);
                }
                let value = targets
                    .pop()
                    .ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
                for target in &targets {
                    validate_target(target, "assign to")?;
                }
                Ok(StmtKind::Assign { targets, value })
            }
            Rule::aug_tail => {
                if !matches!(
                    first.kind,
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
                ) {
                    return Err(SyntaxError::new(
                        first.line,
                        format!("'{}' is an illegal expression for augmented assignment", first.describe()),
                    ));
                }
                let mut tail = tails.into_iter().flat_map(|tail| tail.into_inner());
                let symbol = next_pair(&mut tail, line)?;
                let op = Operator::from_symbol(symbol.as_str()).ok_or_else(|| self.unexpected(&symbol))?;
                let value = self.expr(next_pair(&mut tail, line)?)?;
                Ok(StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                })
            }
            Rule::ann_tail => {
                match first.kind {
                    ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {}
                    ExprKind::Tuple(_) => {
                        return Err(SyntaxError::new(
                            first.line,
                            "only single target (not tuple) can be annotated",
                        ))
                    }
                    _ => return Err(SyntaxError::new(first.line, "illegal target for annotation")),
                }
                let mut tail = tails.into_iter().flat_map(|tail| tail.into_inner());
                let annotation = self.expr(next_pair(&mut tail, line)?)?;
                let value = tail.next().map(|value| self.expr(value)).transpose()?;
                Ok(StmtKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                })
            }
            _ => Err(SyntaxError::new(line, "invalid syntax")),
        }
    }

    fn compound_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        match pair.as_rule() {
            Rule::if_stmt => self.if_statement(pair),
            Rule::while_stmt => self.while_statement(pair),
            Rule::for_stmt => self.for_statement(pair),
            Rule::try_stmt => self.try_statement(pair),
            Rule::with_stmt => self.with_statement(pair),
            Rule::function_def => self.function_def(pair, Vec::new()),
            Rule::class_def => self.class_def(pair, Vec::new()),
            Rule::decorated => self.decorated(pair),
            _ => Err(self.unexpected(&pair)),
        }
    }

    fn if_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let test = self.expr(self.first(next_pair(&mut parts, line)?)?)?;
        let body = self.statements(next_pair(&mut parts, line)?)?;

        let mut elifs = Vec::new();
        let mut orelse = Vec::new();
        for clause in parts {
            match clause.as_rule() {
                Rule::elif_clause => {
                    let mut inner = clause.into_inner();
                    let head = next_pair(&mut inner, line)?;
                    let head_line = self.line(&head);
                    let test = self.expr(self.first(head)?)?;
                    let body = self.statements(next_pair(&mut inner, head_line)?)?;
                    elifs.push((head_line, test, body));
                }
                Rule::else_clause => orelse = self.clause_body(clause)?,
                _ => return Err(self.unexpected(&clause)),
            }
        }

        for (elif_line, test, body) in elifs.into_iter().rev() {
            orelse = vec![Stmt {
                line: elif_line,
                kind: StmtKind::If { test, body, orelse },
            }];
        }
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn while_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let test = self.expr(self.first(next_pair(&mut parts, line)?)?)?;
        let body = self.statements(next_pair(&mut parts, line)?)?;
        let orelse = parts.next().map(|clause| self.clause_body(clause)).transpose()?;
        Ok(Stmt {
            line,
            kind: StmtKind::While {
                test,
                body,
                orelse: orelse.unwrap_or_default(),
            },
        })
    }

    fn for_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let head = next_pair(&mut parts, line)?;
        let is_async = has(&head, Rule::kw_async);
        let mut head_parts = content(head);
        let target = self.target(next_pair(&mut head_parts, line)?, "assign to")?;
        let iter = self.expr(next_pair(&mut head_parts, line)?)?;
        let body = self.statements(next_pair(&mut parts, line)?)?;
        let orelse = parts.next().map(|clause| self.clause_body(clause)).transpose()?;
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse: orelse.unwrap_or_default(),
                is_async,
            },
        })
    }

    fn try_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        next_pair(&mut parts, line)?;
        let body = self.statements(next_pair(&mut parts, line)?)?;

        let mut handlers: Vec<ExceptHandler> = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();
        for clause in parts {
            match clause.as_rule() {
                Rule::except_clause => {
                    let handler = self.except_handler(clause)?;
                    if handlers.last().map_or(false, |previous| previous.kind.is_none()) {
                        return Err(SyntaxError::new(handler.line, "default 'except:' must be last"));
                    }
                    handlers.push(handler);
                }
                Rule::else_clause => orelse = self.clause_body(clause)?,
                Rule::finally_clause => finalbody = self.clause_body(clause)?,
                _ => return Err(self.unexpected(&clause)),
            }
        }
        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn except_handler(&self, clause: Pair<'_, Rule>) -> ParseResult<ExceptHandler> {
        let mut inner = clause.into_inner();
        let head = next_pair(&mut inner, 1)?;
        let line = self.line(&head);
        let mut kind = None;
        let mut name = None;
        for part in content(head) {
            match part.as_rule() {
                Rule::identifier => name = Some(part.as_str().to_string()),
                _ => kind = Some(self.expr(part)?),
            }
        }
        let body = self.statements(next_pair(&mut inner, line)?)?;
        Ok(ExceptHandler { line, kind, name, body })
    }

    fn with_statement(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let head = next_pair(&mut parts, line)?;
        let is_async = has(&head, Rule::kw_async);

        let mut items = Vec::new();
        for item in content(head) {
            let mut item_parts = content(item);
            let context = self.expr(next_pair(&mut item_parts, line)?)?;
            let target = match item_parts.next() {
                Some(target) => {
                    let target = self.expr(target)?;
                    validate_target(&target, "assign to")?;
                    Some(target)
                }
                None => None,
            };
            items.push(WithItem { context, target });
        }

        let body = self.statements(next_pair(&mut parts, line)?)?;
        Ok(Stmt {
            line,
            kind: StmtKind::With { items, body, is_async },
        })
    }

    fn decorated(&self, pair: Pair<'_, Rule>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut decorators = Vec::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::decorator => {
                    let expr = self.first(self.first(part)?)?;
                    decorators.push(self.expr(expr)?);
                }
                Rule::function_def => return self.function_def(part, decorators),
                Rule::class_def => return self.class_def(part, decorators),
                _ => return Err(self.unexpected(&part)),
            }
        }
        Err(SyntaxError::new(line, "invalid syntax"))
    }

    fn function_def(&self, pair: Pair<'_, Rule>, decorators: Vec<Expr>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let head = next_pair(&mut parts, line)?;
        let is_async = has(&head, Rule::kw_async);

        let mut name = String::new();
        let mut params = Vec::new();
        let mut returns = None;
        for part in content(head) {
            match part.as_rule() {
                Rule::identifier => name = part.as_str().to_string(),
                Rule::parameters => params = self.parameters(part)?,
                Rule::returns => returns = Some(self.expr(self.first(part)?)?),
                _ => return Err(self.unexpected(&part)),
            }
        }

        let body = self.statements(next_pair(&mut parts, line)?)?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef {
                name,
                params,
                returns,
                decorators,
                body,
                is_async,
            },
        })
    }

    fn class_def(&self, pair: Pair<'_, Rule>, decorators: Vec<Expr>) -> ParseResult<Stmt> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let mut head = content(next_pair(&mut parts, line)?);
        let name = next_pair(&mut head, line)?.as_str().to_string();
        let (bases, keywords) = self.arguments(head, line)?;
        let body = self.statements(next_pair(&mut parts, line)?)?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef {
                name,
                bases,
                keywords,
                decorators,
                body,
            },
        })
    }

    /// Parameters of a `def` or a `lambda`
    fn parameters(&self, list: Pair<'_, Rule>) -> ParseResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        let mut keyword_only = false;
        let mut seen_default = false;

        for item in list.into_inner() {
            let line = self.line(&item);
            let kind = match item.as_rule() {
                Rule::param_slash => continue,
                Rule::param_varargs | Rule::lambda_varargs => {
                    keyword_only = true;
                    ParamKind::VarArgs
                }
                Rule::param_kwargs | Rule::lambda_kwargs => ParamKind::KwArgs,
                _ => ParamKind::Normal,
            };

            let mut name = None;
            let mut annotation = None;
            let mut default = None;
            for part in item.into_inner() {
                match part.as_rule() {
                    Rule::identifier => name = Some(part.as_str().to_string()),
                    Rule::param_annotation => annotation = Some(self.expr(self.first(part)?)?),
                    Rule::param_default => default = Some(self.expr(self.first(part)?)?),
                    _ => {}
                }
            }
            // bare `*` only marks the start of keyword-only parameters
            let name = match name {
                Some(name) => name,
                None => continue,
            };

            if kind == ParamKind::Normal && !keyword_only {
                if default.is_some() {
                    seen_default = true;
                } else if seen_default {
                    return Err(SyntaxError::new(
                        line,
                        "parameter without a default follows parameter with a default",
                    ));
                }
            }
            if params.iter().any(|param| param.name == name) {
                return Err(SyntaxError::new(
                    line,
                    format!("duplicate argument '{}' in function definition", name),
                ));
            }
            params.push(Param {
                name,
                kind,
                annotation,
                default,
            });
        }
        Ok(params)
    }

    /* ---------- targets ---------- */

    /// Items of a comma list and whether it ended with a trailing comma
    fn items(&self, pair: Pair<'_, Rule>) -> ParseResult<(Vec<Expr>, bool)> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::trailing_comma {
                trailing_comma = true;
            } else {
                items.push(self.expr(part)?);
            }
        }
        Ok((items, trailing_comma))
    }

    /// `for`/comprehension target list
    fn target(&self, pair: Pair<'_, Rule>, verb: &str) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let (items, trailing_comma) = self.items(pair)?;
        let target = tuple_or_single(line, items, trailing_comma);
        validate_target(&target, verb)?;
        Ok(target)
    }

    /* ---------- expressions ---------- */

    fn expr(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        match pair.as_rule() {
            Rule::expression => self.conditional(pair),
            Rule::disjunction => self.disjunction(pair),
            Rule::primary => self.primary(pair),
            Rule::star_expressions => {
                let (items, trailing_comma) = self.items(pair)?;
                Ok(tuple_or_single(line, items, trailing_comma))
            }
            Rule::starred | Rule::starred_target => {
                let value = self.expr(self.first(pair)?)?;
                Ok(Expr::new(line, ExprKind::Starred(value.boxed())))
            }
            Rule::walrus => {
                let mut parts = pair.into_inner();
                let name = next_pair(&mut parts, line)?.as_str().to_string();
                let value = self.expr(next_pair(&mut parts, line)?)?;
                Ok(Expr::new(
                    line,
                    ExprKind::NamedExpr {
                        target: Expr::new(line, ExprKind::Name(name)).boxed(),
                        value: value.boxed(),
                    },
                ))
            }
            Rule::yield_expr => {
                let kind = match content(pair).next() {
                    None => ExprKind::Yield(None),
                    Some(value) if value.as_rule() == Rule::yield_from => {
                        ExprKind::YieldFrom(self.expr(self.first(value)?)?.boxed())
                    }
                    Some(value) => ExprKind::Yield(Some(self.expr(value)?.boxed())),
                };
                Ok(Expr::new(line, kind))
            }
            _ => Err(self.unexpected(&pair)),
        }
    }

    /// Folds `lambda` heads and `if ... else` tails around the disjunctions
    fn conditional(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut heads = Vec::new();
        let mut value = None;
        let mut tails = Vec::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::lambda_head => heads.push(part),
                Rule::disjunction => value = Some(self.disjunction(part)?),
                Rule::cond_tail => tails.push(part),
                _ => return Err(self.unexpected(&part)),
            }
        }
        let value = value.ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        if heads.is_empty() && tails.is_empty() {
            return Ok(value);
        }

        // segment i is `heads_i body_i`; test i sits between body i and segment i + 1
        let mut chain = heads.len() + tails.len();
        let mut segments = vec![(heads, value)];
        let mut tests = Vec::new();
        for tail in tails {
            let tail_line = self.line(&tail);
            let mut tail_heads = Vec::new();
            let mut operands = Vec::new();
            for part in content(tail) {
                match part.as_rule() {
                    Rule::lambda_head => tail_heads.push(part),
                    _ => operands.push(self.disjunction(part)?),
                }
            }
            chain += tail_heads.len();
            let mut operands = operands.into_iter();
            let test = operands.next().ok_or_else(|| SyntaxError::new(tail_line, "invalid syntax"))?;
            let orelse = operands.next().ok_or_else(|| SyntaxError::new(tail_line, "invalid syntax"))?;
            tests.push(test);
            segments.push((tail_heads, orelse));
        }
        if chain > MAX_CHAIN {
            return Err(Self::too_deep(line));
        }

        let (last_heads, last_value) = segments
            .pop()
            .ok_or_else(|| SyntaxError::new(line, "invalid syntax"))?;
        let mut folded = self.wrap_lambdas(last_heads, last_value)?;
        while let (Some((heads, body)), Some(test)) = (segments.pop(), tests.pop()) {
            let if_line = body.line;
            folded = Expr::new(
                if_line,
                ExprKind::IfExp {
                    test: test.boxed(),
                    body: body.boxed(),
                    orelse: folded.boxed(),
                },
            );
            folded = self.wrap_lambdas(heads, folded)?;
        }
        Ok(folded)
    }

    fn wrap_lambdas(&self, heads: Vec<Pair<'_, Rule>>, mut body: Expr) -> ParseResult<Expr> {
        for head in heads.into_iter().rev() {
            let line = self.line(&head);
            let params = match content(head).next() {
                Some(list) => self.parameters(list)?,
                None => Vec::new(),
            };
            body = Expr::new(
                line,
                ExprKind::Lambda {
                    params,
                    body: body.boxed(),
                },
            );
        }
        Ok(body)
    }

    /// Operator precedence over the flat operand/operator sequence
    fn disjunction(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut sequence = Vec::new();
        let mut powers = 0;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::operand => {
                    let mut prefixes = 0;
                    for piece in part.into_inner() {
                        if piece.as_rule() != Rule::primary {
                            prefixes += 1;
                        }
                        sequence.push(piece);
                    }
                    if prefixes > MAX_CHAIN {
                        return Err(Self::too_deep(line));
                    }
                }
                Rule::op_pow => {
                    powers += 1;
                    sequence.push(part);
                }
                _ => sequence.push(part),
            }
        }
        if powers > MAX_CHAIN {
            return Err(Self::too_deep(line));
        }

        PRATT_PARSER
            .map_primary(|primary| self.primary(primary))
            .map_prefix(|op, operand| self.prefix(op, operand?))
            .map_infix(|left, op, right| self.infix(left?, op, right?))
            .parse(sequence.into_iter())
    }

    fn prefix(&self, op: Pair<'_, Rule>, operand: Expr) -> ParseResult<Expr> {
        let line = self.line(&op);
        let unary = match op.as_rule() {
            Rule::op_not => UnaryOperator::Not,
            Rule::op_neg => UnaryOperator::USub,
            Rule::op_pos => UnaryOperator::UAdd,
            Rule::op_invert => UnaryOperator::Invert,
            Rule::op_await => return Ok(Expr::new(line, ExprKind::Await(operand.boxed()))),
            _ => return Err(self.unexpected(&op)),
        };
        Ok(Expr::new(
            line,
            ExprKind::UnaryOp {
                op: unary,
                operand: operand.boxed(),
            },
        ))
    }

    /// Boolean and comparison chains are flattened the way the host AST does
    fn infix(&self, left: Expr, op: Pair<'_, Rule>, right: Expr) -> ParseResult<Expr> {
        let line = left.line;
        let rule = op.as_rule();

        let bool_op = match rule {
            Rule::op_and => Some(BoolOperator::And),
            Rule::op_or => Some(BoolOperator::Or),
            _ => None,
        };
        if let Some(bool_op) = bool_op {
            let kind = match left.kind {
                ExprKind::BoolOp { op, mut values } if op == bool_op => {
                    values.push(right);
                    ExprKind::BoolOp { op, values }
                }
                kind => ExprKind::BoolOp {
                    op: bool_op,
                    values: vec![Expr::new(line, kind), right],
                },
            };
            return Ok(Expr::new(line, kind));
        }

        if let Some(cmp) = comparison_operator(rule) {
            let kind = match left.kind {
                ExprKind::Compare {
                    left: first,
                    mut ops,
                    mut comparators,
                } => {
                    ops.push(cmp);
                    comparators.push(right);
                    ExprKind::Compare {
                        left: first,
                        ops,
                        comparators,
                    }
                }
                kind => ExprKind::Compare {
                    left: Expr::new(line, kind).boxed(),
                    ops: vec![cmp],
                    comparators: vec![right],
                },
            };
            return Ok(Expr::new(line, kind));
        }

        let op = Operator::from_symbol(op.as_str()).ok_or_else(|| self.unexpected(&op))?;
        Ok(Expr::new(
            line,
            ExprKind::BinOp {
                left: left.boxed(),
                op,
                right: right.boxed(),
            },
        ))
    }

    fn primary(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let mut expr = self.atom(next_pair(&mut parts, line)?)?;
        for trailer in parts {
            let trailer_line = self.line(&trailer);
            let kind = match trailer.as_rule() {
                Rule::attribute => ExprKind::Attribute {
                    attr: self.first(trailer)?.as_str().to_string(),
                    value: expr.boxed(),
                },
                Rule::call => {
                    let (args, keywords) = self.arguments(trailer.into_inner(), trailer_line)?;
                    ExprKind::Call {
                        func: expr.boxed(),
                        args,
                        keywords,
                    }
                }
                Rule::subscript => ExprKind::Subscript {
                    index: self.subscript(trailer)?.boxed(),
                    value: expr.boxed(),
                },
                _ => return Err(self.unexpected(&trailer)),
            };
            expr = Expr::new(line, kind);
        }
        Ok(expr)
    }

    /// Call or class-base arguments
    fn arguments<'i>(
        &self,
        parts: impl Iterator<Item = Pair<'i, Rule>>,
        line: usize,
    ) -> ParseResult<(Vec<Expr>, Vec<Keyword>)> {
        let parts: Vec<Pair<'i, Rule>> = parts.collect();
        if let Some(position) = parts.iter().position(|part| part.as_rule() == Rule::comprehension) {
            // a generator is only a bare argument when it is the sole one
            let sole = position == 1 && parts.len() == 2 && is_positional(parts[0].as_rule());
            if !sole {
                return Err(SyntaxError::new(
                    self.line(&parts[position]),
                    "Generator expression must be parenthesized",
                ));
            }
            let mut parts = parts.into_iter();
            let elt = self.expr(next_pair(&mut parts, line)?)?;
            let generators = self.comprehension(next_pair(&mut parts, line)?)?;
            let elt_line = elt.line;
            let generator = Expr::new(
                elt_line,
                ExprKind::GeneratorExp {
                    elt: elt.boxed(),
                    generators,
                },
            );
            return Ok((vec![generator], Vec::new()));
        }

        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        for part in parts {
            let part_line = self.line(&part);
            match part.as_rule() {
                Rule::keyword_arg => {
                    let mut inner = part.into_inner();
                    let arg = next_pair(&mut inner, part_line)?.as_str().to_string();
                    let value = self.expr(next_pair(&mut inner, part_line)?)?;
                    keywords.push(Keyword { arg: Some(arg), value });
                }
                Rule::kwargs_unpack => {
                    let value = self.expr(self.first(part)?)?;
                    keywords.push(Keyword { arg: None, value });
                }
                Rule::args_unpack => {
                    if keywords.iter().any(|keyword| keyword.arg.is_none()) {
                        return Err(SyntaxError::new(
                            part_line,
                            "iterable argument unpacking follows keyword argument unpacking",
                        ));
                    }
                    let value = self.expr(self.first(part)?)?;
                    args.push(Expr::new(part_line, ExprKind::Starred(value.boxed())));
                }
                _ => {
                    if !keywords.is_empty() {
                        let message = if keywords.iter().any(|keyword| keyword.arg.is_none()) {
                            "positional argument follows keyword argument unpacking"
                        } else {
                            "positional argument follows keyword argument"
                        };
                        return Err(SyntaxError::new(part_line, message));
                    }
                    args.push(self.expr(part)?);
                }
            }
        }
        Ok((args, keywords))
    }

    fn subscript(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut items = Vec::new();
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => trailing_comma = true,
                Rule::slice_expr => items.push(self.slice(part)?),
                _ => items.push(self.expr(part)?),
            }
        }
        Ok(tuple_or_single(line, items, trailing_comma))
    }

    fn slice(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut lower = None;
        for part in pair.into_inner() {
            if part.as_rule() != Rule::slice_rest {
                lower = Some(self.expr(part)?);
                continue;
            }
            let mut upper = None;
            let mut step = None;
            for bound in part.into_inner() {
                let rule = bound.as_rule();
                let value = self.expr(self.first(bound)?)?.boxed();
                if rule == Rule::slice_upper {
                    upper = Some(value);
                } else {
                    step = Some(value);
                }
            }
            return Ok(Expr::new(
                line,
                ExprKind::Slice {
                    lower: lower.map(Expr::boxed),
                    upper,
                    step,
                },
            ));
        }
        lower.ok_or_else(|| SyntaxError::new(line, "invalid syntax"))
    }

    fn comprehension(&self, pair: Pair<'_, Rule>) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        for clause in pair.into_inner() {
            let line = self.line(&clause);
            let is_async = has(&clause, Rule::kw_async);
            let mut parts = content(clause);
            let target = self.target(next_pair(&mut parts, line)?, "assign to")?;
            let iter = self.expr(next_pair(&mut parts, line)?)?;
            let ifs = parts
                .map(|condition| self.first(condition).and_then(|test| self.expr(test)))
                .collect::<ParseResult<Vec<_>>>()?;
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    /// Element of a comprehension display
    fn element(items: Vec<Expr>, line: usize) -> ParseResult<Box<Expr>> {
        match items.into_iter().next() {
            Some(elt) if matches!(elt.kind, ExprKind::Starred(_)) => Err(SyntaxError::new(
                elt.line,
                "iterable unpacking cannot be used in comprehension",
            )),
            Some(elt) => Ok(elt.boxed()),
            None => Err(SyntaxError::new(line, "invalid syntax")),
        }
    }

    /* ---------- atoms ---------- */

    fn atom(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let kind = match pair.as_rule() {
            Rule::identifier => ExprKind::Name(pair.as_str().to_string()),
            Rule::number => ExprKind::Constant(Constant::Number(pair.as_str().to_string())),
            // adjacent literals concatenate
            Rule::strings => ExprKind::Constant(Constant::Str(
                pair.into_inner().map(|literal| string_body(literal.as_str())).collect(),
            )),
            Rule::kw_none => ExprKind::Constant(Constant::None),
            Rule::kw_true => ExprKind::Constant(Constant::Bool(true)),
            Rule::kw_false => ExprKind::Constant(Constant::Bool(false)),
            Rule::ellipsis => ExprKind::Constant(Constant::Ellipsis),
            Rule::paren_atom => return self.paren_atom(pair),
            Rule::list_atom => return self.list_atom(pair),
            Rule::brace_atom => return self.brace_atom(pair),
            _ => return Err(self.unexpected(&pair)),
        };
        Ok(Expr::new(line, kind))
    }

    /// Items, comprehension clauses and trailing comma of a `(...)`/`[...]` display
    fn elements(&self, pair: Pair<'_, Rule>) -> ParseResult<(Vec<Expr>, Option<Vec<Comprehension>>, bool)> {
        let mut items = Vec::new();
        let mut generators = None;
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::comprehension => generators = Some(self.comprehension(part)?),
                Rule::trailing_comma => trailing_comma = true,
                _ => items.push(self.expr(part)?),
            }
        }
        Ok((items, generators, trailing_comma))
    }

    fn paren_atom(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let inner = match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Ok(Expr::new(line, ExprKind::Tuple(Vec::new()))),
        };
        if inner.as_rule() == Rule::yield_expr {
            return self.expr(inner);
        }

        let (items, generators, trailing_comma) = self.elements(inner)?;
        if let Some(generators) = generators {
            return Ok(Expr::new(
                line,
                ExprKind::GeneratorExp {
                    elt: Self::element(items, line)?,
                    generators,
                },
            ));
        }
        if !trailing_comma && items.len() == 1 && matches!(items[0].kind, ExprKind::Starred(_)) {
            return Err(SyntaxError::new(line, "cannot use starred expression here"));
        }
        Ok(tuple_or_single(line, items, trailing_comma))
    }

    fn list_atom(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let inner = match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Ok(Expr::new(line, ExprKind::List(Vec::new()))),
        };
        let (items, generators, _) = self.elements(inner)?;
        let kind = match generators {
            Some(generators) => ExprKind::ListComp {
                elt: Self::element(items, line)?,
                generators,
            },
            None => ExprKind::List(items),
        };
        Ok(Expr::new(line, kind))
    }

    /// Dict or set display; the first entry decides which
    fn brace_atom(&self, pair: Pair<'_, Rule>) -> ParseResult<Expr> {
        let line = self.line(&pair);
        let mut entries = Vec::new();
        let mut generators = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::dict_value => {
                    let value = self.expr(self.first(part)?)?;
                    match entries.pop() {
                        Some(BraceEntry::Item(key)) => entries.push(BraceEntry::KeyValue(key, value)),
                        _ => return Err(SyntaxError::new(value.line, "invalid syntax")),
                    }
                }
                Rule::dict_unpack => entries.push(BraceEntry::Unpack(self.expr(self.first(part)?)?)),
                Rule::comprehension => generators = Some(self.comprehension(part)?),
                _ => entries.push(BraceEntry::Item(self.expr(part)?)),
            }
        }

        if let Some(BraceEntry::Item(_)) = entries.first() {
            let mut items = Vec::new();
            for entry in entries {
                match entry {
                    BraceEntry::Item(item) => items.push(item),
                    BraceEntry::KeyValue(key, _) | BraceEntry::Unpack(key) => {
                        return Err(SyntaxError::new(key.line, "invalid syntax"))
                    }
                }
            }
            let kind = match generators {
                Some(generators) => ExprKind::SetComp {
                    elt: Self::element(items, line)?,
                    generators,
                },
                None => ExprKind::Set(items),
            };
            return Ok(Expr::new(line, kind));
        }

        let mut keys = Vec::new();
        let mut values = Vec::new();
        for entry in entries {
            match entry {
                BraceEntry::KeyValue(key, value) if !matches!(key.kind, ExprKind::Starred(_)) => {
                    keys.push(Some(key));
                    values.push(value);
                }
                BraceEntry::Unpack(value) => {
                    keys.push(None);
                    values.push(value);
                }
                BraceEntry::KeyValue(key, _) | BraceEntry::Item(key) => {
                    return Err(SyntaxError::new(key.line, "invalid syntax"))
                }
            }
        }
        let generators = match generators {
            Some(generators) => generators,
            None => return Ok(Expr::new(line, ExprKind::Dict { keys, values })),
        };
        match (keys.pop(), values.pop()) {
            (Some(Some(key)), Some(value)) if keys.is_empty() => Ok(Expr::new(
                line,
                ExprKind::DictComp {
                    key: key.boxed(),
                    value: value.boxed(),
                    generators,
                },
            )),
            _ => Err(SyntaxError::new(
                line,
                "dict unpacking cannot be used in dict comprehension",
            )),
        }
    }
}

/// Check that `target` may appear on the left of an assignment (or in `del`)
fn validate_target(target: &Expr, verb: &str) -> ParseResult<()> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Starred(inner) if verb != "delete" => validate_target(inner, verb),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            items.iter().try_for_each(|item| validate_target(item, verb))
        }
        _ => Err(SyntaxError::new(
            target.line,
            format!("cannot {} {}", verb, target.describe()),
        )),
    }
}
