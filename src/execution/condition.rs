//! Transition Conditions
//!
//! A small, sandboxed expression language for conditional control-flow
//! transitions. A condition may reference at most one free variable,
//! bound at evaluation time to a value supplied by the user.
//!
//! The grammar is in `condition.pest`: `or`/`||`, `and`/`&&`, `not`/`!`,
//! one comparison (`==`, `!=`, `<`, `<=`, `>`, `>=`) per operand pair,
//! numbers, quoted strings, booleans, identifiers and parentheses.
//!
//! # Example
//!
//! ```
//! use expflow::execution::condition::Condition;
//!
//! let condition = Condition::parse("accuracy >= 0.9 and accuracy != 1").unwrap();
//! assert_eq!(condition.placeholder(), Some("accuracy"));
//! assert!(condition.evaluate(Some("0.93")).unwrap());
//! assert!(!condition.evaluate(Some("0.5")).unwrap());
//! ```

use std::cmp::Ordering;
use std::fmt;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "execution/condition.pest"]
struct ConditionParser;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("invalid condition at column {column}: {message}")]
    Syntax { column: usize, message: String },

    #[error("condition references more than one variable: {0} and {1}")]
    MultipleVariables(String, String),

    #[error("condition requires a value for '{0}' but none was supplied")]
    MissingInput(String),

    #[error("empty condition")]
    Empty,
}

impl From<pest::error::Error<Rule>> for ConditionError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let column = match err.line_col {
            pest::error::LineColLocation::Pos((_, col)) => col,
            pest::error::LineColLocation::Span((_, col), _) => col,
        };
        ConditionError::Syntax {
            column,
            message: err.variant.message().into_owned(),
        }
    }
}

fn malformed(pair: &Pair<Rule>, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        column: pair.as_span().start_pos().line_col().1,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Variable(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, ConditionError> {
    match pair.as_rule() {
        Rule::expr | Rule::and_expr => build_chain(pair),
        Rule::not_expr => {
            let outer = pair.clone();
            let mut inner = pair.into_inner();
            match (inner.next(), inner.next()) {
                (Some(op), Some(operand)) if op.as_rule() == Rule::op_not => {
                    Ok(Expr::Not(Box::new(build_expr(operand)?)))
                }
                (Some(comparison), None) => build_expr(comparison),
                _ => Err(malformed(&outer, "malformed negation")),
            }
        }
        Rule::comparison => {
            let outer = pair.clone();
            let mut inner = pair.into_inner();
            let left = match inner.next() {
                Some(left) => build_expr(left)?,
                None => return Err(malformed(&outer, "empty comparison")),
            };
            match (inner.next(), inner.next()) {
                (None, _) => Ok(left),
                (Some(op), Some(right)) => {
                    let op = compare_op(&op)?;
                    Ok(Expr::Compare(Box::new(left), op, Box::new(build_expr(right)?)))
                }
                (Some(op), None) => Err(malformed(&op, "missing right operand")),
            }
        }
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| malformed(&pair, format!("invalid number '{}'", pair.as_str()))),
        Rule::string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Str(text.to_string()))
        }
        Rule::boolean => Ok(Expr::Bool(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::identifier => Ok(Expr::Variable(pair.as_str().to_string())),
        other => Err(malformed(&pair, format!("unexpected {:?}", other))),
    }
}

/// Folds `operand (op operand)*` left-associatively.
fn build_chain(pair: Pair<Rule>) -> Result<Expr, ConditionError> {
    let outer = pair.clone();
    let mut inner = pair.into_inner();
    let mut left = match inner.next() {
        Some(first) => build_expr(first)?,
        None => return Err(malformed(&outer, "empty expression")),
    };

    while let Some(op) = inner.next() {
        let right = match inner.next() {
            Some(right) => build_expr(right)?,
            None => return Err(malformed(&op, "missing right operand")),
        };
        left = match op.as_rule() {
            Rule::op_and => Expr::And(Box::new(left), Box::new(right)),
            Rule::op_or => Expr::Or(Box::new(left), Box::new(right)),
            other => return Err(malformed(&op, format!("unexpected {:?}", other))),
        };
    }

    Ok(left)
}

fn compare_op(pair: &Pair<Rule>) -> Result<CompareOp, ConditionError> {
    match pair.as_rule() {
        Rule::op_eq => Ok(CompareOp::Eq),
        Rule::op_ne => Ok(CompareOp::Ne),
        Rule::op_lt => Ok(CompareOp::Lt),
        Rule::op_le => Ok(CompareOp::Le),
        Rule::op_gt => Ok(CompareOp::Gt),
        Rule::op_ge => Ok(CompareOp::Ge),
        other => Err(malformed(pair, format!("expected comparison, got {:?}", other))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Operand {
    fn from_input(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return Operand::Number(n);
        }
        match trimmed {
            "true" | "True" => Operand::Bool(true),
            "false" | "False" => Operand::Bool(false),
            _ => Operand::Str(trimmed.to_string()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0,
            Operand::Str(s) => !s.is_empty() && s != "false" && s != "0",
        }
    }

    fn as_text(&self) -> String {
        match self {
            Operand::Number(n) => n.to_string(),
            Operand::Str(s) => s.clone(),
            Operand::Bool(b) => b.to_string(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            Operand::Str(s) => s.trim().parse().ok(),
            Operand::Bool(_) => None,
        }
    }

    fn compare(&self, op: CompareOp, other: &Operand) -> bool {
        let ordering = match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (self, other) {
                (Operand::Bool(a), Operand::Bool(b)) => Some(a.cmp(b)),
                _ => Some(self.as_text().cmp(&other.as_text())),
            },
        };

        match (op, ordering) {
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
            (CompareOp::Ne, None) => true,
            (_, None) => false,
        }
    }
}

/// A parsed transition condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
    placeholder: Option<String>,
}

impl Condition {
    /// Parses condition text, rejecting references to more than one variable.
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        if text.trim().is_empty() {
            return Err(ConditionError::Empty);
        }

        let mut pairs = ConditionParser::parse(Rule::condition, text)?;
        let expr = match pairs.next().and_then(|condition| condition.into_inner().next()) {
            Some(expr) => build_expr(expr)?,
            None => return Err(ConditionError::Empty),
        };

        let mut placeholder: Option<String> = None;
        collect_variable(&expr, &mut placeholder)?;

        Ok(Self {
            source: text.trim().to_string(),
            expr,
            placeholder,
        })
    }

    /// The free variable bound to user input, if any.
    pub fn placeholder(&self) -> Option<&str> {
        self.placeholder.as_deref()
    }

    /// Whether evaluation needs a user-supplied value.
    pub fn needs_input(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates with the placeholder bound to `input`.
    pub fn evaluate(&self, input: Option<&str>) -> Result<bool, ConditionError> {
        let bound = match (&self.placeholder, input) {
            (Some(_), Some(value)) => Some(Operand::from_input(value)),
            (Some(name), None) => return Err(ConditionError::MissingInput(name.clone())),
            (None, _) => None,
        };
        Ok(eval(&self.expr, bound.as_ref()).truthy())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_variable(expr: &Expr, found: &mut Option<String>) -> Result<(), ConditionError> {
    match expr {
        Expr::Variable(name) => match found {
            Some(existing) if existing != name => Err(ConditionError::MultipleVariables(
                existing.clone(),
                name.clone(),
            )),
            _ => {
                *found = Some(name.clone());
                Ok(())
            }
        },
        Expr::Not(inner) => collect_variable(inner, found),
        Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
            collect_variable(a, found)?;
            collect_variable(b, found)
        }
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) => Ok(()),
    }
}

fn eval(expr: &Expr, input: Option<&Operand>) -> Operand {
    match expr {
        Expr::Number(n) => Operand::Number(*n),
        Expr::Str(s) => Operand::Str(s.clone()),
        Expr::Bool(b) => Operand::Bool(*b),
        // a missing binding is rejected in `evaluate`
        Expr::Variable(_) => input.cloned().unwrap_or(Operand::Bool(false)),
        Expr::Not(inner) => Operand::Bool(!eval(inner, input).truthy()),
        Expr::And(a, b) => Operand::Bool(eval(a, input).truthy() && eval(b, input).truthy()),
        Expr::Or(a, b) => Operand::Bool(eval(a, input).truthy() || eval(b, input).truthy()),
        Expr::Compare(a, op, b) => {
            Operand::Bool(eval(a, input).compare(*op, &eval(b, input)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(text: &str, input: &str) -> bool {
        Condition::parse(text).unwrap().evaluate(Some(input)).unwrap()
    }

    #[test]
    fn test_string_equality() {
        assert!(check("answer == 'yes'", "yes"));
        assert!(check("answer == \"yes\"", " yes "));
        assert!(!check("answer == 'yes'", "no"));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(check("x > 3", "10"));
        assert!(!check("x > 3", "2.5"));
        assert!(check("x <= -1", "-1"));
        assert!(check("x == 2", "2.0"));
    }

    #[test]
    fn test_numeric_compare_not_lexicographic() {
        // "10" < "9" as text, but not as numbers
        assert!(check("x > 9", "10"));
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        assert!(check("x > 1 and x < 5", "3"));
        assert!(!check("x > 1 && x < 5", "7"));
        assert!(check("x == 'a' or x == 'b'", "b"));
        assert!(check("not x == 'a'", "c"));
        assert!(check("!(x == 'a' || x == 'b')", "c"));
        // and binds tighter than or
        assert!(check("x == 1 or x == 2 and x == 3", "1"));
    }

    #[test]
    fn test_bare_variable_truthiness() {
        assert!(check("proceed", "true"));
        assert!(check("proceed", "yes"));
        assert!(!check("proceed", "false"));
        assert!(!check("proceed", "0"));
        assert!(!check("proceed", ""));
    }

    #[test]
    fn test_constant_condition_needs_no_input() {
        let condition = Condition::parse("1 < 2").unwrap();
        assert!(!condition.needs_input());
        assert!(condition.evaluate(None).unwrap());
        assert!(!Condition::parse("false").unwrap().evaluate(None).unwrap());
    }

    #[test]
    fn test_missing_input_is_error() {
        let condition = Condition::parse("x == 1").unwrap();
        assert_eq!(
            condition.evaluate(None),
            Err(ConditionError::MissingInput("x".to_string()))
        );
    }

    #[test]
    fn test_single_variable_enforced() {
        assert!(Condition::parse("x == 1 and x != 2").is_ok());
        assert_eq!(
            Condition::parse("x == y"),
            Err(ConditionError::MultipleVariables("x".to_string(), "y".to_string()))
        );
    }

    #[test]
    fn test_rejects_code_like_input() {
        assert!(Condition::parse("__import__('os')").is_err());
        assert!(Condition::parse("x; rm").is_err());
        assert!(Condition::parse("x + 1 > 2").is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(Condition::parse("   "), Err(ConditionError::Empty));
        for text in ["(x == 1", "x == 'open", "x == 1 1", "x = 1", "x == ", "and x"] {
            assert!(
                matches!(Condition::parse(text), Err(ConditionError::Syntax { .. })),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_syntax_error_reports_column() {
        match Condition::parse("x == 1 1") {
            Err(ConditionError::Syntax { column, .. }) => assert!(column >= 7, "{}", column),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let err = Condition::parse("order == 'asc' or nothing").unwrap_err();
        assert_eq!(
            err,
            ConditionError::MultipleVariables("order".to_string(), "nothing".to_string())
        );
        assert_eq!(
            Condition::parse("trueish").unwrap().placeholder(),
            Some("trueish")
        );
        assert!(check("android == 'x'", "x"));
    }

    #[test]
    fn test_number_forms() {
        assert!(check("x == 1e3", "1000"));
        assert!(check("x < .5", "0.25"));
        assert!(check("x>-2", "-1"));
    }

    #[test]
    fn test_placeholder_and_source() {
        let condition = Condition::parse("  score >= 0.5 ").unwrap();
        assert_eq!(condition.placeholder(), Some("score"));
        assert_eq!(condition.source(), "score >= 0.5");
        assert_eq!(condition.to_string(), "score >= 0.5");
    }
}
