//! SQL Validator
//!
//! Mandatory gate between generation and execution. A lexical pre-pass
//! rejects separators, comments and DDL/DML keywords anywhere in the text;
//! the statement is then parsed with the PostgreSQL dialect and checked for
//! shape, whitelisted identifiers, bound parameters and a time bound.
//!
//! [`AcceptedSql`] can only be built here, and executors take nothing else.

use crate::generation::{BoundParameter, CandidateSql};
use crate::query_spec::ComparisonMode;
use crate::registry::SchemaWhitelist;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, BinaryOperator, Expr, Query, SelectItem, SetExpr, Statement, TableFactor, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use thiserror::Error;

lazy_static! {
    static ref FORBIDDEN_KEYWORD_RE: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|GRANT|REVOKE|EXEC|EXECUTE|CREATE|MERGE|COPY|CALL|COMMENT|LOCK|VACUUM|REINDEX|DO)\b"
    )
    .expect("valid keyword pattern");

    /// DDL/DML phrasing in a raw question, e.g. "drop table", "delete from"
    static ref INPUT_STATEMENT_RE: Regex = Regex::new(
        r"(?i)\b(drop|delete|insert|update|truncate|alter|grant|revoke|exec|execute|create)\s+(table|from|into|database|schema|index|view|user|role|function|procedure|set|all)\b|\bunion\s+(all\s+)?select\b|\bselect\s+(?:\*|\w+(?:\s*,\s*\w+)+)\s+from\b"
    )
    .expect("valid input screening pattern");

    /// SQL vocabulary that turns a separator or comment marker into an injection shape
    static ref INPUT_SQL_WORD_RE: Regex = Regex::new(
        r"(?i)\b(select|insert|update|delete|drop|alter|truncate|grant|revoke|exec|execute|create|union|table)\b"
    )
    .expect("valid input sql word pattern");
}

const ALLOWED_FUNCTIONS: &[&str] = &["AVG", "SUM", "MIN", "MAX", "COUNT"];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("more than one statement")]
    MultipleStatements,
    #[error("comment in statement")]
    Comment,
    #[error("forbidden keyword {0}")]
    ForbiddenKeyword(String),
    #[error("statement does not parse: {0}")]
    Unparseable(String),
    #[error("statement is not a plain SELECT")]
    NotASelect,
    #[error("set operation")]
    SetOperation,
    #[error("common table expression")]
    CommonTableExpression,
    #[error("subquery or derived table")]
    Subquery,
    #[error("table {0} is not whitelisted")]
    UnknownTable(String),
    #[error("column {0} is not whitelisted")]
    UnknownColumn(String),
    #[error("function {0} is not allowed")]
    DisallowedFunction(String),
    #[error("inline literal {0}")]
    InlineLiteral(String),
    #[error("placeholders do not match bound parameters: {0}")]
    PlaceholderMismatch(String),
    #[error("no predicate on time column {0}")]
    MissingTimePredicate(String),
    #[error("input looks like SQL: {0}")]
    SuspiciousInput(String),
}

/// SQL that passed every check. Only the validator constructs it.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedSql {
    candidate: CandidateSql,
}

impl AcceptedSql {
    pub fn statement(&self) -> &str {
        &self.candidate.statement
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        &self.candidate.parameters
    }

    pub fn candidate(&self) -> &CandidateSql {
        &self.candidate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationVerdict {
    Accepted(AcceptedSql),
    Rejected(RejectionReason),
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationVerdict::Accepted(_))
    }
}

/// Screen the raw question before it reaches the parser
///
/// Separators and comment markers alone are ordinary punctuation ("2023--2024");
/// they only count next to a quote or SQL vocabulary.
pub fn screen_input(text: &str) -> Option<RejectionReason> {
    let separator = text.contains(';');
    let comment = text.contains("--") || text.contains("/*") || text.contains("*/");
    if separator || comment {
        let sql_shaped = text.contains('\'') || text.contains('"') || INPUT_SQL_WORD_RE.is_match(text);
        if sql_shaped {
            let marker = if separator { "statement separator" } else { "comment marker" };
            return Some(RejectionReason::SuspiciousInput(marker.to_string()));
        }
    }
    INPUT_STATEMENT_RE
        .find(text)
        .map(|m| RejectionReason::SuspiciousInput(m.as_str().to_lowercase()))
}

pub struct SqlValidator<'a> {
    schema: &'a SchemaWhitelist,
}

impl<'a> SqlValidator<'a> {
    pub fn new(schema: &'a SchemaWhitelist) -> Self {
        Self { schema }
    }

    pub fn validate(&self, candidate: &CandidateSql) -> ValidationVerdict {
        match self.check(candidate) {
            Ok(()) => ValidationVerdict::Accepted(AcceptedSql {
                candidate: candidate.clone(),
            }),
            Err(reason) => ValidationVerdict::Rejected(reason),
        }
    }

    fn check(&self, candidate: &CandidateSql) -> Result<(), RejectionReason> {
        let sql = candidate.statement.as_str();
        lexical_check(sql)?;

        for table in &candidate.referenced_tables {
            if !self.schema.is_known_table(table) {
                return Err(RejectionReason::UnknownTable(table.clone()));
            }
        }

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .map_err(|e| RejectionReason::Unparseable(e.to_string()))?;
        if statements.len() != 1 {
            return Err(RejectionReason::MultipleStatements);
        }
        let query = match &statements[0] {
            Statement::Query(query) => query,
            _ => return Err(RejectionReason::NotASelect),
        };

        self.check_query(query, candidate)
    }

    fn check_query(&self, query: &Query, candidate: &CandidateSql) -> Result<(), RejectionReason> {
        if query.with.is_some() {
            return Err(RejectionReason::CommonTableExpression);
        }
        if !query.locks.is_empty() {
            return Err(RejectionReason::ForbiddenKeyword("FOR UPDATE".to_string()));
        }
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            SetExpr::SetOperation { .. } => return Err(RejectionReason::SetOperation),
            SetExpr::Query(_) => return Err(RejectionReason::Subquery),
            _ => return Err(RejectionReason::NotASelect),
        };
        if select.into.is_some() {
            return Err(RejectionReason::ForbiddenKeyword("INTO".to_string()));
        }

        // Tables
        let mut tables = Vec::new();
        for from in &select.from {
            let factors = std::iter::once(&from.relation).chain(from.joins.iter().map(|j| &j.relation));
            for factor in factors {
                match factor {
                    TableFactor::Table { name, .. } => {
                        let table_name = name.0.last().map(|i| i.value.clone()).unwrap_or_default();
                        let table = self
                            .schema
                            .table(&table_name)
                            .ok_or_else(|| RejectionReason::UnknownTable(name.to_string()))?;
                        tables.push(table);
                    }
                    TableFactor::Derived { .. } => return Err(RejectionReason::Subquery),
                    other => return Err(RejectionReason::UnknownTable(other.to_string())),
                }
            }
        }
        let Some(primary) = tables.first() else {
            return Err(RejectionReason::NotASelect);
        };

        for item in &select.projection {
            if matches!(item, SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)) {
                return Err(RejectionReason::UnknownColumn("*".to_string()));
            }
        }

        // Expressions: identifiers, functions, literals, subqueries
        let table_names: HashSet<String> = tables.iter().map(|t| t.name.to_lowercase()).collect();
        let mut placeholders = BTreeSet::new();
        let walk = visit_expressions(query, |expr| {
            match expr {
                Expr::Identifier(ident) => {
                    if !tables.iter().any(|t| t.has_column(&ident.value)) {
                        return ControlFlow::Break(RejectionReason::UnknownColumn(ident.value.clone()));
                    }
                }
                Expr::CompoundIdentifier(parts) => {
                    let known = match parts.as_slice() {
                        [table, column] => {
                            table_names.contains(&table.value.to_lowercase())
                                && tables.iter().any(|t| {
                                    t.name.eq_ignore_ascii_case(&table.value) && t.has_column(&column.value)
                                })
                        }
                        _ => false,
                    };
                    if !known {
                        let joined: Vec<&str> = parts.iter().map(|p| p.value.as_str()).collect();
                        return ControlFlow::Break(RejectionReason::UnknownColumn(joined.join(".")));
                    }
                }
                Expr::Function(function) => {
                    let name = function.name.to_string().to_uppercase();
                    if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                        return ControlFlow::Break(RejectionReason::DisallowedFunction(name));
                    }
                }
                Expr::Value(Value::Placeholder(p)) => {
                    placeholders.insert(p.clone());
                }
                Expr::Value(other) => {
                    return ControlFlow::Break(RejectionReason::InlineLiteral(other.to_string()));
                }
                Expr::TypedString { value, .. } => {
                    return ControlFlow::Break(RejectionReason::InlineLiteral(value.clone()));
                }
                Expr::Interval(interval) => {
                    return ControlFlow::Break(RejectionReason::InlineLiteral(interval.to_string()));
                }
                Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => {
                    return ControlFlow::Break(RejectionReason::Subquery);
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
        if let ControlFlow::Break(reason) = walk {
            return Err(reason);
        }

        // Every placeholder bound exactly once, nothing bound that is unused
        let bound: BTreeSet<String> = candidate.parameters.iter().map(|p| p.name.clone()).collect();
        if bound.len() != candidate.parameters.len() {
            return Err(RejectionReason::PlaceholderMismatch("duplicate parameter name".to_string()));
        }
        if bound != placeholders {
            let missing: Vec<&String> = placeholders.difference(&bound).collect();
            let unused: Vec<&String> = bound.difference(&placeholders).collect();
            return Err(RejectionReason::PlaceholderMismatch(format!(
                "unbound {:?}, unused {:?}",
                missing, unused
            )));
        }

        // Resource bound
        let time_column = primary.time_column.as_str();
        let time_bounded = select
            .selection
            .as_ref()
            .map(|w| conjuncts(w).into_iter().any(|e| is_time_bound(e, time_column)))
            .unwrap_or(false);
        let explicit_ranking = candidate.comparison_mode == ComparisonMode::Ranking
            && candidate.top_n.is_some()
            && query.limit.is_some();
        if !time_bounded && !explicit_ranking {
            return Err(RejectionReason::MissingTimePredicate(time_column.to_string()));
        }

        Ok(())
    }
}

fn lexical_check(sql: &str) -> Result<(), RejectionReason> {
    if sql.contains(';') {
        return Err(RejectionReason::MultipleStatements);
    }
    if sql.contains("--") || sql.contains("/*") {
        return Err(RejectionReason::Comment);
    }
    if let Some(m) = FORBIDDEN_KEYWORD_RE.find(sql) {
        return Err(RejectionReason::ForbiddenKeyword(m.as_str().to_uppercase()));
    }
    Ok(())
}

/// Top-level AND-ed predicates of a WHERE clause
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        Expr::Nested(inner) => conjuncts(inner),
        other => vec![other],
    }
}

fn is_column(expr: &Expr, column: &str) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.eq_ignore_ascii_case(column),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.eq_ignore_ascii_case(column))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_placeholder(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Placeholder(_)))
}

fn is_time_bound(expr: &Expr, time_column: &str) -> bool {
    match expr {
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => is_column(expr, time_column) && is_placeholder(low) && is_placeholder(high),
        Expr::BinaryOp { left, op, right } => {
            matches!(
                op,
                BinaryOperator::Gt
                    | BinaryOperator::GtEq
                    | BinaryOperator::Lt
                    | BinaryOperator::LtEq
                    | BinaryOperator::Eq
            ) && ((is_column(left, time_column) && is_placeholder(right))
                || (is_placeholder(left) && is_column(right, time_column)))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{SqlGenerationService, SqlGenerator, SqlValue};
    use crate::query_spec::{QuerySpec, RankOrder, TimeRange};
    use crate::registry::Registry;
    use crate::retrieval::RetrievedContext;

    fn candidate(statement: &str, params: &[&str]) -> CandidateSql {
        CandidateSql {
            statement: statement.to_string(),
            parameters: params
                .iter()
                .map(|name| BoundParameter {
                    name: name.to_string(),
                    value: SqlValue::Text("INVEX".to_string()),
                })
                .collect(),
            referenced_tables: vec!["monthly_kpis".to_string()],
            referenced_columns: vec![],
            comparison_mode: ComparisonMode::Single,
            top_n: None,
            attempt: 1,
        }
    }

    fn verdict(statement: &str, params: &[&str]) -> ValidationVerdict {
        let registry = Registry::builtin();
        SqlValidator::new(&registry.schema).validate(&candidate(statement, params))
    }

    fn rejected(statement: &str, params: &[&str]) -> RejectionReason {
        match verdict(statement, params) {
            ValidationVerdict::Rejected(reason) => reason,
            ValidationVerdict::Accepted(_) => panic!("expected rejection for {}", statement),
        }
    }

    const GOOD: &str = "SELECT bank_id AS bank, period AS period, imor AS value FROM monthly_kpis \
                        WHERE bank_id = $1 AND period BETWEEN $2 AND $3 ORDER BY bank_id, period";

    #[test]
    fn test_accepts_generated_templates() {
        let registry = Registry::builtin();
        let validator = SqlValidator::new(&registry.schema);
        let generator = SqlGenerationService::default();

        for (mode, banks, filters) in [
            (ComparisonMode::Single, vec!["INVEX"], vec![]),
            (ComparisonMode::Compare, vec!["INVEX", "SYSTEM"], vec![]),
            (ComparisonMode::Compare, vec!["BBVA"], vec!["automotriz", "consumo"]),
            (ComparisonMode::Ranking, vec![], vec![]),
        ] {
            let spec = QuerySpec {
                metric: Some("IMOR".to_string()),
                banks: banks.into_iter().map(String::from).collect(),
                time_range: TimeRange::year(2024).unwrap(),
                dimension_filters: filters.into_iter().map(String::from).collect(),
                comparison_mode: mode,
                top_n: Some(5),
                rank_order: RankOrder::Descending,
            };
            let c = generator.generate(&registry, &spec, &RetrievedContext::default(), None).unwrap();
            let v = validator.validate(&c);
            assert!(v.is_accepted(), "{:?} rejected: {:?}", mode, v);
        }
    }

    #[test]
    fn test_accepts_and_exposes_statement() {
        match verdict(GOOD, &["$1", "$2", "$3"]) {
            ValidationVerdict::Accepted(accepted) => {
                assert_eq!(accepted.statement(), GOOD);
                assert_eq!(accepted.parameters().len(), 3);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let sql = format!("{}; DROP TABLE monthly_kpis", GOOD);
        assert_eq!(rejected(&sql, &["$1", "$2", "$3"]), RejectionReason::MultipleStatements);
    }

    #[test]
    fn test_rejects_comments() {
        let sql = format!("{} -- trailing", GOOD);
        assert_eq!(rejected(&sql, &["$1", "$2", "$3"]), RejectionReason::Comment);
    }

    #[test]
    fn test_rejects_ddl_dml_keywords_case_insensitively() {
        for keyword in ["drop", "Delete", "INSERT", "tRuNcAtE", "grant", "exec"] {
            let sql = format!("SELECT bank_id FROM monthly_kpis WHERE period = $1 AND bank_id = '{}'", keyword);
            assert!(matches!(rejected(&sql, &["$1"]), RejectionReason::ForbiddenKeyword(_)));
        }
    }

    #[test]
    fn test_rejects_unknown_identifiers() {
        assert!(matches!(
            rejected("SELECT bank_id FROM users WHERE period = $1", &["$1"]),
            RejectionReason::UnknownTable(_)
        ));
        assert!(matches!(
            rejected("SELECT password FROM monthly_kpis WHERE period = $1", &["$1"]),
            RejectionReason::UnknownColumn(c) if c == "password"
        ));
        assert!(matches!(
            rejected("SELECT * FROM monthly_kpis WHERE period = $1", &["$1"]),
            RejectionReason::UnknownColumn(_)
        ));
    }

    #[test]
    fn test_rejects_inline_literals() {
        assert!(matches!(
            rejected("SELECT imor FROM monthly_kpis WHERE bank_id = 'INVEX' AND period = $1", &["$1"]),
            RejectionReason::InlineLiteral(_)
        ));
        assert!(matches!(
            rejected("SELECT imor FROM monthly_kpis WHERE period > DATE '2024-01-01'", &[]),
            RejectionReason::InlineLiteral(_)
        ));
    }

    #[test]
    fn test_rejects_placeholder_mismatch() {
        assert!(matches!(rejected(GOOD, &["$1", "$2"]), RejectionReason::PlaceholderMismatch(_)));
        assert!(matches!(
            rejected(GOOD, &["$1", "$2", "$3", "$4"]),
            RejectionReason::PlaceholderMismatch(_)
        ));
    }

    #[test]
    fn test_rejects_shapes_outside_plain_select() {
        assert_eq!(
            rejected(
                "WITH x AS (SELECT imor FROM monthly_kpis WHERE period = $1) SELECT imor FROM x",
                &["$1"]
            ),
            RejectionReason::CommonTableExpression
        );
        assert_eq!(
            rejected(
                "SELECT imor FROM monthly_kpis WHERE period = $1 UNION SELECT imor FROM segment_kpis WHERE period = $2",
                &["$1", "$2"]
            ),
            RejectionReason::SetOperation
        );
        assert_eq!(
            rejected(
                "SELECT imor FROM monthly_kpis WHERE period = $1 AND bank_id IN (SELECT bank_id FROM segment_kpis)",
                &["$1"]
            ),
            RejectionReason::Subquery
        );
        assert!(matches!(
            rejected("SELECT pg_sleep($1) FROM monthly_kpis WHERE period = $2", &["$1", "$2"]),
            RejectionReason::DisallowedFunction(f) if f == "PG_SLEEP"
        ));
    }

    #[test]
    fn test_requires_time_predicate() {
        assert!(matches!(
            rejected("SELECT imor FROM monthly_kpis WHERE bank_id = $1", &["$1"]),
            RejectionReason::MissingTimePredicate(_)
        ));
        // An OR branch does not bound the scan
        assert!(matches!(
            rejected("SELECT imor FROM monthly_kpis WHERE period = $1 OR bank_id = $2", &["$1", "$2"]),
            RejectionReason::MissingTimePredicate(_)
        ));
    }

    #[test]
    fn test_ranking_with_top_n_may_skip_time_predicate() {
        let registry = Registry::builtin();
        let mut c = candidate(
            "SELECT bank_id, AVG(imor) FROM monthly_kpis GROUP BY bank_id ORDER BY AVG(imor) DESC LIMIT $1",
            &[],
        );
        c.parameters = vec![BoundParameter {
            name: "$1".to_string(),
            value: SqlValue::Int(5),
        }];
        c.comparison_mode = ComparisonMode::Ranking;
        c.top_n = Some(5);
        assert!(SqlValidator::new(&registry.schema).validate(&c).is_accepted());

        c.top_n = None;
        assert!(!SqlValidator::new(&registry.schema).validate(&c).is_accepted());
    }

    #[test]
    fn test_screen_input() {
        assert!(matches!(
            screen_input("IMOR'; DROP TABLE x; --"),
            Some(RejectionReason::SuspiciousInput(_))
        ));
        assert!(screen_input("imor de invex /* select */").is_some());
        assert!(screen_input("IMOR de INVEX\" -- x").is_some());
        assert!(screen_input("drop table monthly_kpis").is_some());
        assert!(screen_input("IMOR de INVEX union select password").is_some());
        assert!(screen_input("Compara IMOR de INVEX vs Sistema en 2024").is_none());
        assert!(screen_input("IMOR automotriz de BBVA desde 2023").is_none());
    }

    #[test]
    fn test_screen_input_accepts_plain_punctuation() {
        assert!(screen_input("IMOR de INVEX; también BBVA en 2024").is_none());
        assert!(screen_input("IMOR de INVEX 2023--2024").is_none());
        assert!(screen_input("imor de invex /* hola */").is_none());
        assert!(screen_input("selecciona el IMOR de INVEX desde 2023").is_none());
        assert!(screen_input("select imor from invex en 2024").is_none());
        assert!(screen_input("select * from monthly_kpis").is_some());
        assert!(screen_input("select bank_id, imor from monthly_kpis").is_some());
    }
}
