use chrono::NaiveDate;
use itertools::Itertools;
use nl2sql_engine::execution::{QueryResult, ResultRow};
use nl2sql_engine::generation::{SqlGenerationService, SqlGenerator, SqlValue};
use nl2sql_engine::parser::temporal::TemporalAnchor;
use nl2sql_engine::parser::{ParseContext, ParseOutcome, QuerySpecParser};
use nl2sql_engine::retrieval::RetrievedContext;
use nl2sql_engine::validator::{SqlValidator, ValidationVerdict};
use nl2sql_engine::visualization::VisualizationTransformer;
use nl2sql_engine::{ComparisonMode, QuerySpec, RankOrder, Registry, TimeRange};
use std::sync::Arc;

fn specs(registry: &Registry) -> Vec<QuerySpec> {
    let ranges = [
        TimeRange::year(2024).unwrap(),
        TimeRange::quarter(2023, 2).unwrap(),
        TimeRange::month(2024, 6).unwrap(),
    ];
    let mut out = Vec::new();
    for (metric, range) in registry.metrics.iter().cartesian_product(ranges.iter()) {
        for bank in &registry.banks {
            out.push(QuerySpec {
                metric: Some(metric.code.clone()),
                banks: vec![bank.id.clone()],
                time_range: *range,
                dimension_filters: vec![],
                comparison_mode: ComparisonMode::Single,
                top_n: None,
                rank_order: RankOrder::Descending,
            });
        }
        out.push(QuerySpec {
            metric: Some(metric.code.clone()),
            banks: vec!["INVEX".to_string(), "BBVA".to_string(), "SYSTEM".to_string()],
            time_range: *range,
            dimension_filters: vec![],
            comparison_mode: ComparisonMode::Compare,
            top_n: None,
            rank_order: RankOrder::Descending,
        });
        out.push(QuerySpec {
            metric: Some(metric.code.clone()),
            banks: vec![],
            time_range: *range,
            dimension_filters: vec![],
            comparison_mode: ComparisonMode::Ranking,
            top_n: Some(5),
            rank_order: RankOrder::Ascending,
        });
    }
    out
}

#[test]
fn test_every_generated_statement_is_accepted_and_time_bounded() {
    let registry = Registry::builtin();
    let validator = SqlValidator::new(&registry.schema);
    let generator = SqlGenerationService::default();

    for spec in specs(&registry) {
        let candidate = generator
            .generate(&registry, &spec, &RetrievedContext::default(), None)
            .unwrap();
        let verdict = validator.validate(&candidate);
        assert!(verdict.is_accepted(), "{:?} rejected: {:?}", spec, verdict);

        let upper = candidate.statement.to_uppercase();
        assert!(upper.contains("PERIOD BETWEEN"), "no time bound in {}", candidate.statement);
        assert!(candidate
            .parameters
            .iter()
            .any(|p| p.value == SqlValue::Date(spec.time_range.start_date)));
        assert!(candidate
            .parameters
            .iter()
            .any(|p| p.value == SqlValue::Date(spec.time_range.end_date)));
    }
}

#[test]
fn test_appended_statements_are_always_rejected() {
    let registry = Registry::builtin();
    let validator = SqlValidator::new(&registry.schema);
    let generator = SqlGenerationService::default();

    let tails = [
        "; DROP TABLE monthly_kpis",
        "; delete from monthly_kpis",
        " UNION SELECT bank_id, period, imor FROM monthly_kpis",
        " -- trailing",
        " /* hidden */",
    ];
    for (spec, tail) in specs(&registry).iter().take(20).cartesian_product(tails.iter()) {
        let mut candidate = generator
            .generate(&registry, spec, &RetrievedContext::default(), None)
            .unwrap();
        candidate.statement.push_str(tail);
        assert!(
            matches!(validator.validate(&candidate), ValidationVerdict::Rejected(_)),
            "accepted: {}",
            candidate.statement
        );
    }
}

#[test]
fn test_bank_aliases_resolve_regardless_of_case_and_spacing() {
    let registry = Arc::new(Registry::builtin());
    let parser = QuerySpecParser::new(Arc::clone(&registry));
    let ctx = ParseContext {
        anchor: TemporalAnchor::new(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(), None),
        prior: None,
    };

    for bank in registry.banks.iter() {
        for form in bank.surface_forms() {
            for variant in [form.to_lowercase(), format!("  {}  ", form.replace(' ', "   "))] {
                let question = format!("IMOR de {} en 2024", variant);
                match parser.parse(&question, &ctx).unwrap() {
                    ParseOutcome::Resolved(parsed) => {
                        assert_eq!(parsed.spec.banks, vec![bank.id.clone()], "question: {}", question)
                    }
                    other => panic!("{} did not resolve: {:?}", question, other),
                }
            }
        }
    }
}

#[test]
fn test_series_shape_matches_banks_and_months() {
    let registry = Registry::builtin();
    let banks = ["INVEX", "BBVA", "SYSTEM"];
    let months: Vec<NaiveDate> = TimeRange::year(2024).unwrap().months();

    // Rows arrive shuffled; output is chronological per bank
    let mut rows: Vec<ResultRow> = banks
        .iter()
        .cartesian_product(months.iter().rev())
        .map(|(bank, month)| ResultRow::new(bank, *month, Some(0.02)))
        .collect();
    rows.reverse();

    let spec = QuerySpec {
        metric: Some("IMOR".to_string()),
        banks: banks.iter().map(|b| b.to_string()).collect(),
        time_range: TimeRange::year(2024).unwrap(),
        dimension_filters: vec![],
        comparison_mode: ComparisonMode::Compare,
        top_n: None,
        rank_order: RankOrder::Descending,
    };
    let chart = VisualizationTransformer::default()
        .transform(&registry, &spec, &QueryResult::new(rows, "fixture", 1))
        .unwrap();

    assert_eq!(chart.series.len(), banks.len());
    for (series, bank) in chart.series.iter().zip(banks.iter()) {
        assert_eq!(&series.bank, bank);
        assert_eq!(series.points.len(), months.len());
        assert!(series.points.windows(2).all(|w| w[0].period < w[1].period));
    }
}
