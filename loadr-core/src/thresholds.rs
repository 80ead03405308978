use loadr_metrics::{MetricSeriesSummary, MetricValue};

use crate::error::{Error, Result};

/// All comparison expressions configured for one metric, e.g.
/// `http_req_duration: ["p(95)<500", "p(99)<1000"]`.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    pub fn new(metric: impl Into<String>, expressions: Vec<String>) -> Self {
        Self {
            metric: metric.into(),
            expressions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u8),
}

#[derive(Debug, Clone)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// Result of evaluating one expression against the final snapshot. All
/// outcomes are reported, not just failures, so operators can see which
/// rule broke the run.
#[derive(Debug, Clone)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    /// The rule referenced a metric with no recorded base series; the rule
    /// fails but the run is not aborted.
    pub unknown_metric: bool,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Find operator
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u8 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(1..=100).contains(&p) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// Parse every expression up front; invalid syntax is a config error and
/// fails the run before it starts.
pub fn validate_thresholds(sets: &[ThresholdSet]) -> Result<()> {
    for set in sets {
        for expr in &set.expressions {
            parse_threshold_expr(expr).map_err(|reason| Error::InvalidThreshold {
                metric: set.metric.clone(),
                reason,
            })?;
        }
    }
    Ok(())
}

/// Evaluate every rule against a snapshot. Rules read the untagged base
/// series of their metric.
pub fn evaluate_thresholds(
    sets: &[ThresholdSet],
    snapshot: &[MetricSeriesSummary],
) -> Result<Vec<ThresholdOutcome>> {
    let mut out = Vec::new();

    for set in sets {
        let series = snapshot
            .iter()
            .find(|m| m.name == set.metric && m.tags.is_empty());

        for expr_raw in &set.expressions {
            let expr = parse_threshold_expr(expr_raw).map_err(|reason| Error::InvalidThreshold {
                metric: set.metric.clone(),
                reason,
            })?;

            let observed = series.and_then(|s| observed_value(&s.values, expr.agg));
            let passed = series.is_some()
                && observed
                    .map(|v| compare(v, expr.op, expr.value))
                    .unwrap_or(false);

            out.push(ThresholdOutcome {
                metric: set.metric.clone(),
                expression: expr_raw.clone(),
                observed,
                passed,
                unknown_metric: series.is_none(),
            });
        }
    }

    Ok(out)
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(values: &MetricValue, agg: ThresholdAgg) -> Option<f64> {
    match (values, agg) {
        (MetricValue::Counter(v), ThresholdAgg::Count) => Some(*v as f64),

        (MetricValue::Rate { rate, .. }, ThresholdAgg::Rate) => *rate,
        (MetricValue::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),

        (MetricValue::Trend(t), ThresholdAgg::Avg) => t.mean,
        (MetricValue::Trend(t), ThresholdAgg::Min) => t.min,
        (MetricValue::Trend(t), ThresholdAgg::Max) => t.max,
        (MetricValue::Trend(t), ThresholdAgg::Count) => Some(t.count as f64),
        (MetricValue::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),

        // Non-sensical combinations.
        (_, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadr_metrics::{MetricKind, TrendSummary};

    fn trend_series(name: &str, p95: f64) -> MetricSeriesSummary {
        MetricSeriesSummary {
            name: name.to_string(),
            kind: MetricKind::Trend,
            tags: Vec::new(),
            values: MetricValue::Trend(TrendSummary {
                count: 100,
                min: Some(1.0),
                max: Some(900.0),
                mean: Some(120.0),
                stdev: Some(40.0),
                p50: Some(100.0),
                p90: Some(400.0),
                p95: Some(p95),
                p99: Some(800.0),
                distribution: vec![(50, 100.0), (90, 400.0), (95, p95), (99, 800.0)],
            }),
        }
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        let err = match parse_threshold_expr("p(101)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
    }

    #[test]
    fn parse_threshold_expr_rejects_missing_operator() {
        assert!(parse_threshold_expr("p(95)500").is_err());
        assert!(parse_threshold_expr("").is_err());
    }

    #[test]
    fn percentile_below_limit_passes_above_fails() {
        let snapshot = vec![trend_series("http_req_duration", 450.0)];

        let pass = evaluate_thresholds(
            &[ThresholdSet::new(
                "http_req_duration",
                vec!["p(95)<500".to_string()],
            )],
            &snapshot,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(pass[0].passed);
        assert_eq!(pass[0].observed, Some(450.0));

        let fail = evaluate_thresholds(
            &[ThresholdSet::new(
                "http_req_duration",
                vec!["p(95)<400".to_string()],
            )],
            &snapshot,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(!fail[0].passed);
    }

    #[test]
    fn unknown_metric_fails_rule_without_erroring() {
        let outcomes = evaluate_thresholds(
            &[ThresholdSet::new("no_such_metric", vec!["p(99)<1".to_string()])],
            &[],
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].passed);
        assert!(outcomes[0].unknown_metric);
        assert_eq!(outcomes[0].observed, None);
    }

    #[test]
    fn rate_threshold_reads_rate_series() {
        let snapshot = vec![MetricSeriesSummary {
            name: "errors".to_string(),
            kind: MetricKind::Rate,
            tags: Vec::new(),
            values: MetricValue::Rate {
                total: 1000,
                hits: 5,
                rate: Some(0.005),
            },
        }];

        let outcomes = evaluate_thresholds(
            &[ThresholdSet::new("errors", vec!["rate<0.01".to_string()])],
            &snapshot,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(outcomes[0].passed);
    }

    #[test]
    fn evaluation_uses_base_series_only() {
        let mut tagged = trend_series("m", 450.0);
        tagged.tags = vec![("scenario".to_string(), "x".to_string())];
        let snapshot = vec![tagged];

        let outcomes = evaluate_thresholds(
            &[ThresholdSet::new("m", vec!["p(95)<500".to_string()])],
            &snapshot,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(outcomes[0].unknown_metric);
    }

    #[test]
    fn validate_rejects_bad_syntax_up_front() {
        let err = validate_thresholds(&[ThresholdSet::new("m", vec!["wat".to_string()])]);
        assert!(matches!(err, Err(Error::InvalidThreshold { .. })));
    }
}
