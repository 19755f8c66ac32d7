use std::fmt::Write as _;

use super::{MetricFamily, MetricKind, Series, SeriesValue};

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encode families in the Prometheus text format.
///
/// Counters get a `_total` suffix. Gauge histograms are typed `histogram` and
/// expose `_bucket`, `_gcount` (last exposed bucket) and `_gsum` samples.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut out = String::with_capacity(4096);
    for family in families {
        encode_family(&mut out, family);
    }
    out
}

fn encode_family(out: &mut String, family: &MetricFamily) {
    let (name, kind) = match family.kind {
        MetricKind::Counter => (format!("{}_total", family.name), "counter"),
        MetricKind::Gauge => (family.name.to_owned(), "gauge"),
        MetricKind::GaugeHistogram => (family.name.to_owned(), "histogram"),
    };

    let _ = writeln!(out, "# HELP {name} {}", escape_help(family.help));
    let _ = writeln!(out, "# TYPE {name} {kind}");

    for series in &family.series {
        match &series.value {
            SeriesValue::Scalar(v) => sample(out, &name, family, series, None, *v),
            SeriesValue::Histogram { buckets, sum } => {
                for (le, v) in buckets {
                    sample(out, &format!("{name}_bucket"), family, series, Some(le), *v);
                }
                let gcount = buckets.last().map(|(_, v)| *v).unwrap_or(0.0);
                sample(out, &format!("{name}_gcount"), family, series, None, gcount);
                sample(out, &format!("{name}_gsum"), family, series, None, *sum);
            }
        }
    }
}

fn sample(
    out: &mut String,
    name: &str,
    family: &MetricFamily,
    series: &Series,
    le: Option<&str>,
    value: f64,
) {
    out.push_str(name);

    let mut pairs: Vec<(&str, &str)> = family
        .label_names
        .iter()
        .copied()
        .zip(series.labels.iter().map(String::as_str))
        .collect();
    if let Some(le) = le {
        pairs.push(("le", le));
    }

    if !pairs.is_empty() {
        out.push('{');
        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{k}=\"{}\"", escape_label(v));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {}", format_value(value));
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf".into() } else { "-Inf".into() }
    } else {
        v.to_string()
    }
}

fn escape_label(v: &str) -> String {
    v.replace('\\', r"\\").replace('"', "\\\"").replace('\n', r"\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', r"\\").replace('\n', r"\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_histogram_layout() {
        let mut family = MetricFamily::new(
            "sentry_issues",
            "Open issues",
            MetricKind::GaugeHistogram,
            &["project_slug", "environment"],
        );
        family.add(
            vec!["api".into(), "prod".into()],
            SeriesValue::Histogram {
                buckets: vec![("1h".into(), 5.0), ("+Inf".into(), 9.0)],
                sum: 14.0,
            },
        );

        let text = encode(&[family]);
        assert_eq!(
            text,
            "# HELP sentry_issues Open issues\n\
             # TYPE sentry_issues histogram\n\
             sentry_issues_bucket{project_slug=\"api\",environment=\"prod\",le=\"1h\"} 5\n\
             sentry_issues_bucket{project_slug=\"api\",environment=\"prod\",le=\"+Inf\"} 9\n\
             sentry_issues_gcount{project_slug=\"api\",environment=\"prod\"} 9\n\
             sentry_issues_gsum{project_slug=\"api\",environment=\"prod\"} 14\n"
        );
    }

    #[test]
    fn empty_histogram_has_zero_gcount() {
        let mut family = MetricFamily::new("h", "x", MetricKind::GaugeHistogram, &["p"]);
        family.add(vec!["a".into()], SeriesValue::Histogram { buckets: vec![], sum: 0.0 });
        let text = encode(&[family]);
        assert!(text.contains("h_gcount{p=\"a\"} 0\n"));
        assert!(!text.contains("_bucket"));
    }

    #[test]
    fn counter_gets_total_suffix() {
        let mut family = MetricFamily::new(
            "sentry_events",
            "Events",
            MetricKind::Counter,
            &["project_slug", "stat"],
        );
        family.add(vec!["api".into(), "received".into()], SeriesValue::Scalar(1234.0));
        let text = encode(&[family]);
        assert!(text.contains("# TYPE sentry_events_total counter\n"));
        assert!(
            text.contains("sentry_events_total{project_slug=\"api\",stat=\"received\"} 1234\n")
        );
    }

    #[test]
    fn label_values_are_escaped() {
        let mut family = MetricFamily::new("g", "x", MetricKind::Gauge, &["logger"]);
        family.add(vec!["a\"b\\c\nd".into()], SeriesValue::Scalar(0.5));
        assert!(encode(&[family]).contains(r#"g{logger="a\"b\\c\nd"} 0.5"#));
    }

    #[test]
    fn empty_family_still_declares_itself() {
        let family = MetricFamily::new("g", "x", MetricKind::Gauge, &["a"]);
        assert_eq!(encode(&[family]), "# HELP g x\n# TYPE g gauge\n");
    }
}
