pub mod collector;
pub mod exposition;

pub use collector::SentryCollector;

/// Metric type of a family, as understood by the exposition encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    /// Histogram over a point-in-time population (buckets are not cumulative over time).
    GaugeHistogram,
}

/// Value of one series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Scalar(f64),
    Histogram {
        /// `(le, value)` pairs in exposition order.
        buckets: Vec<(String, f64)>,
        sum: f64,
    },
}

/// One labelled series. `labels` lines up with the family's `label_names`.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: Vec<String>,
    pub value: SeriesValue,
}

/// A named group of series sharing a type and label schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub label_names: &'static [&'static str],
    pub series: Vec<Series>,
}

impl MetricFamily {
    pub fn new(
        name: &'static str,
        help: &'static str,
        kind: MetricKind,
        label_names: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            kind,
            label_names,
            series: Vec::new(),
        }
    }

    pub fn add(&mut self, labels: Vec<String>, value: SeriesValue) {
        debug_assert_eq!(labels.len(), self.label_names.len());
        self.series.push(Series { labels, value });
    }

    /// First series whose labels start with `prefix`.
    #[cfg(test)]
    pub fn find(&self, prefix: &[&str]) -> Option<&Series> {
        self.series
            .iter()
            .find(|s| s.labels.iter().zip(prefix).all(|(l, p)| l == p))
    }
}
