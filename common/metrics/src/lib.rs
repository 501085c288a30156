//! A wrapper around the `prometheus` crate that provides a global, `Result`
//! tolerant interface to metrics.
//!
//! Metric statics are declared as `Result` values so a registration failure
//! (e.g. a duplicate name) degrades to a no-op instead of a panic. All update
//! helpers accept `&Result<..>` and silently ignore unregistered metrics.

use prometheus::{HistogramOpts, Opts};

pub use prometheus::{Error, Histogram, HistogramTimer, IntCounter, IntGauge, Result};

/// Attempt to create an `IntCounter`, returning `Err` if the registry does not
/// accept the counter (potentially due to naming conflict).
pub fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter> {
    let opts = Opts::new(name, help);
    let counter = IntCounter::with_opts(opts)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Attempt to create an `IntGauge`, returning `Err` if the registry does not
/// accept the gauge (potentially due to naming conflict).
pub fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let opts = Opts::new(name, help);
    let gauge = IntGauge::with_opts(opts)?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Attempt to create a `Histogram`, returning `Err` if the registry does not
/// accept the histogram (potentially due to naming conflict).
pub fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let opts = HistogramOpts::new(name, help);
    let histogram = Histogram::with_opts(opts)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

pub fn inc_counter(counter: &Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn inc_counter_by(counter: &Result<IntCounter>, value: u64) {
    if let Ok(counter) = counter {
        counter.inc_by(value);
    }
}

pub fn set_gauge(gauge: &Result<IntGauge>, value: i64) {
    if let Ok(gauge) = gauge {
        gauge.set(value);
    }
}

/// Starts a timer for the given `Histogram`, stopping when it gets dropped or
/// given to `stop_timer(..)`.
pub fn start_timer(histogram: &Result<Histogram>) -> Option<HistogramTimer> {
    histogram.as_ref().ok().map(|histogram| histogram.start_timer())
}

/// Stops a timer created with `start_timer(..)`.
pub fn stop_timer(timer: Option<HistogramTimer>) {
    if let Some(timer) = timer {
        timer.observe_duration();
    }
}

pub fn observe(histogram: &Result<Histogram>, value: f64) {
    if let Ok(histogram) = histogram {
        histogram.observe(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_gauge_updates() {
        let counter = try_create_int_counter("metrics_test_counter", "test counter");
        inc_counter(&counter);
        inc_counter_by(&counter, 2);
        assert_eq!(counter.unwrap().get(), 3);

        let gauge = try_create_int_gauge("metrics_test_gauge", "test gauge");
        set_gauge(&gauge, 9);
        assert_eq!(gauge.unwrap().get(), 9);
    }

    #[test]
    fn duplicate_registration_degrades_to_no_op() {
        let first = try_create_int_counter("metrics_test_duplicate", "test counter");
        let second = try_create_int_counter("metrics_test_duplicate", "test counter");
        assert!(first.is_ok());
        assert!(second.is_err());
        // Updating a failed registration must not panic.
        inc_counter(&second);
    }

    #[test]
    fn timers_record_observations() {
        let histogram = try_create_histogram("metrics_test_histogram", "test histogram");
        let timer = start_timer(&histogram);
        stop_timer(timer);
        observe(&histogram, 0.5);
        assert_eq!(histogram.unwrap().get_sample_count(), 2);
    }
}
