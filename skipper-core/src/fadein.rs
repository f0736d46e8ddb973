//! Fade-in post-processor (`spec.md` §4.12).
//!
//! For each LB route carrying `fade_in`, newly detected endpoints are biased toward a smaller
//! share of traffic proportional to `(now - detected_time) / duration`, raised to `exponent`.
//! The bias is realized by repeating a fully warm endpoint's index in the list handed to the
//! algorithm; a cold endpoint appears once, a fully warm one appears `1 / weight` times as often
//! as it would unweighted, approximated here by integer repetition of the *other* endpoints
//! relative to the fading-in one — concretely, each endpoint's repeat count is
//! `max(1, round(1 / effective_weight))` where `effective_weight` is clamped to `(0, 1]`, so a
//! cold endpoint (`effective_weight -> 0`) is diluted by many copies of its warm siblings.

use std::sync::Arc;

use crate::endpoint::EndpointRegistry;
use crate::route::{Endpoint, FadeIn};

/// The elapsed-fraction weight for one endpoint, in `(0, 1]` (`spec.md` §4.12, §8 property 7).
pub fn effective_weight(fade_in: &FadeIn, detected_elapsed: std::time::Duration) -> f64 {
    if fade_in.duration.is_zero() {
        return 1.0;
    }
    let fraction = (detected_elapsed.as_secs_f64() / fade_in.duration.as_secs_f64()).clamp(0.0, 1.0);
    fraction.powf(fade_in.exponent).max(f64::EPSILON)
}

/// Rewrites `endpoints` into a (possibly longer) list where a cold endpoint appears fewer times
/// relative to its warm siblings, so a uniform/weighted algorithm sampling this list sees the
/// fade-in bias without needing to know about fade-in at all.
pub fn weighted_endpoints(endpoints: &[Endpoint], fade_in: &FadeIn, registry: &EndpointRegistry) -> Vec<Arc<str>> {
    let weights: Vec<f64> = endpoints
        .iter()
        .map(|ep| {
            let metrics = registry.touch(&ep.url);
            effective_weight(fade_in, metrics.detected_elapsed())
        })
        .collect();
    let max_repeat = 20usize;
    let min_weight = weights.iter().cloned().fold(f64::INFINITY, f64::min).max(f64::EPSILON);
    let mut out = Vec::with_capacity(endpoints.len() * 2);
    for (ep, w) in endpoints.iter().zip(weights.iter()) {
        let repeats = ((w / min_weight).round() as usize).clamp(1, max_repeat);
        for _ in 0..repeats {
            out.push(ep.url.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn weight_is_non_decreasing_and_saturates() {
        let fade = FadeIn {
            duration: Duration::from_secs(10),
            exponent: 1.0,
        };
        let w0 = effective_weight(&fade, Duration::from_secs(0));
        let w5 = effective_weight(&fade, Duration::from_secs(5));
        let w10 = effective_weight(&fade, Duration::from_secs(10));
        let w20 = effective_weight(&fade, Duration::from_secs(20));
        assert!(w0 <= w5);
        assert!(w5 <= w10);
        assert_eq!(w10, 1.0);
        assert_eq!(w20, 1.0);
    }

    #[test]
    fn zero_duration_is_immediately_full_weight() {
        let fade = FadeIn {
            duration: Duration::from_secs(0),
            exponent: 2.0,
        };
        assert_eq!(effective_weight(&fade, Duration::from_secs(0)), 1.0);
    }
}
