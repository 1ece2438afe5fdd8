//! Credit assignment for a single converting user.
//!
//! Every methodology works on a totally ordered candidate list: keys are
//! sorted by the timestamp the methodology cares about (first or last
//! exposure), ties broken by key label ascending.

use crate::attribution::{AttributionKey, AttributionMethodology, LookbackPeriod, TimeWindow};
use crate::session::UserTouchpoints;

/// Per-conversion inputs to [`assign`].
#[derive(Debug, Clone, Copy)]
pub struct AssignmentContext {
    pub conversion_timestamp: i64,
    pub lookback: LookbackPeriod,
    pub campaign_window: TimeWindow,
}

impl AssignmentContext {
    /// A touch after the conversion is never eligible.
    pub fn within_lookback(&self, timestamp: i64) -> bool {
        self.conversion_timestamp >= timestamp
            && self.conversion_timestamp - timestamp <= self.lookback.secs()
    }

    pub fn within_query_period(&self, timestamp: i64) -> bool {
        self.campaign_window.contains(timestamp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touch {
    First,
    Last,
}

fn candidates(touchpoints: &UserTouchpoints, touch: Touch) -> Vec<(&AttributionKey, i64)> {
    let mut ordered: Vec<(&AttributionKey, i64)> = touchpoints
        .iter()
        .map(|(key, range)| match touch {
            Touch::First => (key, range.min_timestamp),
            Touch::Last => (key, range.max_timestamp),
        })
        .collect();
    ordered.sort_by(|a, b| {
        let by_time = match touch {
            Touch::First => a.1.cmp(&b.1),
            Touch::Last => b.1.cmp(&a.1),
        };
        by_time.then_with(|| a.0.label().cmp(b.0.label()))
    });
    ordered
}

/// The first lookback-eligible candidate decides. If it falls outside the
/// campaign window the conversion is dropped rather than defaulted.
fn single_touch(touchpoints: &UserTouchpoints, touch: Touch, ctx: &AssignmentContext) -> Vec<AttributionKey> {
    for (key, timestamp) in candidates(touchpoints, touch) {
        if ctx.within_lookback(timestamp) {
            if ctx.within_query_period(timestamp) {
                return vec![key.clone()];
            }
            return Vec::new();
        }
    }
    vec![AttributionKey::NoAttribution]
}

/// Like [`single_touch`] but eligible no-attribution touches are skipped.
fn non_direct_touch(
    touchpoints: &UserTouchpoints,
    touch: Touch,
    ctx: &AssignmentContext,
) -> Vec<AttributionKey> {
    let ordered = candidates(touchpoints, touch);
    let default = match ordered.first() {
        Some((key, _)) => (*key).clone(),
        None => AttributionKey::NoAttribution,
    };
    for (key, timestamp) in ordered {
        if !ctx.within_lookback(timestamp) || key.is_none() {
            continue;
        }
        if ctx.within_query_period(timestamp) {
            return vec![key.clone()];
        }
        return Vec::new();
    }
    vec![default]
}

fn linear(touchpoints: &UserTouchpoints, ctx: &AssignmentContext) -> Vec<AttributionKey> {
    candidates(touchpoints, Touch::First)
        .into_iter()
        .filter(|(_, timestamp)| ctx.within_lookback(*timestamp) && ctx.within_query_period(*timestamp))
        .map(|(key, _)| key.clone())
        .collect()
}

fn u_shaped(touchpoints: &UserTouchpoints, ctx: &AssignmentContext) -> Vec<AttributionKey> {
    let mut keys = single_touch(touchpoints, Touch::First, ctx);
    for key in single_touch(touchpoints, Touch::Last, ctx) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Keys credited for one conversion. An empty result means the conversion
/// is not counted at all.
pub fn assign(
    methodology: AttributionMethodology,
    touchpoints: &UserTouchpoints,
    ctx: &AssignmentContext,
) -> Vec<AttributionKey> {
    if touchpoints.is_empty() {
        return match methodology {
            AttributionMethodology::Linear => Vec::new(),
            _ => vec![AttributionKey::NoAttribution],
        };
    }
    match methodology {
        AttributionMethodology::FirstTouch => single_touch(touchpoints, Touch::First, ctx),
        AttributionMethodology::LastTouch => single_touch(touchpoints, Touch::Last, ctx),
        AttributionMethodology::FirstTouchNonDirect => non_direct_touch(touchpoints, Touch::First, ctx),
        AttributionMethodology::LastTouchNonDirect => non_direct_touch(touchpoints, Touch::Last, ctx),
        AttributionMethodology::Linear => linear(touchpoints, ctx),
        AttributionMethodology::UShaped => u_shaped(touchpoints, ctx),
        AttributionMethodology::Unrecognized => vec![AttributionKey::NoAttribution],
    }
}
