//! Funnel progress state machine.
//!
//! `NotStarted -> InProgress(k) -> Converted`, never backwards. One event
//! moves a visitor at most one step.

use std::collections::BTreeSet;

use engine_core::{Event, FunnelProgress, Properties};
use serde_json::Value;

use crate::definition::FunnelDefinition;

/// Effect of one matching event on a visitor's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No progress and the event did not match the first step.
    Ignored,
    /// Progress created at step 0. `conversion` carries the time to convert
    /// in milliseconds for single-step funnels.
    Started { conversion: Option<u64> },
    /// Moved to `position`.
    Advanced { position: u32, conversion: Option<u64> },
    /// Repeat, skip-ahead or behind match; only activity was updated.
    Touched,
    /// Already converted; only activity was updated.
    AlreadyConverted,
}

impl Transition {
    /// Whether the stored progress changed.
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Ignored)
    }

    pub fn conversion(&self) -> Option<u64> {
        match self {
            Self::Started { conversion } | Self::Advanced { conversion, .. } => *conversion,
            _ => None,
        }
    }
}

/// Applies an event that matched `matched` step positions (ascending).
pub fn apply(
    slot: &mut Option<FunnelProgress>,
    funnel: &FunnelDefinition,
    matched: &[u32],
    event: &Event,
) -> Transition {
    if matched.is_empty() || funnel.is_empty() {
        return Transition::Ignored;
    }

    if slot.is_none() {
        if !matched.contains(&0) {
            return Transition::Ignored;
        }
        let mut progress = FunnelProgress {
            website_id: event.website_id.clone(),
            funnel_id: funnel.id,
            visitor_id: event.visitor_id.clone(),
            session_id: event.session_id.clone(),
            current_step: 0,
            completed_steps: BTreeSet::from([0]),
            first_seen: event.timestamp,
            last_activity: event.timestamp,
            converted: false,
            converted_at: None,
            properties: Properties::new(),
        };
        capture_properties(&mut progress, funnel, 0, event);
        let conversion = (funnel.last_position() == 0).then(|| convert(&mut progress, event));
        *slot = Some(progress);
        return Transition::Started { conversion };
    }

    let Some(progress) = slot.as_mut() else {
        return Transition::Ignored;
    };

    progress.last_activity = progress.last_activity.max(event.timestamp);

    if progress.converted {
        return Transition::AlreadyConverted;
    }

    progress.session_id = event.session_id.clone();

    let next = progress.current_step + 1;
    if next > funnel.last_position() || !matched.contains(&next) {
        return Transition::Touched;
    }

    progress.current_step = next;
    progress.completed_steps.insert(next);
    capture_properties(progress, funnel, next, event);

    let conversion = (next == funnel.last_position()).then(|| convert(progress, event));
    Transition::Advanced {
        position: next,
        conversion,
    }
}

/// Marks the progress converted and returns the time to convert in ms.
fn convert(progress: &mut FunnelProgress, event: &Event) -> u64 {
    progress.converted = true;
    progress.converted_at = Some(event.timestamp);
    (event.timestamp - progress.first_seen)
        .num_milliseconds()
        .max(0) as u64
}

fn capture_properties(
    progress: &mut FunnelProgress,
    funnel: &FunnelDefinition,
    position: u32,
    event: &Event,
) {
    if event.properties.is_empty() {
        return;
    }
    if let Some(step) = funnel.step(position) {
        progress.properties.insert(
            step.id.to_string(),
            Value::Object(event.properties.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use engine_core::{FunnelRecord, FunnelStepRecord};
    use serde_json::json;

    fn funnel(pages: &[&str]) -> FunnelDefinition {
        let steps = pages
            .iter()
            .enumerate()
            .map(|(i, page)| FunnelStepRecord::page(i as u32, *page))
            .collect();
        FunnelDefinition::try_from(FunnelRecord::new("site", "test", steps)).unwrap()
    }

    /// Feeds pageviews one second apart and returns the transitions.
    fn run(funnel: &FunnelDefinition, pages: &[&str]) -> (Option<FunnelProgress>, Vec<Transition>) {
        let start = Utc::now();
        let mut slot = None;
        let transitions = pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let event = Event::pageview("site", "v1", "s1", *page)
                    .with_timestamp(start + Duration::seconds(i as i64));
                let matched = funnel.matching_positions(&event);
                apply(&mut slot, funnel, &matched, &event)
            })
            .collect();
        (slot, transitions)
    }

    #[test]
    fn test_full_sequence_converts() {
        let abc = funnel(&["/a", "/b", "/c"]);
        let (progress, transitions) = run(&abc, &["/a", "/b", "/c"]);
        let progress = progress.unwrap();

        assert!(progress.converted);
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.completed_steps, BTreeSet::from([0, 1, 2]));
        assert_eq!(
            transitions.last(),
            Some(&Transition::Advanced {
                position: 2,
                conversion: Some(2000)
            })
        );
    }

    #[test]
    fn test_skipped_step_does_not_advance() {
        let abc = funnel(&["/a", "/b", "/c"]);
        let (progress, transitions) = run(&abc, &["/a", "/c"]);
        let progress = progress.unwrap();

        assert_eq!(progress.current_step, 0);
        assert!(!progress.converted);
        assert_eq!(transitions[1], Transition::Touched);
        assert_eq!(progress.last_activity - progress.first_seen, Duration::seconds(1));
    }

    #[test]
    fn test_repeated_first_step_then_advance() {
        let abc = funnel(&["/a", "/b", "/c"]);
        let (progress, _) = run(&abc, &["/a", "/a", "/b"]);
        let progress = progress.unwrap();

        assert_eq!(progress.current_step, 1);
        assert_eq!(progress.completed_steps, BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_later_step_without_progress_is_ignored() {
        let abc = funnel(&["/a", "/b", "/c"]);
        let (progress, transitions) = run(&abc, &["/b", "/c"]);
        assert!(progress.is_none());
        assert_eq!(transitions, vec![Transition::Ignored, Transition::Ignored]);
    }

    #[test]
    fn test_single_step_funnel_converts_immediately() {
        let single = funnel(&["/thanks"]);
        let (progress, transitions) = run(&single, &["/thanks"]);
        assert!(progress.unwrap().converted);
        assert_eq!(
            transitions[0],
            Transition::Started {
                conversion: Some(0)
            }
        );
    }

    #[test]
    fn test_converted_progress_only_tracks_activity() {
        let ab = funnel(&["/a", "/b"]);
        let (progress, transitions) = run(&ab, &["/a", "/b", "/a"]);
        let progress = progress.unwrap();

        assert_eq!(transitions[2], Transition::AlreadyConverted);
        assert_eq!(progress.current_step, 1);
        assert_eq!(progress.last_activity - progress.first_seen, Duration::seconds(2));
    }

    #[test]
    fn test_out_of_order_timestamp_keeps_latest_activity() {
        let ab = funnel(&["/a", "/b"]);
        let now = Utc::now();
        let mut slot = None;

        let first = Event::pageview("site", "v", "s", "/a").with_timestamp(now);
        apply(&mut slot, &ab, &[0], &first);
        let late = Event::pageview("site", "v", "s", "/a").with_timestamp(now - Duration::hours(1));
        apply(&mut slot, &ab, &[0], &late);

        assert_eq!(slot.unwrap().last_activity, now);
    }

    #[test]
    fn test_matched_properties_captured_by_step_id() {
        let ab = funnel(&["/a", "/b"]);
        let mut slot = None;
        let event = Event::pageview("site", "v", "s", "/a").with_property("plan", json!("pro"));
        apply(&mut slot, &ab, &[0], &event);

        let progress = slot.unwrap();
        let captured = progress.properties.get(&ab.steps[0].id.to_string()).unwrap();
        assert_eq!(captured["plan"], json!("pro"));
    }
}
