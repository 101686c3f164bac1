//! Topic and path completion.
//!
//! Everything here is a pure function of its inputs; persisting the result is
//! the caller's business (see [`needs_persist`]).

use crate::model::TopicName;
use crate::rounding::round_to;

/// Minimum resource ratio and assessment average for a topic to count as done.
pub const COMPLETION_THRESHOLD: f64 = 0.80;

/// Stored path progress is rewritten only when the new value differs by more than this.
pub const PROGRESS_WRITE_EPSILON: f64 = 0.01;

/// Decimal places kept for path progress.
pub const PROGRESS_DECIMALS: i32 = 4;

// Absorbs representation error so that 0.8 reached by division still counts.
const THRESHOLD_TOLERANCE: f64 = 1e-9;

/// What the calculator needs to know about one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInput {
    pub name: TopicName,
    pub total_resources: usize,
    pub viewed_resources: usize,
    /// Average of the latest submitted assessment, if any.
    pub assessment_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicProgress {
    pub name: TopicName,
    pub resource_progress: f64,
    pub assessment_average: Option<f64>,
    pub complete: bool,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathProgressReport {
    pub topics: Vec<TopicProgress>,
    pub completed_topics: usize,
    pub viewed_resources: usize,
    pub total_resources: usize,
    pub path_progress: f64,
}

impl PathProgressReport {
    #[must_use]
    pub fn total_topics(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn topic(&self, name: &TopicName) -> Option<&TopicProgress> {
        self.topics.iter().find(|t| &t.name == name)
    }
}

/// Fraction of a topic's resources that were viewed; `1.0` for a topic
/// without resources.
#[must_use]
pub fn resource_progress(viewed: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (viewed.min(total) as f64) / (total as f64)
}

#[must_use]
pub fn meets_threshold(value: f64) -> bool {
    value + THRESHOLD_TOLERANCE >= COMPLETION_THRESHOLD
}

/// A topic is complete once both its resource ratio and its assessment
/// average reach the threshold. No assessment means not complete.
#[must_use]
pub fn topic_complete(resource_progress: f64, assessment_average: Option<f64>) -> bool {
    assessment_average.is_some_and(meets_threshold) && meets_threshold(resource_progress)
}

/// `1.0` for a complete topic, otherwise its resource ratio.
#[must_use]
pub fn topic_progress(resource_progress: f64, complete: bool) -> f64 {
    if complete { 1.0 } else { resource_progress }
}

/// Mean of the scores, or `None` when there are none.
#[must_use]
pub fn average_score(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Evaluate every topic and derive the path's completion fraction.
#[must_use]
pub fn calculate(topics: &[TopicInput]) -> PathProgressReport {
    let evaluated: Vec<TopicProgress> = topics
        .iter()
        .map(|t| {
            let ratio = resource_progress(t.viewed_resources, t.total_resources);
            let complete = topic_complete(ratio, t.assessment_average);
            TopicProgress {
                name: t.name.clone(),
                resource_progress: ratio,
                assessment_average: t.assessment_average,
                complete,
                progress: topic_progress(ratio, complete),
            }
        })
        .collect();

    let completed_topics = evaluated.iter().filter(|t| t.complete).count();
    let path_progress = if evaluated.is_empty() {
        0.0
    } else {
        let raw = completed_topics as f64 / evaluated.len() as f64;
        round_to(raw.clamp(0.0, 1.0), PROGRESS_DECIMALS)
    };

    PathProgressReport {
        completed_topics,
        viewed_resources: topics
            .iter()
            .map(|t| t.viewed_resources.min(t.total_resources))
            .sum(),
        total_resources: topics.iter().map(|t| t.total_resources).sum(),
        path_progress,
        topics: evaluated,
    }
}

/// Whether `computed` should replace `stored`.
#[must_use]
pub fn needs_persist(stored: f64, computed: f64) -> bool {
    (computed - stored).abs() > PROGRESS_WRITE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, total: usize, viewed: usize, avg: Option<f64>) -> TopicInput {
        TopicInput {
            name: TopicName::new(name),
            total_resources: total,
            viewed_resources: viewed,
            assessment_average: avg,
        }
    }

    #[test]
    fn threshold_is_inclusive_on_both_axes() {
        assert!(topic_complete(0.80, Some(0.80)));
        assert!(!topic_complete(0.80, Some(0.79)));
        assert!(!topic_complete(0.79, Some(0.95)));
        assert!(!topic_complete(1.0, None));
    }

    #[test]
    fn ratio_computed_by_division_meets_threshold() {
        assert!(meets_threshold(resource_progress(4, 5)));
        assert!(meets_threshold(average_score(&[0.7, 0.9]).unwrap()));
    }

    #[test]
    fn topic_without_resources_counts_as_fully_viewed() {
        assert_eq!(resource_progress(0, 0), 1.0);
    }

    #[test]
    fn score_alone_does_not_raise_topic_progress() {
        let report = calculate(&[input("A", 5, 2, Some(1.0))]);
        assert_eq!(report.topics[0].progress, 0.4);
        assert!(!report.topics[0].complete);
    }

    #[test]
    fn two_topic_scenario_is_half_complete() {
        let report = calculate(&[input("A", 5, 4, Some(0.85)), input("B", 5, 2, None)]);
        assert!(report.topics[0].complete);
        assert_eq!(report.topics[0].progress, 1.0);
        assert!(!report.topics[1].complete);
        assert_eq!(report.path_progress, 0.5);
        assert_eq!(report.completed_topics, 1);
        assert_eq!(report.viewed_resources, 6);
        assert_eq!(report.total_resources, 10);
    }

    #[test]
    fn path_progress_is_rounded_to_four_places() {
        let report = calculate(&[
            input("A", 1, 1, Some(1.0)),
            input("B", 1, 0, None),
            input("C", 1, 0, None),
        ]);
        assert_eq!(report.path_progress, 0.3333);
    }

    #[test]
    fn path_progress_never_decreases_as_topics_complete() {
        let mut topics: Vec<TopicInput> =
            (0..7).map(|i| input(&format!("T{i}"), 3, 0, None)).collect();
        let mut last = calculate(&topics).path_progress;
        for i in 0..topics.len() {
            topics[i].viewed_resources = 3;
            topics[i].assessment_average = Some(0.9);
            let next = calculate(&topics).path_progress;
            assert!(next >= last);
            last = next;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn empty_path_has_zero_progress() {
        assert_eq!(calculate(&[]).path_progress, 0.0);
    }

    #[test]
    fn small_differences_are_not_persisted() {
        assert!(!needs_persist(0.5, 0.505));
        assert!(needs_persist(0.5, 0.52));
        assert!(needs_persist(0.5, 0.0));
    }
}
