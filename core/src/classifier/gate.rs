use super::{
    BinaryClassifier, ClassificationVote, ClassifierError, DecisionOutcome, RejectReason,
};
use crate::config::ThreadingMode;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Pairwise classifier consulted when the only surviving vote is a label
/// that is easily confused with a neutral state.
pub struct TieBreaker {
    pub ambiguous_label: String,
    pub safe_label: String,
    pub classifier: Box<dyn BinaryClassifier>,
}

impl TieBreaker {
    pub fn new(
        ambiguous_label: impl Into<String>,
        safe_label: impl Into<String>,
        classifier: Box<dyn BinaryClassifier>,
    ) -> Self {
        Self {
            ambiguous_label: ambiguous_label.into(),
            safe_label: safe_label.into(),
            classifier,
        }
    }

    /// Returns true when the pairwise model prefers the safe side.
    fn prefers_safe(&self, image: &[u8]) -> Result<bool, ClassifierError> {
        let votes = self.classifier.classify(image)?;
        let confidence_of = |label: &str| {
            votes
                .iter()
                .find(|vote| vote.label.eq_ignore_ascii_case(label))
                .map(|vote| vote.confidence)
        };
        match (
            confidence_of(&self.safe_label),
            confidence_of(&self.ambiguous_label),
        ) {
            (Some(safe), Some(ambiguous)) => Ok(safe > ambiguous),
            _ => Err(ClassifierError::Processing(format!(
                "tie-breaker {} did not report both {} and {}",
                self.classifier.name(),
                self.ambiguous_label,
                self.safe_label
            ))),
        }
    }
}

/// Ensemble of one-vs-rest classifiers plus optional tie-breakers.
pub struct ClassificationGate {
    members: Vec<Box<dyn BinaryClassifier>>,
    tie_breakers: Vec<TieBreaker>,
    rest_label: String,
    threading: ThreadingMode,
}

impl ClassificationGate {
    /// Builds a gate; fails with `ModelNotFound` when `members` is empty.
    pub fn new(
        members: Vec<Box<dyn BinaryClassifier>>,
        tie_breakers: Vec<TieBreaker>,
        rest_label: impl Into<String>,
        threading: ThreadingMode,
    ) -> Result<Self, ClassifierError> {
        if members.is_empty() {
            return Err(ClassifierError::ModelNotFound("ensemble".into()));
        }
        Ok(Self {
            members,
            tie_breakers,
            rest_label: rest_label.into(),
            threading,
        })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn tie_breaker_count(&self) -> usize {
        self.tie_breakers.len()
    }

    pub fn rest_label(&self) -> &str {
        &self.rest_label
    }

    /// Scores `image` with every member and applies the single-winner rule.
    ///
    /// Any member failure fails the whole call.
    pub fn classify(
        &self,
        image: &[u8],
        threshold: f32,
    ) -> Result<DecisionOutcome, ClassifierError> {
        let mut votes: Vec<ClassificationVote> = self
            .collect_votes(image)?
            .into_iter()
            .filter(|vote| !vote.label.eq_ignore_ascii_case(&self.rest_label))
            .collect();
        log_votes(&votes, threshold);

        let winners: Vec<usize> = votes
            .iter()
            .enumerate()
            .filter(|(_, vote)| vote.confidence >= threshold)
            .map(|(index, _)| index)
            .collect();

        if let [index] = winners[..] {
            if let Some(tie_breaker) = self
                .tie_breakers
                .iter()
                .find(|tie_breaker| {
                    tie_breaker
                        .ambiguous_label
                        .eq_ignore_ascii_case(&votes[index].label)
                })
            {
                match tie_breaker.prefers_safe(image) {
                    Ok(true) => {
                        info!(
                            label = %votes[index].label,
                            tie_breaker = tie_breaker.classifier.name(),
                            "tie-breaker preferred {}, discarding vote",
                            tie_breaker.safe_label
                        );
                        votes.remove(index);
                    }
                    Ok(false) => {}
                    Err(error) => {
                        warn!(
                            tie_breaker = tie_breaker.classifier.name(),
                            %error,
                            "tie-breaker failed, keeping ensemble vote"
                        );
                    }
                }
            }
        }

        Ok(decide(&votes, threshold, &self.rest_label))
    }

    fn collect_votes(&self, image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError> {
        let per_member: Vec<Vec<ClassificationVote>> = match self.threading {
            ThreadingMode::Parallel => self
                .members
                .par_iter()
                .map(|member| member.classify(image))
                .collect::<Result<_, _>>()?,
            ThreadingMode::Sequential => self
                .members
                .iter()
                .map(|member| member.classify(image))
                .collect::<Result<_, _>>()?,
        };
        Ok(per_member.into_iter().flatten().collect())
    }
}

/// Applies the single-winner threshold rule to `votes`.
///
/// Votes for `rest_label` (case-insensitive) never count.
pub fn decide(votes: &[ClassificationVote], threshold: f32, rest_label: &str) -> DecisionOutcome {
    let mut winners = votes
        .iter()
        .filter(|vote| !vote.label.eq_ignore_ascii_case(rest_label))
        .filter(|vote| vote.confidence >= threshold);

    match (winners.next(), winners.next()) {
        (None, _) => DecisionOutcome::Rejected(RejectReason::NoWinner),
        (Some(vote), None) => DecisionOutcome::Accepted {
            label: vote.label.clone(),
            confidence: vote.confidence,
        },
        (Some(_), Some(_)) => DecisionOutcome::Rejected(RejectReason::MultipleWinners),
    }
}

fn log_votes(votes: &[ClassificationVote], threshold: f32) {
    let mut sorted: Vec<&ClassificationVote> = votes.iter().collect();
    sorted.sort_by(|a, b| a.label.cmp(&b.label));
    for vote in sorted {
        debug!(
            label = %vote.label,
            confidence = vote.confidence,
            passed = vote.confidence >= threshold,
            "vote"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedClassifier {
        name: String,
        votes: Vec<ClassificationVote>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedClassifier {
        fn boxed(name: &str, votes: &[(&str, f32)]) -> Box<dyn BinaryClassifier> {
            Self::counted(name, votes, Arc::new(AtomicUsize::new(0)))
        }

        fn counted(
            name: &str,
            votes: &[(&str, f32)],
            calls: Arc<AtomicUsize>,
        ) -> Box<dyn BinaryClassifier> {
            Box::new(Self {
                name: name.to_string(),
                votes: votes
                    .iter()
                    .map(|(label, confidence)| ClassificationVote::new(*label, *confidence))
                    .collect(),
                calls,
            })
        }
    }

    impl BinaryClassifier for FixedClassifier {
        fn name(&self) -> &str {
            &self.name
        }

        fn classify(&self, _image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.votes.clone())
        }
    }

    struct FailingClassifier;

    impl BinaryClassifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        fn classify(&self, _image: &[u8]) -> Result<Vec<ClassificationVote>, ClassifierError> {
            Err(ClassifierError::Processing(String::from("inference failed")))
        }
    }

    fn votes(pairs: &[(&str, f32)]) -> Vec<ClassificationVote> {
        pairs
            .iter()
            .map(|(label, confidence)| ClassificationVote::new(*label, *confidence))
            .collect()
    }

    fn gate(
        members: Vec<Box<dyn BinaryClassifier>>,
        tie_breakers: Vec<TieBreaker>,
        threading: ThreadingMode,
    ) -> ClassificationGate {
        ClassificationGate::new(members, tie_breakers, "rest", threading).unwrap()
    }

    #[test]
    fn two_labels_above_threshold_are_rejected() {
        let outcome = decide(&votes(&[("A", 0.9), ("B", 0.91), ("rest", 0.99)]), 0.85, "rest");
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::MultipleWinners));
    }

    #[test]
    fn single_label_above_threshold_is_accepted() {
        let outcome = decide(&votes(&[("A", 0.9), ("B", 0.2)]), 0.85, "rest");
        assert_eq!(
            outcome,
            DecisionOutcome::Accepted {
                label: String::from("A"),
                confidence: 0.9
            }
        );
    }

    #[test]
    fn no_label_above_threshold_is_rejected() {
        let outcome = decide(&votes(&[("A", 0.5), ("B", 0.2)]), 0.85, "rest");
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::NoWinner));
    }

    #[test]
    fn rest_label_is_ignored_regardless_of_case() {
        let outcome = decide(&votes(&[("Rest", 0.99), ("A", 0.88)]), 0.85, "rest");
        assert!(matches!(outcome, DecisionOutcome::Accepted { ref label, .. } if label == "A"));
    }

    #[test]
    fn threshold_is_inclusive() {
        let outcome = decide(&votes(&[("A", 0.85)]), 0.85, "rest");
        assert!(matches!(outcome, DecisionOutcome::Accepted { .. }));
    }

    #[test]
    fn gate_collects_votes_across_members() {
        for mode in [ThreadingMode::Parallel, ThreadingMode::Sequential] {
            let gate = gate(
                vec![
                    FixedClassifier::boxed("OvR_A", &[("A", 0.9), ("rest", 0.1)]),
                    FixedClassifier::boxed("OvR_B", &[("B", 0.3), ("rest", 0.7)]),
                ],
                Vec::new(),
                mode,
            );
            let outcome = gate.classify(b"img", 0.85).unwrap();
            assert!(matches!(outcome, DecisionOutcome::Accepted { ref label, .. } if label == "A"));
        }
    }

    #[test]
    fn member_failure_fails_the_call() {
        let gate = gate(
            vec![
                FixedClassifier::boxed("OvR_A", &[("A", 0.9), ("rest", 0.1)]),
                Box::new(FailingClassifier),
            ],
            Vec::new(),
            ThreadingMode::Parallel,
        );
        assert!(gate.classify(b"img", 0.85).is_err());
    }

    #[test]
    fn empty_ensemble_is_model_not_found() {
        let result =
            ClassificationGate::new(Vec::new(), Vec::new(), "rest", ThreadingMode::Sequential);
        assert!(matches!(result, Err(ClassifierError::ModelNotFound(_))));
    }

    #[test]
    fn tie_breaker_preferring_safe_discards_the_vote() {
        let gate = gate(
            vec![FixedClassifier::boxed(
                "OvR_mouth_open",
                &[("mouth_open", 0.9), ("rest", 0.1)],
            )],
            vec![TieBreaker::new(
                "mouth_open",
                "safe",
                FixedClassifier::boxed(
                    "OvO_mouth_open_vs_safe",
                    &[("safe", 0.7), ("mouth_open", 0.3)],
                ),
            )],
            ThreadingMode::Sequential,
        );
        let outcome = gate.classify(b"img", 0.85).unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::NoWinner));
    }

    #[test]
    fn tie_breaker_preferring_ambiguous_keeps_the_vote() {
        let gate = gate(
            vec![FixedClassifier::boxed(
                "OvR_mouth_open",
                &[("mouth_open", 0.9), ("rest", 0.1)],
            )],
            vec![TieBreaker::new(
                "mouth_open",
                "safe",
                FixedClassifier::boxed(
                    "OvO_mouth_open_vs_safe",
                    &[("safe", 0.2), ("mouth_open", 0.8)],
                ),
            )],
            ThreadingMode::Sequential,
        );
        let outcome = gate.classify(b"img", 0.85).unwrap();
        assert_eq!(
            outcome,
            DecisionOutcome::Accepted {
                label: String::from("mouth_open"),
                confidence: 0.9
            }
        );
    }

    #[test]
    fn tie_breaker_failure_keeps_the_vote() {
        let gate = gate(
            vec![FixedClassifier::boxed("OvR_mouth_open", &[("mouth_open", 0.9)])],
            vec![TieBreaker::new("mouth_open", "safe", Box::new(FailingClassifier))],
            ThreadingMode::Sequential,
        );
        let outcome = gate.classify(b"img", 0.85).unwrap();
        assert!(matches!(outcome, DecisionOutcome::Accepted { .. }));
    }

    #[test]
    fn tie_breaker_is_skipped_unless_ambiguous_label_is_sole_winner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate(
            vec![
                FixedClassifier::boxed("OvR_mouth_open", &[("mouth_open", 0.9)]),
                FixedClassifier::boxed("OvR_sleeping", &[("sleeping", 0.95)]),
            ],
            vec![TieBreaker::new(
                "mouth_open",
                "safe",
                FixedClassifier::counted(
                    "OvO",
                    &[("safe", 0.9), ("mouth_open", 0.1)],
                    calls.clone(),
                ),
            )],
            ThreadingMode::Parallel,
        );
        let outcome = gate.classify(b"img", 0.85).unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::MultipleWinners));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn mouth_open_gate(tie_breaker_label: &str) -> ClassificationGate {
        gate(
            vec![FixedClassifier::boxed(
                "OvR_mouth_open",
                &[("mouth_open", 0.9), ("rest", 0.1)],
            )],
            vec![TieBreaker::new(
                tie_breaker_label,
                "safe",
                FixedClassifier::boxed(
                    "OvO_mouth_open_vs_safe",
                    &[("safe", 0.7), ("mouth_open", 0.3)],
                ),
            )],
            ThreadingMode::Sequential,
        )
    }

    #[test]
    fn discarded_vote_stays_rejected_at_zero_threshold() {
        let outcome = mouth_open_gate("mouth_open").classify(b"img", 0.0).unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::NoWinner));
    }

    #[test]
    fn tie_breaker_label_matches_regardless_of_case() {
        let outcome = mouth_open_gate("Mouth_Open").classify(b"img", 0.85).unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected(RejectReason::NoWinner));
    }

    #[test]
    fn gate_reports_its_model_counts() {
        let gate = mouth_open_gate("mouth_open");
        assert_eq!(gate.member_count(), 1);
        assert_eq!(gate.tie_breaker_count(), 1);
        assert_eq!(gate.rest_label(), "rest");
    }
}
