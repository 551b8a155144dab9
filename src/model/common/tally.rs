use std::collections::HashMap;

use serde::Deserialize;

use crate::model::{
    api::results::{BallotResults, OptionResult, QuestionResults, WriteInResult},
    db::ballot::Ballot,
    mongodb::Id,
};

/// One group from the vote count aggregation: how many votes a question
/// received for a given option, or as write-ins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoteCount {
    pub question_id: Id,
    pub option_id: Option<Id>,
    pub write_in: bool,
    pub count: u64,
}

/// Roster totals for participation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RosterCounts {
    pub registered: u64,
    pub voted: u64,
}

/// `100 * part / whole`, defined as 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Turn raw vote counts into per-question results.
///
/// Questions and options come out in ballot order. Options that received no
/// votes are reported with a zero count.
pub fn tabulate(ballot: &Ballot, counts: &[VoteCount], roster: RosterCounts) -> BallotResults {
    let mut by_option: HashMap<(Id, Id), u64> = HashMap::new();
    let mut write_ins: HashMap<Id, u64> = HashMap::new();
    let mut totals: HashMap<Id, u64> = HashMap::new();
    for group in counts {
        *totals.entry(group.question_id).or_default() += group.count;
        if group.write_in {
            *write_ins.entry(group.question_id).or_default() += group.count;
        } else if let Some(option) = group.option_id {
            *by_option.entry((group.question_id, option)).or_default() += group.count;
        }
    }

    let questions = ballot
        .questions
        .iter()
        .map(|question| {
            let total_votes = totals.get(&question.id).copied().unwrap_or(0);
            let options = question
                .options
                .iter()
                .map(|option| {
                    let count = by_option
                        .get(&(question.id, option.id))
                        .copied()
                        .unwrap_or(0);
                    OptionResult {
                        option_id: option.id.into(),
                        text: option.text.clone(),
                        count,
                        percentage: percentage(count, total_votes),
                    }
                })
                .collect();
            let write_in_count = write_ins.get(&question.id).copied().unwrap_or(0);
            QuestionResults {
                question_id: question.id.into(),
                title: question.title.clone(),
                total_votes,
                options,
                write_ins: WriteInResult {
                    count: write_in_count,
                    percentage: percentage(write_in_count, total_votes),
                },
            }
        })
        .collect();

    BallotResults {
        ballot_id: ballot.id.into(),
        status: ballot.status,
        registered_voters: roster.registered,
        voted_voters: roster.voted,
        participation_rate: percentage(roster.voted, roster.registered),
        questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::common::status::BallotStatus;

    fn count(question: Id, option: Option<Id>, write_in: bool, count: u64) -> VoteCount {
        VoteCount {
            question_id: question,
            option_id: option,
            write_in,
            count,
        }
    }

    #[test]
    fn percentage_of_nothing_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }

    #[test]
    fn single_vote_takes_everything() {
        let ballot = Ballot::live_example();
        let question = &ballot.questions[0];
        let (a, b) = (question.options[0].id, question.options[1].id);
        let counts = [count(question.id, Some(a), false, 1)];

        let results = tabulate(
            &ballot,
            &counts,
            RosterCounts {
                registered: 2,
                voted: 1,
            },
        );
        assert_eq!(results.status, BallotStatus::Live);
        assert_eq!(results.participation_rate, 50.0);

        let q = &results.questions[0];
        assert_eq!(q.total_votes, 1);
        assert_eq!(*q.options[0].option_id, a);
        assert_eq!((q.options[0].count, q.options[0].percentage), (1, 100.0));
        assert_eq!(*q.options[1].option_id, b);
        assert_eq!((q.options[1].count, q.options[1].percentage), (0, 0.0));
        assert_eq!(q.write_ins.count, 0);
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let ballot = Ballot::live_example();
        let question = &ballot.questions[1];
        let counts = [
            count(question.id, Some(question.options[0].id), false, 1),
            count(question.id, Some(question.options[1].id), false, 1),
            count(question.id, Some(question.options[2].id), false, 1),
            count(question.id, None, true, 2),
        ];

        let results = tabulate(&ballot, &counts, RosterCounts::default());
        let q = &results.questions[1];
        assert_eq!(q.total_votes, 5);
        assert_eq!(q.write_ins.percentage, 40.0);
        let sum: f64 = q
            .options
            .iter()
            .map(|o| o.percentage)
            .chain([q.write_ins.percentage])
            .sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn unvoted_ballot_is_all_zero() {
        let ballot = Ballot::live_example();
        let results = tabulate(&ballot, &[], RosterCounts::default());
        assert_eq!(results.participation_rate, 0.0);
        for question in &results.questions {
            assert_eq!(question.total_votes, 0);
            assert!(question.options.iter().all(|o| o.percentage == 0.0));
            assert_eq!(question.write_ins.percentage, 0.0);
        }
    }
}
