use std::collections::HashSet;

use chrono::Utc;
use log::debug;
use mongodb::bson::{self, doc, to_bson};
use rocket::futures::FutureExt;

use crate::{
    error::{Error, Result},
    model::{
        api::ballot::{OptionSpec, QuestionOrder, QuestionSpec},
        common::status::BallotStatus,
        mongodb::{Id, Store},
    },
};

use super::{queries::owned_ballot_in, Ballot, BallotCore};

/// Append a question to a draft ballot.
pub async fn add_question(
    store: &Store,
    owner: Id,
    ballot_id: Id,
    spec: QuestionSpec,
) -> Result<Ballot> {
    spec.validate()?;
    edit_draft(store, owner, ballot_id, move |ballot| {
        let question = spec.clone().into_question(ballot.questions.len());
        debug!("Adding question {} to ballot {ballot_id}", question.id);
        ballot.questions.push(question);
        Ok(())
    })
    .await
}

/// Append an option to one of a draft ballot's questions.
pub async fn add_option(
    store: &Store,
    owner: Id,
    ballot_id: Id,
    question_id: Id,
    spec: OptionSpec,
) -> Result<Ballot> {
    spec.validate()?;
    edit_draft(store, owner, ballot_id, move |ballot| {
        let question = ballot
            .question_mut(question_id)
            .ok_or_else(|| Error::not_found(format!("Question {question_id}")))?;
        let option = spec.clone().into_option(question.options.len());
        debug!("Adding option {} to question {question_id}", option.id);
        question.options.push(option);
        Ok(())
    })
    .await
}

/// Reassign question positions to follow `order`, which must name every
/// question of the ballot exactly once.
pub async fn reorder_questions(
    store: &Store,
    owner: Id,
    ballot_id: Id,
    order: QuestionOrder,
) -> Result<Ballot> {
    edit_draft(store, owner, ballot_id, move |ballot| {
        apply_order(ballot, &order.question_ids)
    })
    .await
}

fn apply_order(ballot: &mut BallotCore, order: &[Id]) -> Result<()> {
    let existing: HashSet<Id> = ballot.questions.iter().map(|q| q.id).collect();
    let requested: HashSet<Id> = order.iter().copied().collect();
    if order.len() != existing.len() || requested != existing {
        return Err(Error::BadRequest(
            "question order must list every question of the ballot exactly once".to_string(),
        ));
    }
    for (position, question_id) in order.iter().enumerate() {
        if let Some(question) = ballot.question_mut(*question_id) {
            question.order_index = i32::try_from(position).unwrap_or(i32::MAX);
        }
    }
    Ok(())
}

/// Apply `edit` to a draft ballot's structure and write the questions back.
///
/// Runs in a transaction that writes the ballot document, so a concurrent
/// status change or edit forces a retry against the newer state.
async fn edit_draft<E>(store: &Store, owner: Id, ballot_id: Id, edit: E) -> Result<Ballot>
where
    E: Fn(&mut BallotCore) -> Result<()> + Clone + Send + Sync + 'static,
{
    let ballots = store.coll::<Ballot>();
    store
        .transaction(|session| {
            let ballots = ballots.clone();
            let edit = edit.clone();
            async move {
                let mut ballot = owned_ballot_in(&ballots, owner, ballot_id, session).await?;
                ballot.status.ensure_editable()?;
                edit(&mut ballot.ballot)?;
                ballot.sort_questions();
                ballot.updated_at = Utc::now();

                let questions = to_bson(&ballot.questions)
                    .map_err(|e| Error::BadRequest(format!("unstorable question: {e}")))?;
                let update = doc! {
                    "$set": {
                        "questions": questions,
                        "updated_at": bson::DateTime::from_chrono(ballot.updated_at),
                    }
                };
                let filter = doc! {"_id": ballot_id, "status": BallotStatus::Draft};
                ballots
                    .update_one_with_session(filter, update, None, session)
                    .await?;
                Ok(ballot)
            }
            .boxed()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_requires_permutation() {
        let mut ballot = Ballot::draft_example();
        let ids: Vec<Id> = ballot.questions.iter().map(|q| q.id).collect();

        let missing = [ids[0]];
        assert!(matches!(
            apply_order(&mut ballot, &missing),
            Err(Error::BadRequest(_))
        ));
        let repeated = [ids[0], ids[0]];
        assert!(matches!(
            apply_order(&mut ballot, &repeated),
            Err(Error::BadRequest(_))
        ));
        let stranger = [ids[0], Id::new()];
        assert!(apply_order(&mut ballot, &stranger).is_err());

        let reversed = [ids[1], ids[0]];
        apply_order(&mut ballot, &reversed).unwrap();
        ballot.sort_questions();
        let order: Vec<Id> = ballot.questions.iter().map(|q| q.id).collect();
        assert_eq!(order, reversed);
    }
}
