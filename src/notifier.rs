use aws_sdk_sns::Client as SnsClient;
use log::{debug, error, info};
use rocket::tokio;
use serde::Serialize;

use crate::model::{api::ApiId, mongodb::Id};

/// An invitation to vote, as published for the mailer to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invitation {
    pub ballot_id: ApiId,
    pub ballot_title: String,
    pub email: String,
    /// Where the voter can find the ballot, if a base URL is configured.
    pub url: Option<String>,
}

/// Publishes voter invitations to an SNS topic. Fire and forget: failures
/// are logged and never reported to the caller.
#[derive(Clone)]
pub struct Notifier {
    target: Option<(SnsClient, String)>,
    ballot_url: Option<String>,
}

impl Notifier {
    /// Publish invitations to `topic_arn` through `client`.
    pub fn new(client: SnsClient, topic_arn: String, ballot_url: Option<String>) -> Self {
        Self {
            target: Some((client, topic_arn)),
            ballot_url,
        }
    }

    /// A notifier that drops every invitation.
    pub fn disabled() -> Self {
        Self {
            target: None,
            ballot_url: None,
        }
    }

    /// Build the invitation messages for a batch of newly enrolled voters.
    pub fn invitations(&self, ballot_id: Id, ballot_title: &str, emails: &[String]) -> Vec<Invitation> {
        let url = self
            .ballot_url
            .as_ref()
            .map(|base| format!("{}/voter/ballots/{ballot_id}", base.trim_end_matches('/')));
        emails
            .iter()
            .map(|email| Invitation {
                ballot_id: ballot_id.into(),
                ballot_title: ballot_title.to_string(),
                email: email.clone(),
                url: url.clone(),
            })
            .collect()
    }

    /// Send invitations in the background.
    pub fn dispatch_invitations(&self, ballot_id: Id, ballot_title: String, emails: Vec<String>) {
        let Some((client, topic_arn)) = self.target.clone() else {
            debug!("Invitations are disabled; not notifying {} voters", emails.len());
            return;
        };
        let invitations = self.invitations(ballot_id, &ballot_title, &emails);

        tokio::spawn(async move {
            let mut sent = 0;
            for invitation in invitations {
                let message = match rocket::serde::json::to_string(&invitation) {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Failed to encode invitation for {}: {e}", invitation.email);
                        continue;
                    }
                };
                let result = client
                    .publish()
                    .topic_arn(&topic_arn)
                    .subject(format!("Invitation to vote: {}", invitation.ballot_title))
                    .message(message)
                    .send()
                    .await;
                match result {
                    Ok(_) => sent += 1,
                    Err(e) => error!("Failed to invite {} to ballot {ballot_id}: {e}", invitation.email),
                }
            }
            info!("Sent {sent} invitations for ballot {ballot_id}");
        });
    }
}
