//! Deployment history read from the platform's event log
//!
//! Dokku logs one line per plugin hook, e.g.
//!
//! ```text
//! Jul  3 16:10:03 dokku.me dokku[128195]: INVOKED: pre-deploy( blog )
//! Jul  3 16:10:24 dokku.me dokku[129451]: INVOKED: check-deploy( blog 6274ced0d4be... web 5000 10.0.16.80 )
//! Jul  3 16:10:31 dokku.me dokku[129602]: INVOKED: post-deploy( blog 5000 10.0.16.80 )
//! ```
//!
//! A `pre-deploy` opens an attempt, `check-deploy` names the deployed commit
//! and `post-deploy` closes it successfully. An attempt superseded before its
//! `post-deploy` is reported as failed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use tracing::debug;

use crate::deploy::fsm;
use crate::deploy::service::HistorySource;
use crate::dokku::command::CommandRunner;
use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus};

/// Git ref recorded when no `check-deploy` named the commit
pub const UNKNOWN_GIT_REF: &str = "unknown";

/// Message of attempts that never reached `post-deploy`
pub const INCOMPLETE_ATTEMPT_MESSAGE: &str = "deployment did not reach post-deploy";

const SHORT_SHA_LEN: usize = 8;

/// Reads past deployments from `dokku events`
pub struct DokkuEventHistory {
    runner: Arc<dyn CommandRunner>,
}

impl DokkuEventHistory {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl HistorySource for DokkuEventHistory {
    async fn deployment_history(&self, app_name: &str) -> Result<Vec<Deployment>, DeployError> {
        let output = self
            .runner
            .execute("events", &[])
            .await
            .map_err(|e| DeployError::Command(format!("failed to read events: {}", e)))?;

        Ok(parse_events(&output, app_name, Utc::now()))
    }
}

struct Event<'a> {
    at: DateTime<Utc>,
    hook: &'a str,
    params: Vec<&'a str>,
}

struct Attempt {
    started_at: DateTime<Utc>,
    git_ref: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

impl Attempt {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            git_ref: None,
            finished_at: None,
        }
    }

    fn into_deployment(self, app_name: &str, latest: bool) -> Result<Deployment, DeployError> {
        let git_ref = self.git_ref.as_deref().unwrap_or(UNKNOWN_GIT_REF);
        let mut deployment = Deployment::with_created_at(app_name, git_ref, self.started_at)?;

        fsm::apply(&mut deployment, DeploymentStatus::Running, "", self.started_at);
        match self.finished_at {
            Some(finished_at) => {
                fsm::apply(&mut deployment, DeploymentStatus::Succeeded, "", finished_at);
            }
            None if !latest => {
                fsm::apply(
                    &mut deployment,
                    DeploymentStatus::Failed,
                    INCOMPLETE_ATTEMPT_MESSAGE,
                    self.started_at,
                );
            }
            None => {}
        }
        Ok(deployment)
    }
}

/// Deployments of `app_name` found in `dokku events` output, oldest first.
///
/// Log lines carry no year, the one of `now` is assumed.
pub fn parse_events(output: &str, app_name: &str, now: DateTime<Utc>) -> Vec<Deployment> {
    let mut attempts: Vec<Attempt> = Vec::new();

    for line in output.lines() {
        let Some(event) = parse_event_line(line, now) else {
            continue;
        };
        if event.params.first() != Some(&app_name) {
            continue;
        }

        let open = attempts.last_mut().filter(|a| a.finished_at.is_none());
        match event.hook {
            "pre-deploy" => attempts.push(Attempt::new(event.at)),
            "check-deploy" => {
                let sha = event.params.get(1).and_then(|sha| short_sha(sha));
                match open {
                    Some(attempt) => attempt.git_ref = sha.or(attempt.git_ref.take()),
                    None => attempts.push(Attempt {
                        git_ref: sha,
                        ..Attempt::new(event.at)
                    }),
                }
            }
            "post-deploy" => match open {
                Some(attempt) => attempt.finished_at = Some(event.at),
                None => attempts.push(Attempt {
                    finished_at: Some(event.at),
                    ..Attempt::new(event.at)
                }),
            },
            _ => {}
        }
    }

    let count = attempts.len();
    attempts
        .into_iter()
        .enumerate()
        .filter_map(|(i, attempt)| match attempt.into_deployment(app_name, i + 1 == count) {
            Ok(deployment) => Some(deployment),
            Err(e) => {
                debug!(app_name = %app_name, "Skipping deployment event: {}", e);
                None
            }
        })
        .collect()
}

fn parse_event_line(line: &str, now: DateTime<Utc>) -> Option<Event<'_>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 6 {
        return None;
    }

    let open = parts.iter().position(|part| part.ends_with('('))?;
    let hook = parts[open].trim_end_matches('(');
    let params = parts[open + 1..]
        .iter()
        .take_while(|part| **part != ")")
        .copied()
        .collect();

    let at = parse_timestamp(&parts[..3], now).unwrap_or_else(|| {
        debug!("Unreadable event timestamp: {}", parts[..3].join(" "));
        now
    });

    Some(Event { at, hook, params })
}

/// `Jul 3 16:10:03`, dated in the year of `now`, or the year before when
/// that would put it in the future
fn parse_timestamp(parts: &[&str], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = format!("{} {}", now.year(), parts.join(" "));
    let at = NaiveDateTime::parse_from_str(&text, "%Y %b %d %H:%M:%S")
        .ok()?
        .and_utc();

    if at > now + Duration::days(1) {
        return at.with_year(now.year() - 1);
    }
    Some(at)
}

fn short_sha(sha: &str) -> Option<String> {
    let valid = (SHORT_SHA_LEN..=64).contains(&sha.len()) && sha.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| sha[..SHORT_SHA_LEN].to_string())
}
