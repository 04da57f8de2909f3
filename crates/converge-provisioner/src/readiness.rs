//! Waiting for a mutated object to report ready.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProvisionerError;

/// Tri-state readiness condition as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Unknown,
    True,
    /// Terminal failure with the provider's message.
    False(String),
}

/// One readiness observation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Observation {
    /// Generation the provider has reconciled. Observations older than the
    /// generation a mutation produced describe the previous revision.
    pub observed_generation: Option<i64>,
    pub condition: Condition,
}

/// Poll until the object reports ready.
///
/// Observations with `observed_generation` behind `generation` are ignored.
/// `Condition::False` fails immediately with the provider's message; anything
/// else keeps polling every `interval`.
pub async fn wait_until_ready<F, Fut>(
    kind: &str,
    name: &str,
    generation: Option<i64>,
    interval: Duration,
    cancel: &CancellationToken,
    mut poll: F,
) -> Result<(), ProvisionerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation, ProvisionerError>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionerError::Cancelled);
        }

        let observed = poll().await?;
        let stale = matches!(
            (generation, observed.observed_generation),
            (Some(wanted), Some(seen)) if seen < wanted
        ) || (generation.is_some() && observed.observed_generation.is_none());

        if stale {
            tracing::debug!(kind, name, ?generation, seen = ?observed.observed_generation, "ignoring stale readiness");
        } else {
            match observed.condition {
                Condition::True => {
                    tracing::info!(kind, name, "resource ready");
                    return Ok(());
                }
                Condition::False(message) => {
                    return Err(ProvisionerError::NotReady {
                        kind: kind.to_string(),
                        name: name.to_string(),
                        message,
                    });
                }
                Condition::Unknown => {
                    tracing::debug!(kind, name, "waiting for readiness");
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ProvisionerError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn scripted(
        observations: Vec<Observation>,
    ) -> (
        Arc<Mutex<VecDeque<Observation>>>,
        Arc<Mutex<usize>>,
    ) {
        (
            Arc::new(Mutex::new(observations.into())),
            Arc::new(Mutex::new(0)),
        )
    }

    fn obs(generation: i64, condition: Condition) -> Observation {
        Observation {
            observed_generation: Some(generation),
            condition,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_true_is_ignored() {
        let (queue, polls) = scripted(vec![
            obs(1, Condition::True),
            obs(2, Condition::Unknown),
            obs(2, Condition::True),
        ]);
        let cancel = CancellationToken::new();
        wait_until_ready("service", "api", Some(2), Duration::from_secs(5), &cancel, || {
            let queue = queue.clone();
            let polls = polls.clone();
            async move {
                *polls.lock().unwrap() += 1;
                Ok(queue.lock().unwrap().pop_front().unwrap_or_default())
            }
        })
        .await
        .unwrap();
        assert_eq!(*polls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn false_condition_fails_with_message() {
        let (queue, _) = scripted(vec![obs(3, Condition::False("image not found".into()))]);
        let cancel = CancellationToken::new();
        let err = wait_until_ready("service", "api", Some(3), Duration::from_secs(5), &cancel, || {
            let queue = queue.clone();
            async move { Ok(queue.lock().unwrap().pop_front().unwrap_or_default()) }
        })
        .await
        .unwrap_err();
        match err {
            ProvisionerError::NotReady { message, .. } => assert_eq!(message, "image not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });
        let err = wait_until_ready("service", "api", None, Duration::from_secs(5), &cancel, || async {
            Ok(Observation::default())
        })
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
