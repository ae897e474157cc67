use attack_core::{
    AttackConfig, Attacker, CancellationToken, ExperimentConfig, HeaderTally, Metrics,
    PerturbConfig, StaticTargeter, Target, Transport,
};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

/// What happened to the perturbation of one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PerturbOutcome {
    /// The experiment has no perturbation
    None,
    /// The attack finished before the perturbation was due
    Skipped,
    Succeeded { output: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub name: String,
    pub timestamp: String,
    pub metrics: Metrics,
    pub headers: HeaderTally,
    pub perturb: PerturbOutcome,
}

impl ExperimentReport {
    pub fn failed(&self) -> bool {
        matches!(self.perturb, PerturbOutcome::Failed { .. })
    }
}

/// Run one attack, perturbing the target partway through when configured.
///
/// A failed perturbation cancels the attack; the report still carries the
/// metrics of every request issued before that.
pub async fn run_experiment(
    experiment: &ExperimentConfig,
    target: Target,
    attack: &AttackConfig,
    transport: Arc<dyn Transport>,
    capture_headers: &[String],
) -> anyhow::Result<ExperimentReport> {
    info!("Starting experiment '{}'", experiment.name);

    let mut attacker = Attacker::new(transport);
    if let Some(limit) = attack.max_in_flight {
        attacker = attacker.with_max_in_flight(limit);
    }

    let cancel = CancellationToken::new();
    let (stream, _handle) = attacker.start_with_token(
        Arc::new(StaticTargeter::new(target)),
        attack.rate,
        attack.duration(),
        cancel.clone(),
    )?;

    let finished = CancellationToken::new();
    let perturb_handle = experiment.perturb.clone().map(|perturb| {
        tokio::spawn(perturb_target(perturb, cancel.clone(), finished.clone()))
    });

    let (results, wait) = stream.collect().await;
    finished.cancel();

    let perturb = match perturb_handle {
        Some(handle) => handle.await?,
        None => PerturbOutcome::None,
    };

    Ok(ExperimentReport {
        name: experiment.name.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        metrics: Metrics::new(&results, wait),
        headers: HeaderTally::new(&results, capture_headers),
        perturb,
    })
}

async fn perturb_target(
    perturb: PerturbConfig,
    cancel: CancellationToken,
    finished: CancellationToken,
) -> PerturbOutcome {
    tokio::select! {
        _ = sleep(Duration::from_millis(perturb.after_ms)) => {}
        _ = finished.cancelled() => return PerturbOutcome::Skipped,
    }

    let outcome = run_command(&perturb.command).await;
    match &outcome {
        PerturbOutcome::Succeeded { output } => {
            info!("Perturbation {:?} done: {}", perturb.command, output.trim())
        }
        PerturbOutcome::Failed { reason } => {
            warn!(
                "Perturbation {:?} failed, cancelling attack: {}",
                perturb.command, reason
            );
            cancel.cancel();
        }
        _ => {}
    }
    outcome
}

async fn run_command(command: &[String]) -> PerturbOutcome {
    let Some((program, args)) = command.split_first() else {
        return PerturbOutcome::Failed {
            reason: "empty command".to_string(),
        };
    };

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                PerturbOutcome::Succeeded { output: text }
            } else {
                PerturbOutcome::Failed {
                    reason: format!("exited with {}: {}", output.status, text.trim()),
                }
            }
        }
        Err(e) => PerturbOutcome::Failed {
            reason: format!("failed to spawn {program}: {e}"),
        },
    }
}
