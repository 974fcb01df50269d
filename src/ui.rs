//! Terminal output for `roadmapper generate` and `roadmapper show`.
//!
//! [`JobProgress`] draws an `indicatif` bar that advances with each stage
//! event and colours degraded and failed stages with `console`.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::events::StageEvent;
use crate::job::{JobStatus, ResultSource};
use crate::persistence::PersistedArtifact;

/// Progress display for one job.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl JobProgress {
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:32.cyan/blue}] {pos:>3}% {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(format!("starting {job_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Advance the bar for one event. Terminal events finish it.
    pub fn on_event(&self, event: &StageEvent) {
        match event {
            StageEvent::Data {
                stage_key,
                source,
                completion,
                ..
            } => {
                self.pb.set_position(u64::from(*completion));
                if *source == ResultSource::Fallback {
                    self.pb.println(format!(
                        "  {} {stage_key}: model output unusable, placeholder used",
                        self.yellow.apply_to("!")
                    ));
                } else {
                    self.pb.println(format!("  {} {stage_key}", self.green.apply_to("✓")));
                }
                self.pb.set_message(stage_key.clone());
            }
            StageEvent::Error {
                stage_index,
                message,
                ..
            } => {
                self.pb.abandon_with_message("failed");
                println!(
                    "  {} stage {stage_index} failed: {message}",
                    self.red.apply_to("✗")
                );
            }
            StageEvent::Complete { .. } => {
                self.pb.finish_and_clear();
                println!("  {} Roadmap complete", self.green.apply_to("✓"));
            }
        }
    }

    /// Print a persisted roadmap: header line, then the stage values as JSON.
    pub fn print_artifact(&self, artifact: &PersistedArtifact) {
        print_artifact(artifact, &self.green, &self.red, &self.yellow, &self.dim);
    }
}

/// Print a persisted roadmap without a running progress bar.
pub fn show_artifact(artifact: &PersistedArtifact) {
    print_artifact(
        artifact,
        &Style::new().green().bold(),
        &Style::new().red().bold(),
        &Style::new().yellow(),
        &Style::new().dim(),
    );
}

fn print_artifact(
    artifact: &PersistedArtifact,
    green: &Style,
    red: &Style,
    yellow: &Style,
    dim: &Style,
) {
    let status_style = match artifact.status {
        JobStatus::Complete => green,
        JobStatus::Failed => red,
        _ => yellow,
    };
    println!();
    println!(
        "{} {}% {}",
        status_style.apply_to(format!("─── {} ───", artifact.status)),
        artifact.completion,
        dim.apply_to(&artifact.job_id)
    );
    if let Some(error) = &artifact.error {
        println!("  {} {error}", red.apply_to("error:"));
    }
    for (key, stage) in &artifact.stages {
        if stage.source == ResultSource::Fallback {
            println!("  {} {key} is a placeholder", yellow.apply_to("!"));
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&artifact.content()).unwrap_or_default()
    );
}
