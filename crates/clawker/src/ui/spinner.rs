//! Progress spinner over pipeline events
//!
//! Drains the pipeline's bounded event channel and renders step progress
//! as a spinner on stderr. Warnings are buffered while the spinner runs
//! and handed back to the caller so they print after the spinner stops
//! and before the short container ID goes to stdout.

use clawker_core::progress::PipelineEvent;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

/// Drain events until the channel closes. Returns the buffered warnings
/// in arrival order.
pub async fn consume_events(mut rx: Receiver<PipelineEvent>) -> Vec<String> {
    let interactive = atty::is(atty::Stream::Stderr);
    let pb = if interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    } else {
        None
    };

    let mut warnings = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StepBegin { step } => match &pb {
                Some(pb) => pb.set_message(format!("{}", style(format!("{step}…")).yellow())),
                None => eprintln!("{step}…"),
            },
            PipelineEvent::StepEnd { .. } => {}
            PipelineEvent::Message { text } => match &pb {
                Some(pb) => pb.println(text),
                None => eprintln!("{text}"),
            },
            // Held back so they never interleave with the live line.
            PipelineEvent::Warning { text } => warnings.push(text),
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    warnings
}

/// Print buffered warnings to stderr, after the spinner has stopped.
pub fn flush_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("{} {warning}", style("warning:").yellow().bold());
    }
}
