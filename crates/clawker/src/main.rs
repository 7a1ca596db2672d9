use clap::Parser;
use console::style;
use std::process::ExitCode;

mod cli;
mod commands;
mod ui;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = clawker_core::logging::init() {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::from(1);
    }

    // clap exits 2 on usage errors before we get here.
    let parsed = cli::Cli::parse();
    match parsed.dispatch().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            render_error(&error);
            ExitCode::from(1)
        }
    }
}

/// One-line red summary plus concrete next steps where the kind is
/// known. The silent sentinel means the command already reported.
fn render_error(error: &anyhow::Error) {
    use clawker_core::errors::ClawkerError;

    if matches!(
        error.downcast_ref::<ClawkerError>(),
        Some(ClawkerError::Silent)
    ) {
        return;
    }

    eprintln!("{} {error}", style("error:").red().bold());
    if let Some(clawker_error) = error.downcast_ref::<ClawkerError>() {
        let steps = clawker_error.next_steps();
        if !steps.is_empty() {
            eprintln!("Next steps:");
            for step in steps {
                eprintln!("  - {step}");
            }
        }
    }
}
