use std::process::ExitCode;

use muzzle::ServeOutcome;

pub type CliResult<T> = anyhow::Result<T>;

/// Fail unless the serve loop stopped deliberately
pub fn check_outcome(outcome: ServeOutcome) -> CliResult<()> {
    match outcome {
        ServeOutcome::Killed | ServeOutcome::EndOfInput => {
            tracing::debug!(?outcome, "engine stopped");
            Ok(())
        }
        ServeOutcome::Crashed => anyhow::bail!("engine crashed while dispatching a request"),
    }
}

/// Convert a CliResult to an ExitCode, printing errors to stderr
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
