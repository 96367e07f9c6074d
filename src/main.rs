use registry_replicator::cli::{Args, Runner};
use registry_replicator::logging::init_tracing;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_args();
    init_tracing(args.verbose);

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("❌ ERROR: {}", e);
            return ExitCode::from(2);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping after in-flight copies are cancelled...");
            on_signal.cancel();
        }
    });

    match runner.run(&cancel).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) if cancel.is_cancelled() => ExitCode::from(130),
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ ERROR: {}", e);
            ExitCode::from(2)
        }
    }
}
