use std::process::ExitCode;

/// Grace period after a shutdown signal before force-exiting (seconds).
const SHUTDOWN_GRACE_SECS: u64 = 10;

#[tokio::main]
async fn main() -> ExitCode {
    // The server winds down on the same signal; this only guards against a
    // shutdown that hangs on stuck I/O.
    tokio::spawn(async {
        botkeeper::cli::shutdown_signal().await;
        tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
        eprintln!("Shutdown grace period expired, forcing exit.");
        std::process::exit(1);
    });

    match botkeeper::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(botkeeper::errors::get_exit_code(&e))
        }
    }
}
