use std::process::ExitCode;

// Entry point. A single optional positional argument selects the listen
// port; bind failure exits non-zero.

#[tokio::main]
async fn main() -> ExitCode {
    let port = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                eprintln!("usage: sync-server [port]");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    match sync_server::run_with_config(port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE, // already logged by the server layer
    }
}
