use std::future::Future;
use std::io::{self, BufRead};
use std::thread;

use tokio::sync::oneshot;
use tracing::warn;

/// True for the stdin lines that stop a recording.
pub fn is_quit_command(line: &str) -> bool {
    let cmd = line.trim();
    cmd.eq_ignore_ascii_case("q") || cmd.eq_ignore_ascii_case("quit")
}

/// Read commands from `input` until a quit command arrives. Returns false on EOF.
pub fn wait_for_quit_command<R: BufRead>(input: R) -> bool {
    for line_res in input.lines() {
        match line_res {
            Ok(line) => {
                if is_quit_command(&line) {
                    return true;
                } else if !line.trim().is_empty() {
                    println!("Unknown command: {} (q to quit)", line.trim());
                }
            }
            Err(e) => {
                warn!("stdin read error: {}", e);
                return false;
            }
        }
    }
    false
}

/// Resolve once the user asks to stop, either with `q` on stdin or with Ctrl+C.
///
/// Stdin is read on a dedicated thread so it never blocks the notification loop. If
/// stdin reaches EOF (e.g. when redirected from /dev/null) only Ctrl+C can stop the run.
pub fn quit_signal() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();

    thread::spawn(move || {
        if wait_for_quit_command(io::stdin().lock()) {
            let _ = tx.send(());
        }
    });

    async move {
        let stdin_quit = async {
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = stdin_quit => {}
            _ = ctrl_c => {}
        }
    }
}
