//! Server binary: argument handling, logging setup, signal traps, and
//! the exit-status taxonomy.
//!
//! Exit statuses are kept distinct so operators can tell failure modes
//! apart: 0 success, 1 usage error, 2 runtime error, 3 terminated by
//! signal.

use clap::Parser;
use snakesrv::config::{CliArgs, Config};
use snakesrv::listener::Listener;
use snakesrv::server::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Wrong syntax or bad argument values.
const EXIT_USER: u8 = 1;
/// Unrecoverable runtime error.
const EXIT_ERR: u8 = 2;
/// Terminated due to signal reception.
const EXIT_SIG: i32 = 3;

fn main() -> ExitCode {
    let cli = match CliArgs::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // -h and --version print and exit successfully; anything else
            // is a usage error.
            let code = if e.use_stderr() { EXIT_USER } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let config = match Config::resolve(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("snakesrv: {e}");
            return ExitCode::from(EXIT_USER);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    install_signal_handlers();

    info!(
        port = config.port,
        idle_timeout = ?config.idle_timeout,
        "Starting snakesrv"
    );

    let mut listener = Listener::new(config.port);
    if let Err(e) = listener.start() {
        error!(error = %e, "Cannot start listener");
        return ExitCode::from(EXIT_ERR);
    }

    let mut server = Server::new(listener, config.idle_timeout);
    let result = server.run();
    server.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::from(EXIT_ERR)
        }
    }
}

/// Trap termination signals.
///
/// In-flight sessions are not drained: the handler reports the signal and
/// terminates the process, which also closes the listening socket.
fn install_signal_handlers() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = termsig as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    }
}

/// Signal handler: only async-signal-safe calls are allowed here.
extern "C" fn termsig(sig: libc::c_int) {
    let msg: &[u8] = match sig {
        libc::SIGINT => b"Terminated by signal 2 (SIGINT).\n",
        libc::SIGTERM => b"Terminated by signal 15 (SIGTERM).\n",
        _ => b"Terminated by signal.\n",
    };
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(EXIT_SIG);
    }
}
