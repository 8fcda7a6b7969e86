//! Process termination and exit-status mapping.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

/// Base added to a signal number to form a shell-style exit code.
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// Shell-style exit code and signal name for a finished process.
pub fn exit_code(status: ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    match status.signal() {
        Some(sig) => (EXIT_CODE_SIGNAL_BASE + sig, Some(signal_name(sig))),
        None => (-1, None),
    }
}

pub fn signal_name(sig: i32) -> String {
    let name = match sig {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGSYS => "SIGSYS",
        other => return format!("SIG{other}"),
    };
    name.to_string()
}

/// Ask a child to exit. No-op if it has already been reaped.
fn send_sigterm(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: `pid` is a child of this process that has not been reaped yet,
    // so it cannot have been recycled for an unrelated process.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
        log::debug!(
            "SIGTERM to pid {pid} failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// SIGTERM every child, then SIGKILL whatever is still alive after `grace`.
/// Returns once every child has been reaped.
pub async fn terminate_all(children: &mut [Child], grace: Duration) {
    for child in children.iter() {
        send_sigterm(child);
    }

    let exited = tokio::time::timeout(grace, async {
        for child in children.iter_mut() {
            let _ = child.wait().await;
        }
    })
    .await;

    if exited.is_err() {
        log::warn!("processes still alive after {grace:?}, sending SIGKILL");
        kill_all(children).await;
    }
}

/// SIGKILL every child and reap it.
pub async fn kill_all(children: &mut [Child]) {
    for child in children.iter_mut() {
        if let Err(e) = child.start_kill() {
            log::debug!("kill failed: {e}");
        }
    }
    for child in children.iter_mut() {
        let _ = child.wait().await;
    }
}
