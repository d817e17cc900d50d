use std::{env, path::Path, path::PathBuf, process::Stdio};

use anyhow::Result;
use sysinfo::{get_current_pid, Signal, System};

/// Terminates every other process running this executable. SIGTERM first so
/// a running engine gets to flush its open session; a hard kill only when
/// the platform offers nothing gentler.
pub fn kill_running_daemons(name: &Path) {
    let system = System::new_all();
    let current_id = get_current_pid().unwrap();
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }
        if matches!(process.parent(), Some(p) if p == current_id) {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
        }
    }
}

/// Shuts down any previous daemon and starts a new one as a detached
/// process running `serve`.
pub fn restart_daemon(dir: Option<PathBuf>, project: Option<String>) -> Result<()> {
    // The spawn reuses the current executable. Not perfect, but it does the
    // job in most cases.
    let process_name = env::current_exe().expect("Can't operate without an executable");
    kill_running_daemons(&process_name);

    let mut command = std::process::Command::new(process_name);
    command.arg("serve");
    if let Some(dir) = dir {
        command.arg("--dir");
        command.arg(dir);
    }
    if let Some(project) = project {
        command.arg("--project");
        command.arg(project);
    }

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
    }

    println!("Spawning daemon");
    #[allow(clippy::zombie_processes)]
    let _ = command.spawn()?;
    println!("Success");
    Ok(())
}
