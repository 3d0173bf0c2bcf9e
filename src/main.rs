mod cache;
mod cgroup_adapter;
mod cpuinfo;
mod error;
mod log;
#[cfg(test)]
mod mock_cgroup;
mod projection;
mod quota;
mod resolver;
mod usage;
mod view;

use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

const USAGE_ERROR: u8 = 2;

enum Commands {
    /// Render a cgroup's /proc/stat view against the live host filesystem.
    Stat { cgroup: String },
    /// Render a cgroup's /proc/cpuinfo view against the live host filesystem.
    Cpuinfo { cgroup: String },
    Version,
}

fn main() -> ExitCode {
    log::init();

    let view = view::CpuView::new().freeze();
    let mut stdout = io::stdout();

    match command_line() {
        Commands::Stat { cgroup } => {
            let host_stat = match fs::read_to_string("/proc/stat") {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("could not read /proc/stat: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut buf = vec![0u8; 64 * 1024];
            match view.render_stat(&cgroup, &host_stat, &mut buf) {
                Ok(n) => {
                    let _ = stdout.write_all(&buf[..n]);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Cpuinfo { cgroup } => {
            let host_cpuinfo = match fs::read_to_string("/proc/cpuinfo") {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("could not read /proc/cpuinfo: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mut buf = vec![0u8; 64 * 1024];
            match view.render_cpuinfo(&cgroup, &host_cpuinfo, &mut buf) {
                Ok(n) => {
                    let _ = stdout.write_all(&buf[..n]);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Version => {
            show_version(&mut stdout);
            ExitCode::SUCCESS
        }
    }
}

// For the sake of simplicity: all error reporting is via a generic "usage"
// message, without specificity as to what was wrong.
fn command_line() -> Commands {
    let args = std::env::args().collect::<Vec<String>>();
    let mut next = 1;
    if next >= args.len() {
        usage(true);
    }
    let command = args[next].as_str();
    next += 1;
    match command {
        "stat" => Commands::Stat {
            cgroup: require_cgroup_arg(&args, next),
        },
        "cpuinfo" => Commands::Cpuinfo {
            cgroup: require_cgroup_arg(&args, next),
        },
        "version" => Commands::Version,
        "help" => usage(false),
        _ => usage(true),
    }
}

fn require_cgroup_arg(args: &[String], next: usize) -> String {
    match args.get(next) {
        Some(cgroup) => cgroup.clone(),
        None => usage(true),
    }
}

fn usage(is_error: bool) -> ! {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let out: &mut dyn io::Write = if is_error { &mut stderr } else { &mut stdout };

    show_version(out);
    let _ = out.write(
        b"
Usage: cpuview <COMMAND> <CGROUP>

Commands:
  stat <cgroup>     Render <cgroup>'s /proc/stat view against the live host
  cpuinfo <cgroup>  Render <cgroup>'s /proc/cpuinfo view against the live host
  version           Print the version
  help              Print this message

<cgroup> is a cgroup path relative to a controller's mount root, e.g. /user.slice/user-1000.slice.
",
    );
    let _ = out.flush();
    std::process::exit(if is_error { USAGE_ERROR as i32 } else { 0 });
}

fn show_version(out: &mut dyn io::Write) {
    let _ = out.write(b"cpuview version ");
    let _ = out.write(env!("CARGO_PKG_VERSION").as_bytes());
    let _ = out.write(b"\n");
}
