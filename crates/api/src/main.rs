#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::PathBuf;
use tl_api::{ApiServer, ApiServerConfig, run_stdio};
use tl_storage::SqliteStore;

const DEFAULT_STORAGE_DIR: &str = ".traceledger";

fn usage() -> &'static str {
    "tl_api — trace ledger JSON-RPC server (stdio)\n\n\
USAGE:\n\
  tl_api [--storage-dir DIR] [--workspace WS]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
NOTES:\n\
  - Default store: ./.traceledger/\n\
  - --workspace sets the workspace used when requests omit one\n"
}

fn now_rfc3339() -> String {
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn write_last_crash(storage_dir: &std::path::Path, kind: &str, detail: &str) {
    // Best-effort crash report for debugging transport issues; never logs
    // request bodies and never writes to stdout/stderr.
    let _ = std::fs::create_dir_all(storage_dir);
    let path = storage_dir.join("traceledger_api_last_crash.txt");

    let mut out = String::new();
    let _ = writeln!(out, "ts={}", now_rfc3339());
    let _ = writeln!(out, "pid={}", std::process::id());
    let _ = writeln!(out, "kind={kind}");
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let _ = writeln!(out, "cwd={}", cwd.to_string_lossy());
    let _ = writeln!(out, "detail={detail}");

    let _ = std::fs::write(path, out);
}

fn install_crash_reporter(storage_dir: PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let mut detail = info.to_string();
        let backtrace = std::backtrace::Backtrace::force_capture();
        let _ = write!(&mut detail, "\nbacktrace:\n{backtrace}");
        write_last_crash(&storage_dir, "panic", &detail);
        default_hook(info);
    }));
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == name {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix(&format!("{name}=")) {
            return Some(value.to_string());
        }
    }
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().collect::<Vec<_>>();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return Ok(());
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("tl_api {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let storage_dir = flag_value(&args, "--storage-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    let default_workspace = flag_value(&args, "--workspace");

    install_crash_reporter(storage_dir.clone());
    let storage_dir_for_errors = storage_dir.clone();

    let store = SqliteStore::open(&storage_dir)?;
    let mut server = ApiServer::new(store, ApiServerConfig { default_workspace });

    let result = run_stdio(&mut server);
    if let Err(err) = &result {
        write_last_crash(&storage_dir_for_errors, "error", &format!("{err:?}"));
    }
    result
}
