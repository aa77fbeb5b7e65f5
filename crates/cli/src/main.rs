use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossterm::style::Stylize;
use fieldcam_core::counter::SequenceCounter;
use fieldcam_core::rpicam::RpicamDevice;
use fieldcam_core::scheduler::{Scheduler, SystemClock};
use fieldcam_core::storage::{StorageProbe, SystemStorage};
use fieldcam_core::transfer::{self, CancelToken, TransferSession};
use fieldcam_core::{config, CaptureConfig, Error, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod prompt;

const CONFIG_ENV: &str = "FIELDCAM_CONFIG";
const COUNTER_ENV: &str = "FIELDCAM_COUNTER";

fn main() {
    if let Err(err) = real_main() {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}

struct Options {
    config: Option<PathBuf>,
    counter: Option<PathBuf>,
    verbose: bool,
    positional: Vec<String>,
}

fn parse_args() -> Result<Options> {
    let mut opts = Options {
        config: None,
        counter: None,
        verbose: false,
        positional: Vec::new(),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                opts.config = Some(args.next().map(PathBuf::from).ok_or_else(|| {
                    Error::InvalidArgument("missing value for --config <path>".to_string())
                })?)
            }
            "--counter" => {
                opts.counter = Some(args.next().map(PathBuf::from).ok_or_else(|| {
                    Error::InvalidArgument("missing value for --counter <path>".to_string())
                })?)
            }
            "-v" | "--verbose" => opts.verbose = true,
            flag if flag.starts_with("--") && flag != "--help" => {
                return Err(Error::InvalidArgument(format!("unknown arg: {flag}")));
            }
            _ => opts.positional.push(arg),
        }
    }
    Ok(opts)
}

fn real_main() -> Result<()> {
    let opts = parse_args()?;
    let positional: Vec<&str> = opts.positional.iter().map(String::as_str).collect();

    match positional.as_slice() {
        [] | ["--help"] | ["-h"] | ["help"] => {
            print_help();
            Ok(())
        }
        ["run"] => {
            init_logging(opts.verbose);
            let config_path = config_path(opts.config)?;
            run_daemon(&config_path, &counter_path(opts.counter, &config_path))
        }
        ["offload"] => {
            init_logging(opts.verbose);
            run_offload(&config_path(opts.config)?)
        }
        ["devices"] => {
            init_logging(opts.verbose);
            list_devices();
            Ok(())
        }
        ["config", "check"] => {
            let path = config_path(opts.config)?;
            CaptureConfig::load(&path)?;
            println!("{}", "configuration is valid".green());
            Ok(())
        }
        ["config", "get"] => show_config(&config_path(opts.config)?, None),
        ["config", "get", key] => show_config(&config_path(opts.config)?, Some(*key)),
        ["config", "set", key, value] => update_config(&config_path(opts.config)?, key, value),
        _ => Err(Error::InvalidArgument(format!(
            "unknown command: {}",
            positional.join(" ")
        ))),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "fieldcam=debug,fieldcam_core=debug"
    } else {
        "fieldcam=info,fieldcam_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn config_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    flag.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| dirs::config_dir().map(|d| d.join("fieldcam").join("config.json")))
        .ok_or_else(|| {
            Error::InvalidArgument("no config location; pass --config <path>".to_string())
        })
}

fn counter_path(flag: Option<PathBuf>, config_path: &Path) -> PathBuf {
    flag.or_else(|| std::env::var_os(COUNTER_ENV).map(PathBuf::from))
        .unwrap_or_else(|| config_path.with_file_name("counter.txt"))
}

fn run_daemon(config_path: &Path, counter_path: &Path) -> Result<()> {
    let config = CaptureConfig::load(config_path)?;
    let counter = SequenceCounter::open(counter_path);
    info!(
        device = %config.device_id,
        location = %config.location,
        mode = %config.mode,
        staging = %config.output_dir.display(),
        counter = counter.value(),
        "fieldcam starting"
    );

    let mut scheduler = Scheduler::new(
        config,
        RpicamDevice::new(),
        counter,
        SystemStorage,
        SystemClock,
    );
    scheduler.run()
}

fn run_offload(config_path: &Path) -> Result<()> {
    let config = CaptureConfig::load(config_path)?;
    let storage = SystemStorage;
    let candidates = storage.removable_mounts();

    let selected = {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut out = io::stdout();
        prompt::choose_device(&candidates, &mut input, &mut out)?
    };
    let Some(mount) = selected else {
        println!("{}", "No valid device selected.".red());
        std::process::exit(1);
    };

    let token = CancelToken::new();
    let listener_token = token.clone();
    let mut session = TransferSession::new(mount, token);
    println!(
        "{} {}",
        "Transferring data to:".cyan(),
        session.mount().mount_path.display()
    );
    println!(
        "{}",
        format!(
            "Type '{}' and press enter to stop after the current file.",
            transfer::STOP_KEYWORD
        )
        .cyan()
    );

    // Never joined: it stays blocked on stdin until the process exits.
    thread::spawn(move || {
        let stdin = io::stdin();
        if transfer::listen_for_stop(stdin.lock(), &listener_token) {
            println!(
                "{}",
                "Stop command received. Finishing the current file, then stopping.".red()
            );
        }
    });

    let result = transfer::offload(&config, &mut session, &storage, |progress| {
        let name = progress
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!(
            "{} {name} ({} bytes)",
            "Transferred:".green(),
            progress.size_bytes
        );
    });
    session.cancel_token().cancel();

    match result {
        Ok(report) => {
            println!("{}", report.summary().cyan());
            io::stdout().flush()?;
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                format!(
                    "Transfer stopped by an error after {} file(s).",
                    session.files_transferred()
                )
                .red()
            );
            Err(err)
        }
    }
}

fn list_devices() {
    let storage = SystemStorage;
    let mounts = storage.removable_mounts();
    if mounts.is_empty() {
        println!("No USB storage devices found.");
        return;
    }
    for mount in mounts {
        let free = match storage.available_space(&mount.mount_path) {
            Ok(bytes) => format!("{:.1} GiB free", bytes as f64 / (1u64 << 30) as f64),
            Err(_) => "free space unknown".to_string(),
        };
        println!("{} ({free})", prompt::describe(&mount));
    }
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn show_config(path: &Path, key: Option<&str>) -> Result<()> {
    let doc = read_document(path)?;
    let Some(key) = key else {
        print_tree(&doc, 0);
        return Ok(());
    };

    match config::lookup(&doc, key) {
        Some(node @ serde_json::Value::Object(_)) => print_tree(node, 0),
        Some(serde_json::Value::String(s)) => println!("{s}"),
        Some(value) => println!("{value}"),
        None => {
            return Err(Error::InvalidArgument(format!("key not found: {key}")));
        }
    }
    Ok(())
}

fn print_tree(value: &serde_json::Value, depth: usize) {
    let Some(obj) = value.as_object() else {
        println!("{}{value}", "    ".repeat(depth));
        return;
    };
    let prefix = "    ".repeat(depth);
    for (key, child) in obj {
        match child {
            serde_json::Value::Object(_) => {
                println!("{prefix}{key}");
                print_tree(child, depth + 1);
            }
            serde_json::Value::String(s) => println!("{prefix}{key}: {s}"),
            other => println!("{prefix}{key}: {other}"),
        }
    }
}

fn update_config(path: &Path, key: &str, raw: &str) -> Result<()> {
    let mut doc = read_document(path)?;
    let value = match raw.parse::<i64>() {
        Ok(n) => serde_json::Value::from(n),
        Err(_) => serde_json::Value::from(raw),
    };
    config::set_value(&mut doc, key, value)?;

    let mut text = serde_json::to_string_pretty(&doc)?;
    text.push('\n');
    fs::write(path, text)?;
    println!("Updated {key} to {raw}.");
    Ok(())
}

fn print_help() {
    println!(
        r#"fieldcam

USAGE:
  fieldcam run                      capture artifacts forever in the configured mode
  fieldcam offload                  move staged artifacts onto a USB storage device
  fieldcam devices                  list USB storage candidates
  fieldcam config check             validate the configuration
  fieldcam config get [key]         print the configuration, or one dot-separated key
  fieldcam config set <key> <value> overwrite one dot-separated key

OPTIONS:
  --config <path>   configuration file (default: ${CONFIG_ENV} or <config dir>/fieldcam/config.json)
  --counter <path>  sequence counter file (default: ${COUNTER_ENV} or counter.txt next to the config)
  -v, --verbose     debug logging (RUST_LOG overrides)

NOTES:
  - During offload, type 'stop' and press enter to finish after the current file.
  - The two newest staged files are never offloaded; the camera may still be writing them.
"#
    );
}
