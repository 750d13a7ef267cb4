mod config;

use std::path::PathBuf;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::prelude::*;
use udfread::stream::DeviceStream;
use udfread::udf::{DirEntryInfo, Udf};

const COMMANDS: [&str; 3] = ["info", "ls", "cp"];

fn usage(me: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("{} [device] info", me);
    eprintln!("  Prints the volume summary as JSON");
    eprintln!("{} [device] ls [path]", me);
    eprintln!("  Lists the directory <path> (default: the root directory)");
    eprintln!("{} [device] cp <path> [destination]", me);
    eprintln!("  Extracts the file <path> into the <destination> directory");
    eprintln!("The device defaults to the configured one (UDF__DEVICE or udf.toml)");
    std::process::exit(1);
}

fn print_entry(entry: &DirEntryInfo) {
    let kind = if entry.is_directory { 'd' } else { '-' };
    let size = match (entry.is_directory, entry.size) {
        (true, _) => "<DIR>".to_string(),
        (false, Some(size)) => size.to_string(),
        (false, None) => "unknown".to_string(),
    };
    let mtime = entry
        .modification_time
        .to_string_maybe()
        .unwrap_or_else(|| "-".to_string());
    println!("{kind} {size:>12} {mtime:<40} {}", entry.name);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let config = config::Config::new()?;

    let args: Vec<String> = std::env::args().collect();
    let me = args.first().map(String::as_str).unwrap_or("udfread");
    let (device, args) = match args.get(1) {
        Some(first) if !COMMANDS.contains(&first.as_str()) => (first.clone(), &args[2..]),
        Some(_) => (config.device.clone(), &args[1..]),
        None => usage(me),
    };
    let (command, params) = match args.split_first() {
        Some((command, params)) => (command.as_str(), params),
        None => usage(me),
    };

    let mut udf = Udf::new(DeviceStream::new(&device)).map_err(|e| {
        eprintln!("Failed to load the UDF volume on {}: {}", device, e);
        e
    })?;

    match (command, params) {
        ("info", []) => {
            let summary = udf.volume_summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        ("ls", []) => {
            for entry in udf.ls()? {
                print_entry(&entry);
            }
        }
        ("ls", [path]) => {
            udf.cd(path).map_err(|e| {
                eprintln!("{}: {}", path, e);
                e
            })?;
            for entry in udf.ls()? {
                print_entry(&entry);
            }
        }
        ("cp", [path]) | ("cp", [path, _]) => {
            let destination = match params.get(1) {
                Some(dest) => PathBuf::from(dest),
                None => PathBuf::from(&config.output_path),
            };
            let written = udf.cp(path, &destination).map_err(|e| {
                eprintln!("{}: {}", path, e);
                e
            })?;
            println!("{} bytes copied to {}", written, destination.display());
        }
        _ => usage(me),
    }
    udf.close();
    Ok(())
}
