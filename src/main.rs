use std::io::Write;
use std::path::Path;

use clap::Parser;

use android_x86_hook::cli::{Cli, Command};
use android_x86_hook::config::{self, HookConfig};
use android_x86_hook::error::HookError;
use android_x86_hook::{hook, logging, server};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = resolve_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::run_serve(&config).await?,
        Command::Info { socket } => {
            let info = match socket {
                Some(path) => server::connect(&path)
                    .info()
                    .await
                    .map_err(|e| HookError::Rpc {
                        message: e.to_string(),
                    })?,
                None => hook::info(&config.name),
            };
            println!("{}", facet_json::to_string(&info).expect("JSON serialization"));
        }
        Command::Mutate { vmi, domain } => {
            let vmi = read_file(&vmi)?;
            let domain = read_file(&domain)?;
            let output = hook::on_define_domain(&config.rule_table(), &vmi, &domain)?;

            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&output)
                .and_then(|()| stdout.write_all(b"\n"))
                .map_err(|source| HookError::Io {
                    context: "writing domain XML to stdout".into(),
                    source,
                })?;
        }
    }

    Ok(())
}

/// Load the config file (if any), apply CLI overrides, then validate.
fn resolve_config(cli: &Cli) -> Result<HookConfig, HookError> {
    let mut raw = config::load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.socket_dir {
        raw.socket_dir = dir.display().to_string();
    }
    if let Some(domain) = &cli.annotation_domain {
        raw.annotation_domain = domain.clone();
    }
    config::validate_config(&raw)
}

fn read_file(path: &Path) -> Result<Vec<u8>, HookError> {
    std::fs::read(path).map_err(|source| HookError::Io {
        context: format!("reading {}", path.display()),
        source,
    })
}
