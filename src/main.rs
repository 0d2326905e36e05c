//! Binary entry point for the Trireme CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trireme::credentials::ssh_key_path;
use trireme::{
    AddressWait, ApiError, ComputeApi, ConfigStore, ConfigStoreError, ConfigWriter,
    ControllerError, CredentialError, MachineController, MachineId, MachineSettings,
    PersistedMachine, TritonClient, TritonConfig, signer_from_config,
};

use cli::{Cli, CreateCommand};

const LOG_ENV_VAR: &str = "TRIREME_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cannot authenticate: {0}")]
    Credentials(#[from] CredentialError),
    #[error("cannot build CloudAPI client: {0}")]
    Client(ApiError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("failed to update configuration: {0}")]
    Store(#[from] ConfigStoreError),
    #[error("invalid value for {field}: {message}")]
    InvalidOverride {
        field: &'static str,
        message: String,
    },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let mut config =
        TritonConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if let Cli::Create(args) = &cli {
        apply_create_overrides(&mut config, args)?;
    }

    if matches!(cli, Cli::Config) {
        write_config_record(&mut io::stdout(), &config)?;
        return Ok(0);
    }

    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let mut controller = build_controller(&config)?;
    let store = ConfigStore::new();
    run_command(
        &mut controller,
        &store,
        cli,
        &mut io::stdout(),
        &mut io::stderr(),
    )
    .await
}

fn build_controller(config: &TritonConfig) -> Result<MachineController<TritonClient>, CliError> {
    let host = config.host_identity();
    let signer = signer_from_config(config, &host)?;
    let client = TritonClient::new(config.url.as_str(), config.account.as_str(), Arc::new(signer))
        .map_err(CliError::Client)?;
    let settings = MachineSettings::new(config.image.as_str(), config.package.as_str());

    Ok(match config.recorded_machine_id() {
        Some(id) => MachineController::attach(client, host, settings, MachineId::from(id)),
        None => MachineController::new(client, host, settings),
    })
}

async fn run_command<A, W>(
    controller: &mut MachineController<A>,
    store: &W,
    cli: Cli,
    out: &mut dyn Write,
    err_out: &mut dyn Write,
) -> Result<i32, CliError>
where
    A: ComputeApi,
    W: ConfigWriter,
{
    match cli {
        Cli::Preflight => {
            controller.preflight_check().await?;
            writeln!(out, "image {} package {}", controller.image(), controller.package())?;
        }
        Cli::Create(args) => {
            controller.preflight_check().await?;
            let wait = if args.no_wait {
                AddressWait::Skip
            } else {
                AddressWait::Poll
            };
            let machine_id = match controller.create(wait).await {
                Ok(machine_id) => machine_id,
                Err(err @ ControllerError::Timeout { .. }) => {
                    // The machine exists remotely; record it so rm can reach it.
                    if let Some(machine_id) = controller.machine_id().cloned() {
                        persist_machine(controller, store, &machine_id)?;
                    }
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            };
            persist_machine(controller, store, &machine_id)?;
            writeln!(out, "{machine_id}")?;
        }
        Cli::Ip => {
            let Some(address) = controller.address().await? else {
                let machine_id = controller
                    .machine_id()
                    .cloned()
                    .ok_or(ControllerError::NoMachine)?;
                return Err(ControllerError::NoAddress { machine_id }.into());
            };
            writeln!(out, "{address}")?;
        }
        Cli::State => match controller.state().await {
            Ok(state) => writeln!(out, "{state}")?,
            Err(err @ ControllerError::UnknownState { .. }) => {
                writeln!(out, "Error")?;
                writeln!(err_out, "{err}")?;
                return Ok(1);
            }
            Err(err) => return Err(err.into()),
        },
        Cli::Url => writeln!(out, "{}", controller.docker_url().await?)?,
        Cli::Start => controller.start().await?,
        Cli::Stop => controller.stop().await?,
        Cli::Restart => controller.restart().await?,
        Cli::Kill => controller.kill().await?,
        Cli::Rm => {
            let removed = controller.remove().await?;
            if let Some(path) = store.clear_machine()? {
                info!("forgot machine {removed} in {path}");
            }
            writeln!(out, "{removed}")?;
        }
        Cli::Config => {}
    }
    Ok(0)
}

fn persist_machine<A, W>(
    controller: &MachineController<A>,
    store: &W,
    machine_id: &MachineId,
) -> Result<(), CliError>
where
    A: ComputeApi,
    W: ConfigWriter,
{
    let record = PersistedMachine {
        machine_id: machine_id.to_string(),
        machine_name: controller.host().machine_name().to_owned(),
        image: controller.image().to_owned(),
        package: controller.package().to_owned(),
    };
    match store.write_machine(&record) {
        Ok(path) => {
            info!("recorded machine {machine_id} in {path}");
            Ok(())
        }
        Err(err) => {
            warn!("machine {machine_id} was created but could not be recorded");
            Err(err.into())
        }
    }
}

fn parse_override(field: &'static str, value: &str) -> Result<String, CliError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CliError::InvalidOverride {
            field,
            message: String::from("value must not be empty"),
        });
    }
    Ok(trimmed.to_owned())
}

fn apply_create_overrides(
    config: &mut TritonConfig,
    args: &CreateCommand,
) -> Result<(), CliError> {
    if let Some(name) = args.name.as_deref() {
        config.machine_name = Some(parse_override("--name", name)?);
    }
    if let Some(image) = args.image.as_deref() {
        config.image = parse_override("--image", image)?;
    }
    if let Some(package) = args.package.as_deref() {
        config.package = parse_override("--package", package)?;
    }
    Ok(())
}

fn write_config_record(out: &mut dyn Write, config: &TritonConfig) -> Result<(), CliError> {
    let host = config.host_identity();
    let key = ssh_key_path(config, &host).map(|path| path.to_string());
    let fields = [
        ("account", Some(config.account.as_str())),
        ("key_id", Some(config.key_id.as_str())),
        ("key_path", key.as_deref()),
        ("url", Some(config.url.as_str())),
        ("image", Some(config.image.as_str())),
        ("package", Some(config.package.as_str())),
        ("machine_id", config.recorded_machine_id()),
    ];
    for (name, value) in fields {
        writeln!(out, "{name}: {}", value.unwrap_or_default())?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod main_tests;
