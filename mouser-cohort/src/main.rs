//! mouser-cohort - command-line driver for one experiment file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mouser_common::config::{experiment_file, resolve_root_folder, TomlConfig};
use mouser_common::{Error, NotificationQueue, NotificationSink};
use mouser_cohort::ingest::{
    available_ports, random_rfid, DeviceConnector, LineDevice, SimulatedScanner, StdinDevice,
};
use serde_json::json;
use std::collections::BTreeMap;
use mouser_cohort::store::{ExperimentSetup, StoreScope};
use mouser_cohort::{CohortService, StoreRegistry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for mouser-cohort
#[derive(Parser, Debug)]
#[command(name = "mouser-cohort")]
#[command(about = "Cohort assignment and RFID ingestion for Mouser experiments")]
#[command(version)]
struct Args {
    /// Config file (defaults to <config_dir>/mouser/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding experiment files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Experiment name or file name inside the root folder (all commands but `ports`)
    #[arg(short, long)]
    experiment: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the experiment and its groups
    Init {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        species: String,
        /// Expected number of subjects
        #[arg(long)]
        subjects: i64,
        /// Number of groups (named "Group 1".."Group N" unless --group-name is given)
        #[arg(long)]
        groups: i64,
        /// Explicit group names, repeatable
        #[arg(long = "group-name")]
        group_names: Vec<String>,
        /// Capacity of every group
        #[arg(long)]
        capacity: i64,
        #[arg(long)]
        rfid: bool,
        /// Measurement name, e.g. "Weight"
        #[arg(long)]
        measurement: Option<String>,
        /// Measurements come from a device
        #[arg(long)]
        automatic: bool,
        #[arg(long = "investigator")]
        investigators: Vec<String>,
    },
    /// Add a subject to the first group with room
    Add {
        #[arg(long)]
        rfid: Option<String>,
        #[arg(long, default_value = "")]
        remarks: String,
    },
    /// Move a subject to a group
    Assign { subject: i64, group: i64 },
    /// Delete a subject and its measurements
    Remove { subject: i64 },
    /// Deactivate a subject, keeping its id reserved
    Deactivate { subject: i64 },
    /// Record a measurement
    Measure { subject: i64, value: f64 },
    /// Replace a subject's RFID (omit to clear)
    ChangeRfid { subject: i64, rfid: Option<String> },
    /// Rebalance groups by most recent measurement
    Autosort,
    /// Rebalance groups at random
    Randomize {
        /// Seed for a reproducible shuffle
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print subject → group assignments as JSON
    Assignments,
    /// Listen for RFID scans until all subjects are tagged or Ctrl-C
    Listen {
        /// Scanner device path (overrides listener.device_path); stdin when unset
        #[arg(long)]
        device: Option<PathBuf>,
        /// Feed this many random tags from a simulated scanner instead
        #[arg(long)]
        simulate: Option<usize>,
    },
    /// List serial ports a scanner could be attached to
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the config file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Command::Ports = args.command {
        let ports = available_ports()?;
        if ports.is_empty() {
            warn!("No serial ports found");
        }
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    let experiment = args
        .experiment
        .as_deref()
        .context("--experiment is required for this command")?;
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    let path = experiment_file(&root_folder, experiment);
    info!("Experiment file: {}", path.display());

    let (queue, mut notifications) = NotificationQueue::new(config.listener.notification_capacity);
    let sink: Arc<dyn NotificationSink> = Arc::new(queue);

    let simulated = match &args.command {
        Command::Listen {
            simulate: Some(_), ..
        } => Some(SimulatedScanner::new()),
        _ => None,
    };
    let connector: Arc<dyn DeviceConnector> = match (&simulated, &args.command) {
        (Some(scanner), _) => Arc::new(scanner.clone()),
        (None, Command::Listen { device: Some(device), .. }) => {
            Arc::new(LineDevice::new(device).with_serial(config.listener.serial.clone()))
        }
        (None, _) => match &config.listener.device_path {
            Some(device) => {
                Arc::new(LineDevice::new(device).with_serial(config.listener.serial.clone()))
            }
            None => Arc::new(StdinDevice),
        },
    };

    let registry = StoreRegistry::new(config.store.clone());
    let service = CohortService::open(
        &registry,
        StoreScope::File(path.clone()),
        connector,
        sink,
        &config.listener,
    )
    .await
    .with_context(|| format!("Failed to open {}", path.display()))?;

    let printer = tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not serialize notification: {}", e),
            }
        }
    });

    let result = run_command(&service, args.command, simulated).await;
    service.close().await;

    // The queue closes once the service and its listener tasks are gone
    if let Err(e) = printer.await {
        error!("Notification printer failed: {}", e);
    }

    result
}

async fn run_command(
    service: &CohortService,
    command: Command,
    simulated: Option<SimulatedScanner>,
) -> Result<()> {
    match command {
        Command::Init {
            name,
            species,
            subjects,
            groups,
            group_names,
            capacity,
            rfid,
            measurement,
            automatic,
            investigators,
        } => {
            let names: Vec<String> = if group_names.is_empty() {
                (1..=groups).map(|i| format!("Group {}", i)).collect()
            } else {
                group_names
            };
            let setup = ExperimentSetup {
                name: name.unwrap_or_else(|| "Experiment".to_string()),
                species,
                uses_rfid: rfid,
                num_animals: subjects,
                num_groups: names.len() as i64,
                cage_max: capacity,
                measurement,
                automatic_measurement: automatic,
                investigators,
            };
            service.setup_experiment(&setup).await?;
            let created = service.setup_groups(&names, capacity).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Command::Add { rfid, remarks } => {
            let id = service.add_subject(rfid.as_deref(), &remarks).await?;
            println!("{}", id);
        }
        Command::Assign { subject, group } => service.assign(subject, group).await?,
        Command::Remove { subject } => service.remove_subject(subject).await?,
        Command::Deactivate { subject } => service.deactivate_subject(subject).await?,
        Command::Measure { subject, value } => {
            let id = service.add_measurement(subject, Utc::now(), value).await?;
            println!("{}", id);
        }
        Command::ChangeRfid { subject, rfid } => {
            service.change_identifier(subject, rfid.as_deref()).await?
        }
        Command::Autosort => match service.auto_sort().await {
            Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
            Err(Error::IncompleteSort { skipped }) => {
                // The sorted part is already committed
                let assignments = service.get_assignments().await?;
                let summary = partial_sort_summary(&assignments, &skipped);
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Err(Error::IncompleteSort { skipped }.into());
            }
            Err(e) => return Err(e.into()),
        },
        Command::Randomize { seed } => {
            let placements = match seed {
                Some(seed) => service.randomize_with_rng(&mut StdRng::seed_from_u64(seed)).await?,
                None => service.randomize().await?,
            };
            println!("{}", serde_json::to_string_pretty(&placements)?);
        }
        Command::Assignments => {
            let assignments = service.get_assignments().await?;
            println!("{}", serde_json::to_string_pretty(&assignments)?);
        }
        Command::Listen { simulate, .. } => {
            let handle = service.start_listening().await?;

            if let (Some(scanner), Some(count)) = (simulated, simulate) {
                tokio::spawn(async move {
                    let mut rng = StdRng::from_entropy();
                    for _ in 0..count {
                        scanner.scan(format!("{}\r\n", random_rfid(&mut rng)));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                });
            }

            tokio::select! {
                _ = handle.join() => info!("Listener finished"),
                _ = shutdown_signal() => {
                    info!("Stopping listener");
                    handle.stop().await;
                }
            }
        }
        Command::Ports => {}
    }
    Ok(())
}

fn partial_sort_summary(assignments: &BTreeMap<i64, i64>, skipped: &[i64]) -> serde_json::Value {
    json!({
        "assignments": assignments,
        "skipped": skipped,
    })
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    warn!("Received Ctrl+C");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sort_summary_lists_both() {
        let assignments: BTreeMap<i64, i64> = [(1, 2), (2, 1), (3, 2)].into_iter().collect();
        let summary = partial_sort_summary(&assignments, &[3]);

        assert_eq!(summary["assignments"]["1"], 2);
        assert_eq!(summary["assignments"]["2"], 1);
        assert_eq!(summary["skipped"], json!([3]));
    }

    #[test]
    fn test_ports_needs_no_experiment() {
        let args = Args::try_parse_from(["mouser-cohort", "ports"]).unwrap();
        assert!(args.experiment.is_none());
        assert!(matches!(args.command, Command::Ports));
    }
}
