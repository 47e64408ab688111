//! Command line interface for fieldstep

use clap::Parser;
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{ConfigError, FieldstepConfig};
use crate::physics::extensions::AuctioneerRegistry;
use crate::physics::propagator::PropagationResult;
use crate::physics::stepper::PropagationError;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid auctioneer: {0}")]
    InvalidAuctioneer(String),
    #[error("Propagation failed: {0}")]
    Propagation(#[from] PropagationError),
}

/// fieldstep - charged particle propagation with arbitrated step evaluation
#[derive(Parser, Debug, Default)]
#[command(version, long_version = long_version(), about, long_about = None)]
pub struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Auctioneer deciding between extensions (e.g., highest_bid, first_valid, void)
    #[arg(short = 'a', long, value_name = "NAME")]
    pub auctioneer: Option<String>,

    /// Initial momentum in GeV (overrides config file)
    #[arg(short = 'p', long, value_name = "GEV")]
    pub momentum: Option<f64>,

    /// Charge in units of e (overrides config file)
    #[arg(short = 'q', long, value_name = "E", allow_hyphen_values = true)]
    pub charge: Option<f64>,

    /// Longitudinal field in tesla (overrides config file)
    #[arg(short = 'b', long, value_name = "TESLA", allow_hyphen_values = true)]
    pub field_z: Option<f64>,

    /// Path length to propagate in mm (overrides config file)
    #[arg(short = 'l', long, value_name = "MM")]
    pub path_limit: Option<f64>,

    /// Transport the covariance along the trajectory
    #[arg(long)]
    pub covariance: bool,

    /// Print every step of the trajectory
    #[arg(short = 't', long)]
    pub trajectory: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// List available auctioneers and exit
    #[arg(long)]
    pub list_auctioneers: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

fn long_version() -> &'static str {
    concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_DATE"), ")")
}

/// Handles the --list-auctioneers flag by printing available auctioneers
pub fn handle_list_auctioneers() {
    print!("{}", list_auctioneers(&AuctioneerRegistry::default()));
}

fn list_auctioneers(registry: &AuctioneerRegistry) -> String {
    let mut out = String::from("Available auctioneers:\n");
    for name in registry.list_available() {
        let _ = writeln!(out, "  - {name}");
    }

    let aliases = registry.list_aliases();
    if !aliases.is_empty() {
        out.push_str("\nAliases:\n");
        for (alias, target) in aliases {
            let _ = writeln!(out, "  - {alias} -> {target}");
        }
    }
    out
}

/// Loads configuration from file or defaults, then applies command-line overrides
pub fn load_and_apply_config(args: &Args) -> Result<FieldstepConfig, CliError> {
    let config = if let Some(config_path) = &args.config {
        println!("Loading configuration from: {}", config_path.display());
        FieldstepConfig::load(Some(config_path))?
    } else {
        FieldstepConfig::load_from_user_config()
    };

    apply_overrides(config, args)
}

/// Apply the command-line overrides in `args` to `config` and check the
/// result.
pub fn apply_overrides(
    mut config: FieldstepConfig,
    args: &Args,
) -> Result<FieldstepConfig, CliError> {
    if let Some(auctioneer) = &args.auctioneer {
        let registry = AuctioneerRegistry::default();
        registry
            .create(auctioneer)
            .map_err(CliError::InvalidAuctioneer)?;

        println!("Using auctioneer: {auctioneer}");
        config.propagation.auctioneer = auctioneer.clone();
    }

    if let Some(momentum) = args.momentum {
        println!("Overriding momentum to: {momentum} GeV");
        config.particle.momentum = momentum;
    }

    if let Some(charge) = args.charge {
        println!("Overriding charge to: {charge} e");
        config.particle.charge = charge;
    }

    if let Some(field_z) = args.field_z {
        println!("Overriding longitudinal field to: {field_z} T");
        config.field.b[2] = field_z;
    }

    if let Some(path_limit) = args.path_limit {
        println!("Overriding path limit to: {path_limit} mm");
        config.propagation.path_limit = path_limit;
    }

    if args.covariance {
        config.propagation.covariance_transport = true;
    }

    config.check()?;
    Ok(config)
}

/// Human-readable summary of a finished propagation
pub fn format_result(result: &PropagationResult, with_trajectory: bool) -> String {
    let mut out = String::new();

    if with_trajectory {
        let _ = writeln!(
            out,
            "{:>5} {:>12} {:>12} {:>12} {:>12} {:>10} {:>10}  bids / valid",
            "step", "path", "x", "y", "z", "p", "h"
        );
        for (i, record) in result.trajectory.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>5} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>10.6} {:>10.4}  {:?} / {:?}",
                i + 1,
                record.path_length,
                record.position.x,
                record.position.y,
                record.position.z,
                record.momentum,
                record.outcome.step_size,
                record.bids,
                record.validity,
            );
        }
        out.push('\n');
    }

    let state = &result.state;
    let _ = writeln!(out, "Steps:       {}", result.steps);
    let _ = writeln!(out, "Path length: {:.6} mm", state.path_length);
    let _ = writeln!(
        out,
        "Position:    ({:.6}, {:.6}, {:.6}) mm",
        state.position.x, state.position.y, state.position.z
    );
    let _ = writeln!(
        out,
        "Direction:   ({:.6}, {:.6}, {:.6})",
        state.direction.x, state.direction.y, state.direction.z
    );
    let _ = writeln!(out, "Momentum:    {:.6} GeV", state.momentum);
    let _ = writeln!(out, "Time:        {:.6} mm/c", state.time);

    if let Some(covariance) = &state.covariance {
        let diagonal: Vec<String> = covariance
            .diagonal()
            .iter()
            .map(|value| format!("{value:.3e}"))
            .collect();
        let _ = writeln!(out, "Covariance:  diag[{}]", diagonal.join(", "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::propagator::Propagator;

    #[test]
    fn test_parse_overrides() {
        let args = Args::try_parse_from([
            "fieldstep",
            "--auctioneer",
            "first_valid",
            "--charge",
            "-2",
            "--field-z",
            "-1.5",
            "--covariance",
        ])
        .unwrap();

        assert_eq!(args.auctioneer.as_deref(), Some("first_valid"));
        assert_eq!(args.charge, Some(-2.0));
        assert_eq!(args.field_z, Some(-1.5));
        assert!(args.covariance);
        assert!(!args.list_auctioneers);
    }

    #[test]
    fn test_invalid_auctioneer_is_rejected() {
        let args = Args {
            auctioneer: Some("lottery".to_string()),
            ..Args::default()
        };
        let err = apply_overrides(FieldstepConfig::default(), &args).unwrap_err();
        assert!(matches!(err, CliError::InvalidAuctioneer(_)));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let args = Args {
            momentum: Some(-1.0),
            ..Args::default()
        };
        let err = apply_overrides(FieldstepConfig::default(), &args).unwrap_err();
        assert!(err.to_string().contains("particle.momentum"), "{err}");
    }

    #[test]
    fn test_overrides_replace_loaded_values() {
        let args = Args {
            auctioneer: Some("first".to_string()),
            momentum: Some(3.0),
            field_z: Some(-0.5),
            covariance: true,
            ..Args::default()
        };
        let config = apply_overrides(FieldstepConfig::default(), &args).unwrap();

        assert_eq!(config.propagation.auctioneer, "first");
        assert_eq!(config.particle.momentum, 3.0);
        assert_eq!(config.field.b, [0.0, 0.0, -0.5]);
        assert!(config.propagation.covariance_transport);
        // Untouched values keep the loaded configuration
        assert_eq!(config.particle.charge, FieldstepConfig::default().particle.charge);
    }

    #[test]
    fn test_list_mentions_aliases() {
        let listing = list_auctioneers(&AuctioneerRegistry::default());
        assert!(listing.contains("  - highest_bid\n"));
        assert!(listing.contains("  - void -> permissive\n"));
    }

    #[test]
    fn test_format_result() {
        let mut config = FieldstepConfig::default();
        config.propagation.path_limit = 50.0;
        config.propagation.covariance_transport = true;
        let mut propagator = Propagator::from_config(&config).unwrap();
        let result = propagator.propagate(config.initial_state()).unwrap();

        let text = format_result(&result, true);
        assert!(text.contains("Path length: 50.000000 mm"));
        assert!(text.contains("[1, 0] / [true, false]"));
        assert!(text.contains("Covariance:  diag["));
    }
}
