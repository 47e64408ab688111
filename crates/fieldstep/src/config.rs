use crate::physics::extensions::{
    AuctioneerRegistry, CompositionError, DenseEnvironmentExtension, ExtensionList,
    FieldExtension,
};
use crate::physics::field::ConstantField;
use crate::physics::material::{Material, MaterialBox, MaterialMap, NoMaterial};
use crate::physics::math::{Covariance, Scalar, Vector};
use crate::physics::state::StepperState;
use fieldstep_macros::ConfigDefaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Prefix of environment variables overriding configuration values,
/// e.g. `FIELDSTEP__STEPPER__TOLERANCE=1e-5`
pub const ENV_PREFIX: &str = "FIELDSTEP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FieldstepConfig {
    #[default(StepperConfig::default())]
    #[validate]
    pub stepper: StepperConfig,

    #[default(PropagationConfig::default())]
    #[validate]
    pub propagation: PropagationConfig,

    #[default(ExtensionsConfig::default())]
    #[validate]
    pub extensions: ExtensionsConfig,

    #[default(FieldConfig::default())]
    pub field: FieldConfig,

    #[default(None)]
    pub material: Option<MaterialConfig>,

    #[default(ParticleConfig::default())]
    #[validate]
    pub particle: ParticleConfig,
}

/// Error control of the adaptive RKN4 step
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StepperConfig {
    /// Accepted local error estimate per step
    #[default(1e-4)]
    #[above(0.0)]
    pub tolerance: Scalar,

    /// Trial size of the first step, mm
    #[default(100.0)]
    #[above(0.0)]
    pub initial_step_size: Scalar,

    /// Upper bound on any step, mm
    #[default(1000.0)]
    #[above(0.0)]
    pub max_step_size: Scalar,

    /// Steps shrinking below this size abort propagation, mm
    #[default(1e-4)]
    #[min(0.0)]
    pub step_size_cutoff: Scalar,

    /// Step-size adjustments allowed within one step
    #[default(10_000)]
    #[min(1)]
    pub max_step_trials: usize,
}

#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PropagationConfig {
    /// Path length after which propagation stops, mm
    #[default(1000.0)]
    #[above(0.0)]
    pub path_limit: Scalar,

    #[default(1000)]
    #[min(1)]
    pub max_steps: usize,

    /// Name or alias of the auctioneer arbitrating the extensions
    #[default("highest_bid")]
    pub auctioneer: String,

    /// Assemble transport Jacobians and transport the covariance
    #[default(false)]
    pub covariance_transport: bool,

    /// Keep a record of every step
    #[default(true)]
    pub record_trajectory: bool,
}

#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Register the dense-environment extension next to the field extension
    #[default(true)]
    pub dense_environment: bool,

    /// Momentum below which the dense-environment extension declines, GeV
    #[default(0.05)]
    #[min(0.0)]
    pub momentum_cutoff: Scalar,
}

/// Homogeneous magnetic field
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FieldConfig {
    /// Field vector, T
    #[default([0.0, 0.0, 2.0])]
    pub b: [Scalar; 3],
}

/// Axis-aligned block of material
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MaterialConfig {
    #[default([100.0, -1e4, -1e4])]
    pub min: [Scalar; 3],

    #[default([200.0, 1e4, 1e4])]
    pub max: [Scalar; 3],

    /// Mean energy loss, GeV/mm
    #[default(1.5e-3)]
    #[min(0.0)]
    pub stopping_power: Scalar,
}

/// Initial state of the propagated particle
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ParticleConfig {
    /// mm
    #[default([0.0, 0.0, 0.0])]
    pub position: [Scalar; 3],

    #[default([1.0, 0.0, 0.0])]
    pub direction: [Scalar; 3],

    /// GeV
    #[default(1.0)]
    #[above(0.0)]
    pub momentum: Scalar,

    /// e
    #[default(-1.0)]
    pub charge: Scalar,

    /// GeV, muon by default
    #[default(0.105_658)]
    #[min(0.0)]
    pub mass: Scalar,

    /// Diagonal of the initial covariance (x, y, z, Tx, Ty, Tz, q/p)
    #[default([1e-2, 1e-2, 1e-2, 1e-6, 1e-6, 1e-6, 1e-4])]
    pub covariance_diagonal: [Scalar; 7],
}

impl FieldstepConfig {
    /// Load configuration from a TOML file layered with `FIELDSTEP__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(content, ::config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if it is
    /// missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("Config file {} not found. Using defaults.", path.display());
            return Self::default();
        }

        match Self::load(Some(path)) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from the per-user configuration directory
    pub fn load_from_user_config() -> Self {
        match Self::user_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => {
                warn!("Could not determine the user configuration directory. Using defaults.");
                Self::default()
            }
        }
    }

    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "fieldstep")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Field bounds plus the checks spanning several sections
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate().map_err(ConfigError::Invalid)?;

        if let Some(material) = &self.material {
            material
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("material.{e}")))?;
        }

        if self.stepper.step_size_cutoff >= self.stepper.max_step_size {
            return Err(ConfigError::Invalid(
                "stepper.step_size_cutoff must be below stepper.max_step_size".to_string(),
            ));
        }

        if Vector::from(self.particle.direction).norm() == 0.0 {
            return Err(ConfigError::Invalid(
                "particle.direction must not be the zero vector".to_string(),
            ));
        }

        AuctioneerRegistry::default()
            .create(&self.propagation.auctioneer)
            .map_err(ConfigError::Invalid)?;

        Ok(())
    }

    /// Extension list described by the `extensions` and `propagation`
    /// sections
    pub fn extension_list(&self) -> Result<ExtensionList, ConfigError> {
        let auctioneer = AuctioneerRegistry::default()
            .create(&self.propagation.auctioneer)
            .map_err(ConfigError::Invalid)?;

        let mut builder = ExtensionList::builder()
            .with(FieldExtension::new())
            .boxed_auctioneer(auctioneer);
        if self.extensions.dense_environment {
            builder = builder.with(DenseEnvironmentExtension::new(
                self.extensions.momentum_cutoff,
            ));
        }

        Ok(builder.build()?)
    }

    pub fn magnetic_field(&self) -> ConstantField {
        ConstantField(Vector::from(self.field.b))
    }

    pub fn material_map(&self) -> Box<dyn MaterialMap> {
        match &self.material {
            Some(material) => Box::new(MaterialBox::new(
                Vector::from(material.min),
                Vector::from(material.max),
                Material::new(material.stopping_power),
            )),
            None => Box::new(NoMaterial),
        }
    }

    pub fn initial_state(&self) -> StepperState {
        let particle = &self.particle;
        let state = StepperState::new(
            Vector::from(particle.position),
            Vector::from(particle.direction),
            particle.momentum,
            particle.charge,
            particle.mass,
        )
        .with_step_size(self.stepper.initial_step_size);

        if self.propagation.covariance_transport {
            let diagonal = nalgebra::SVector::<Scalar, 7>::from(particle.covariance_diagonal);
            state.with_covariance(Covariance::from_diagonal(&diagonal))
        } else {
            state
        }
    }
}
