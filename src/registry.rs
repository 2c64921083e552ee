//! Module type registry.
//!
//! Maps hardware model numbers to module constructors. The process-wide
//! instance is built lazily on first access and filled with the builtin
//! models; decoders may also be given their own instance.
//!
//! ```rust
//! use daq_decode::module::ModuleIdentity;
//! use daq_decode::registry::ModuleTypeRegistry;
//!
//! let registry = ModuleTypeRegistry::global();
//! assert_eq!(registry.name_of(1881), Some("Lecroy1881Module".to_string()));
//! let module = registry.build(3801, ModuleIdentity::new(1, 0)).unwrap();
//! assert!(module.is_scaler());
//! ```

use crate::error::{AppResult, DecodeError, RegistryError};
use crate::module::{models, Module, ModuleIdentity};
use crate::scaler::{variants, GenScaler};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// A freshly constructed module.
///
/// Scalers are kept concrete so the decoder can place them in a
/// [`ScalerBank`](crate::scaler::ScalerBank).
#[derive(Debug)]
pub enum ModuleInstance {
    /// Any non-scaler module.
    Generic(Box<dyn Module>),
    /// A scaler.
    Scaler(GenScaler),
}

impl ModuleInstance {
    /// Whether this is a scaler.
    pub fn is_scaler(&self) -> bool {
        matches!(self, ModuleInstance::Scaler(_))
    }

    /// The instance as a module trait object.
    pub fn as_module(&self) -> &dyn Module {
        match self {
            ModuleInstance::Generic(module) => module.as_ref(),
            ModuleInstance::Scaler(scaler) => scaler,
        }
    }
}

/// Constructor of a module type.
pub type ModuleConstructor = fn(ModuleIdentity) -> AppResult<ModuleInstance>;

/// Registered module type.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    /// Class name
    pub name: String,
    /// Hardware model number
    pub model: u32,
    /// Constructor
    pub constructor: ModuleConstructor,
}

impl ModuleDescriptor {
    /// Create a descriptor.
    pub fn new(name: impl Into<String>, model: u32, constructor: ModuleConstructor) -> Self {
        Self {
            name: name.into(),
            model,
            constructor,
        }
    }
}

/// Receipt of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationHandle {
    model: u32,
}

impl RegistrationHandle {
    /// Model number that was registered.
    pub fn model(&self) -> u32 {
        self.model
    }
}

/// Table of module types ordered by model number.
#[derive(Debug, Default)]
pub struct ModuleTypeRegistry {
    types: RwLock<BTreeMap<u32, ModuleDescriptor>>,
}

static GLOBAL: Lazy<ModuleTypeRegistry> = Lazy::new(|| {
    let registry = ModuleTypeRegistry::new();
    let count = registry.register_builtin_types();
    debug!(count, "Registered builtin module types");
    registry
});

impl ModuleTypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the builtin models.
    pub fn with_builtin_types() -> Self {
        let registry = Self::new();
        registry.register_builtin_types();
        registry
    }

    /// Process-wide registry, initialized with the builtin models on first use.
    pub fn global() -> &'static ModuleTypeRegistry {
        &GLOBAL
    }

    /// Register a module type. Rejected registrations are logged.
    pub fn register(&self, descriptor: ModuleDescriptor) -> Result<RegistrationHandle, RegistryError> {
        let mut types = self.types.write();
        let rejected = if descriptor.name.is_empty() {
            Some(RegistryError::EmptyName {
                model: descriptor.model,
            })
        } else {
            types.get(&descriptor.model).map(|existing| RegistryError::DuplicateModel {
                model: descriptor.model,
                name: descriptor.name.clone(),
                existing: existing.name.clone(),
            })
        };
        if let Some(err) = rejected {
            error!(model = descriptor.model, error = %err, "Module type registration failed");
            return Err(err);
        }
        let model = descriptor.model;
        types.insert(model, descriptor);
        Ok(RegistrationHandle { model })
    }

    /// Register the builtin models. Returns the number of types added.
    pub fn register_builtin_types(&self) -> usize {
        builtin_descriptors()
            .into_iter()
            .filter_map(|descriptor| self.register(descriptor).ok())
            .count()
    }

    /// Descriptor of a model.
    pub fn get(&self, model: u32) -> Option<ModuleDescriptor> {
        self.types.read().get(&model).cloned()
    }

    /// Class name of a model.
    pub fn name_of(&self, model: u32) -> Option<String> {
        self.types.read().get(&model).map(|d| d.name.clone())
    }

    /// Whether a model is registered.
    pub fn contains(&self, model: u32) -> bool {
        self.types.read().contains_key(&model)
    }

    /// All descriptors in ascending model order.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.types.read().values().cloned().collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Construct a module of `model` at `identity`.
    ///
    /// The lock is released before the constructor runs.
    pub fn build(&self, model: u32, identity: ModuleIdentity) -> AppResult<ModuleInstance> {
        let constructor = self
            .types
            .read()
            .get(&model)
            .map(|d| d.constructor)
            .ok_or(DecodeError::UnknownModel { model })?;
        constructor(identity)
    }
}

fn builtin_descriptors() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::new("Lecroy1881Module", models::LECROY_1881, |id| {
            Ok(ModuleInstance::Generic(Box::new(models::lecroy_1881(id)?)))
        }),
        ModuleDescriptor::new("Lecroy1877Module", models::LECROY_1877, |id| {
            Ok(ModuleInstance::Generic(Box::new(models::lecroy_1877(id)?)))
        }),
        ModuleDescriptor::new("Lecroy1875Module", models::LECROY_1875, |id| {
            Ok(ModuleInstance::Generic(Box::new(models::lecroy_1875(id)?)))
        }),
        ModuleDescriptor::new("Caen775Module", models::CAEN_775, |id| {
            Ok(ModuleInstance::Generic(Box::new(models::caen_775(id)?)))
        }),
        ModuleDescriptor::new("Scaler560", variants::SCALER_560, |id| {
            Ok(ModuleInstance::Scaler(variants::scaler_560(id)?))
        }),
        ModuleDescriptor::new("Scaler1151", variants::SCALER_1151, |id| {
            Ok(ModuleInstance::Scaler(variants::scaler_1151(id)?))
        }),
        ModuleDescriptor::new("Scaler3800", variants::SCALER_3800, |id| {
            Ok(ModuleInstance::Scaler(variants::scaler_3800(id)?))
        }),
        ModuleDescriptor::new("Scaler3801", variants::SCALER_3801, |id| {
            Ok(ModuleInstance::Scaler(variants::scaler_3801(id)?))
        }),
    ]
}
