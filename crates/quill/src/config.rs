use std::{
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::entities::Entities;

/// Errors from configuration setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The runtime has been sealed by a render; the setting is frozen.
    Sealed(&'static str),
    /// The proposed sigil failed validation.
    InvalidSigil(char),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed(setting) => write!(f, "configuration is sealed; '{setting}' can no longer change"),
            Self::InvalidSigil(sigil) => write!(f, "{sigil:?} cannot serve as the tag sigil"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A sigil must be printable ASCII punctuation: tag scanning depends on it
/// never colliding with identifiers, digits, whitespace, or quoting.
fn valid_sigil(sigil: char) -> bool {
    sigil.is_ascii_graphic() && !sigil.is_ascii_alphanumeric() && sigil != '"' && sigil != '\''
}

/// Process-level engine configuration: the tag sigil and the entity
/// registry, write-once and sealed at first render.
///
/// The renderer calls [`entities_for_render`] when a render begins, which
/// seals the runtime and hands out the shared registry; after that every
/// setter reports [`ConfigError::Sealed`]. The built-in defaults must pass
/// their own validation, so a failure at initial bind is a programming error
/// and asserts.
///
/// [`entities_for_render`]: Runtime::entities_for_render
pub struct Runtime {
    sigil: char,
    entities: Arc<Entities>,
    sealed: AtomicBool,
}

impl Runtime {
    /// A runtime with the default `#` sigil and an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entities(Arc::new(Entities::new()))
    }

    /// A runtime with the default `#` sigil and the given registry.
    #[must_use]
    pub fn with_entities(entities: Arc<Entities>) -> Self {
        debug_assert!(valid_sigil('#'), "default sigil must satisfy its own validator");
        Self {
            sigil: '#',
            entities,
            sealed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn sigil(&self) -> char {
        self.sigil
    }

    /// Replaces the tag sigil. Fails after sealing or when the sigil does
    /// not validate.
    pub fn set_sigil(&mut self, sigil: char) -> Result<(), ConfigError> {
        if self.sealed() {
            return Err(ConfigError::Sealed("sigil"));
        }
        if !valid_sigil(sigil) {
            return Err(ConfigError::InvalidSigil(sigil));
        }
        self.sigil = sigil;
        Ok(())
    }

    /// Replaces the entity registry. Fails after sealing.
    pub fn set_entities(&mut self, entities: Arc<Entities>) -> Result<(), ConfigError> {
        if self.sealed() {
            return Err(ConfigError::Sealed("entities"));
        }
        self.entities = entities;
        Ok(())
    }

    /// Reads the registry without sealing, for host inspection.
    #[must_use]
    pub fn entities(&self) -> &Arc<Entities> {
        &self.entities
    }

    /// Seals the configuration. Idempotent.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Borrows the registry for a render: the registry is frozen from the
    /// first borrow onward.
    #[must_use]
    pub fn entities_for_render(&self) -> Arc<Entities> {
        self.seal();
        Arc::clone(&self.entities)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
