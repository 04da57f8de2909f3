//! Field model.
//!
//! Every attribute of a resource is a [`Field`] holding two slots: the
//! *current* value (last observed from the provider, or last successfully
//! applied) and the *wanted* value (from configuration). Planning compares
//! the two; apply moves wanted into current once the provider accepted it.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field {0:?} has no current value")]
    NoCurrent(&'static str),

    #[error("field {0:?} has no wanted value")]
    NoWanted(&'static str),

    #[error("field {0:?} is provider-assigned and cannot be configured")]
    OutputNotConfigurable(&'static str),

    #[error("field {field:?} could not be encoded: {source}")]
    Encode {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("field {field:?} could not be decoded: {source}")]
    Decode {
        field: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Updatable in place.
    Mutable,
    /// Any change forces recreation of the resource.
    ForceNew,
    /// Set by the provider only.
    Output,
}

/// A current/wanted pair for one attribute.
#[derive(Clone)]
pub struct Field<T> {
    name: &'static str,
    mode: Mode,
    current: Option<T>,
    wanted: Option<T>,
    normalize: Option<fn(&T) -> T>,
}

impl<T: fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("current", &self.current)
            .field("wanted", &self.wanted)
            .finish()
    }
}

impl<T: Clone + PartialEq> Field<T> {
    fn with_mode(name: &'static str, mode: Mode) -> Self {
        Self {
            name,
            mode,
            current: None,
            wanted: None,
            normalize: None,
        }
    }

    pub fn new(name: &'static str) -> Self {
        Self::with_mode(name, Mode::Mutable)
    }

    pub fn force_new(name: &'static str) -> Self {
        Self::with_mode(name, Mode::ForceNew)
    }

    pub fn output(name: &'static str) -> Self {
        Self::with_mode(name, Mode::Output)
    }

    /// Compare values only after passing both sides through `normalize`,
    /// typically to fill in provider defaults.
    pub fn normalized_by(mut self, normalize: fn(&T) -> T) -> Self {
        self.normalize = Some(normalize);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_force_new(&self) -> bool {
        self.mode == Mode::ForceNew
    }

    pub fn is_output(&self) -> bool {
        self.mode == Mode::Output
    }

    pub fn set_current(&mut self, value: T) {
        self.current = Some(value);
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    pub fn set_wanted(&mut self, value: T) -> Result<(), FieldError> {
        if self.is_output() {
            return Err(FieldError::OutputNotConfigurable(self.name));
        }
        self.wanted = Some(value);
        Ok(())
    }

    pub fn clear_wanted(&mut self) {
        self.wanted = None;
    }

    pub fn current(&self) -> Result<&T, FieldError> {
        self.current.as_ref().ok_or(FieldError::NoCurrent(self.name))
    }

    pub fn wanted(&self) -> Result<&T, FieldError> {
        self.wanted.as_ref().ok_or(FieldError::NoWanted(self.name))
    }

    pub fn current_opt(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn wanted_opt(&self) -> Option<&T> {
        self.wanted.as_ref()
    }

    /// Wanted if configured, else current. For identity lookups during read.
    pub fn any(&self) -> Option<&T> {
        self.wanted.as_ref().or(self.current.as_ref())
    }

    /// No current value: the attribute was never observed or applied.
    pub fn is_new(&self) -> bool {
        self.current.is_none()
    }

    /// A wanted value is configured and differs from current.
    ///
    /// Output fields never count as changed.
    pub fn is_changed(&self) -> bool {
        if self.is_output() {
            return false;
        }
        match (&self.wanted, &self.current) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(wanted), Some(current)) => match self.normalize {
                Some(normalize) => normalize(wanted) != normalize(current),
                None => wanted != current,
            },
        }
    }
}

/// Type-erased view of a [`Field`], used by the generic planning, apply and
/// persistence code. Values cross this boundary as JSON.
pub trait AnyField: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_force_new(&self) -> bool;
    fn is_output(&self) -> bool;
    fn is_new(&self) -> bool;
    fn is_changed(&self) -> bool;
    fn has_wanted(&self) -> bool;
    fn current_value(&self) -> Result<Option<Value>, FieldError>;
    fn wanted_value(&self) -> Result<Option<Value>, FieldError>;
    /// Replace the current slot. `None` clears it.
    fn load_current(&mut self, value: Option<Value>) -> Result<(), FieldError>;
}

impl<T> AnyField for Field<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_force_new(&self) -> bool {
        Field::is_force_new(self)
    }

    fn is_output(&self) -> bool {
        Field::is_output(self)
    }

    fn is_new(&self) -> bool {
        Field::is_new(self)
    }

    fn is_changed(&self) -> bool {
        Field::is_changed(self)
    }

    fn has_wanted(&self) -> bool {
        self.wanted.is_some()
    }

    fn current_value(&self) -> Result<Option<Value>, FieldError> {
        self.current
            .as_ref()
            .map(|v| serde_json::to_value(v))
            .transpose()
            .map_err(|source| FieldError::Encode {
                field: self.name,
                source,
            })
    }

    fn wanted_value(&self) -> Result<Option<Value>, FieldError> {
        self.wanted
            .as_ref()
            .map(|v| serde_json::to_value(v))
            .transpose()
            .map_err(|source| FieldError::Encode {
                field: self.name,
                source,
            })
    }

    fn load_current(&mut self, value: Option<Value>) -> Result<(), FieldError> {
        self.current = value
            .map(serde_json::from_value)
            .transpose()
            .map_err(|source| FieldError::Decode {
                field: self.name,
                source,
            })?;
        Ok(())
    }
}
