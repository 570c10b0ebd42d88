//! Host capability interface.
//!
//! The core never inspects host internals. A host adapter implements
//! [`HostFrame`] to enumerate, read and write variables by name and to hand
//! out callable functions; [`Scope`] is an in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::marshal::HostValue;

/// A host function callable from native code.
pub trait HostFunction {
    fn call(&self, args: &[HostValue]) -> std::result::Result<HostValue, String>;
}

impl<F> HostFunction for F
where
    F: Fn(&[HostValue]) -> std::result::Result<HostValue, String>,
{
    fn call(&self, args: &[HostValue]) -> std::result::Result<HostValue, String> {
        self(args)
    }
}

/// Variables and functions visible at one call site.
pub trait HostFrame {
    /// Every visible variable, sorted by name.
    fn variables(&self) -> Vec<(String, HostValue)>;

    fn read(&self, name: &str) -> Option<HostValue>;

    /// Store a value back under `name`.
    fn write(&mut self, name: &str, value: HostValue) -> std::result::Result<(), String>;

    fn function(&self, name: &str) -> Option<Arc<dyn HostFunction>>;
}

/// A two-layer variable scope plus a function table.
///
/// Reads try locals first, then globals. Writes go to the layer that owns
/// the name; new names become locals.
#[derive(Default, Clone)]
pub struct Scope {
    locals: BTreeMap<String, HostValue>,
    globals: BTreeMap<String, HostValue>,
    functions: BTreeMap<String, Arc<dyn HostFunction>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a local variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HostValue>) -> &mut Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    /// Set a global variable.
    pub fn set_global(
        &mut self,
        name: impl Into<String>,
        value: impl Into<HostValue>,
    ) -> &mut Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Register a callable function.
    pub fn define<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: HostFunction + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    pub fn global(&self, name: &str) -> Option<&HostValue> {
        self.globals.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<HostValue> {
        self.locals.remove(name).or_else(|| self.globals.remove(name))
    }
}

impl HostFrame for Scope {
    fn variables(&self) -> Vec<(String, HostValue)> {
        let mut merged = self.globals.clone();
        merged.extend(self.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.into_iter().collect()
    }

    fn read(&self, name: &str) -> Option<HostValue> {
        self.get(name).cloned()
    }

    fn write(&mut self, name: &str, value: HostValue) -> std::result::Result<(), String> {
        if !self.locals.contains_key(name)
            && let Some(slot) = self.globals.get_mut(name)
        {
            *slot = value;
            return Ok(());
        }
        self.locals.insert(name.to_string(), value);
        Ok(())
    }

    fn function(&self, name: &str) -> Option<Arc<dyn HostFunction>> {
        self.functions.get(name).cloned()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("locals", &self.locals)
            .field("globals", &self.globals)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}
