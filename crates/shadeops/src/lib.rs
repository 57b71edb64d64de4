//! Shadeop registry.
//!
//! Shading operations that are not part of the built-in opcode library are
//! resolved by name and signature against this registry when a program's
//! `external` call descriptors are linked. Candidates come from two
//! sources:
//!
//! 1. Built-ins registered at link time through [`linkme::distributed_slice`]
//!    — any crate in the build may contribute a [`ShadeopDescriptor`] to
//!    [`SHADEOPS`].
//! 2. Runtime registrations added to a [`ShadeopRegistry`] at configuration
//!    time, which is how renderer plugins expose their operations.
//!
//! A registry instance is assembled once per engine configuration and
//! handed to every program load. Candidate *selection* (exact-signature
//! preference, the void-return fallback) is the loader's business; the
//! registry only stores and enumerates.

pub mod builtin;

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use umbra_foundation::{Mat4, TypeCode, V3};

pub use linkme;
use linkme::distributed_slice;

/// A single argument or result value crossing the shadeop boundary.
///
/// Shadeops are evaluated per shading point; the VM loops over the grid
/// and marshals one `ShadeopValue` per argument per point.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadeopValue {
    Float(f32),
    Str(String),
    Triple(V3),
    Matrix(Mat4),
}

impl ShadeopValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            ShadeopValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_triple(&self) -> Option<V3> {
        match self {
            ShadeopValue::Triple(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ShadeopValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Mat4> {
        match self {
            ShadeopValue::Matrix(m) => Some(*m),
            _ => None,
        }
    }
}

/// Per-point evaluation entry point of a shadeop candidate.
pub type ShadeopFn = fn(args: &[ShadeopValue]) -> ShadeopValue;

/// One-time initialization hook, called once per shader instance that
/// invokes the candidate. Receives the instance identity.
pub type ShadeopInitFn = fn(instance_id: u64);

/// A statically registered shadeop candidate.
pub struct ShadeopDescriptor {
    /// Call name as it appears in `external` descriptors.
    pub name: &'static str,
    /// Return type code.
    pub ret: TypeCode,
    /// Argument type codes, in call order.
    pub args: &'static [TypeCode],
    /// Short documentation string.
    pub doc: &'static str,
    /// Optional per-instance initialization hook.
    pub init: Option<ShadeopInitFn>,
    /// Per-point implementation.
    pub eval: ShadeopFn,
}

/// Distributed slice collecting built-in shadeop registrations.
#[distributed_slice]
pub static SHADEOPS: [ShadeopDescriptor];

/// A resolved candidate entry held by a registry.
///
/// Owned form of [`ShadeopDescriptor`] so runtime registrations do not
/// need `'static` data.
#[derive(Clone)]
pub struct ShadeopEntry {
    pub name: String,
    pub ret: TypeCode,
    pub args: Vec<TypeCode>,
    pub doc: String,
    pub init: Option<ShadeopInitFn>,
    pub eval: ShadeopFn,
}

impl ShadeopEntry {
    /// `name(f, p) -> c` rendering used in diagnostics.
    pub fn signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        format!("{}({}) -> {}", self.name, args.join(", "), self.ret)
    }

    /// Exact signature equality against a declared call.
    pub fn matches_exactly(&self, ret: TypeCode, args: &[TypeCode]) -> bool {
        self.ret == ret && self.args == args
    }

    /// Argument-type compatibility ignoring the return type. Point-like
    /// codes are interchangeable, matching the value model.
    pub fn accepts_args(&self, args: &[TypeCode]) -> bool {
        self.args.len() == args.len()
            && self.args.iter().zip(args).all(|(have, want)| {
                have == want
                    || want
                        .var_type()
                        .map(|t| have.accepts(t))
                        .unwrap_or(false)
            })
    }
}

impl fmt::Debug for ShadeopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadeopEntry")
            .field("signature", &self.signature())
            .finish()
    }
}

impl From<&'static ShadeopDescriptor> for ShadeopEntry {
    fn from(d: &'static ShadeopDescriptor) -> Self {
        ShadeopEntry {
            name: d.name.to_string(),
            ret: d.ret,
            args: d.args.to_vec(),
            doc: d.doc.to_string(),
            init: d.init,
            eval: d.eval,
        }
    }
}

/// Candidate store, assembled at configuration time.
#[derive(Default)]
pub struct ShadeopRegistry {
    candidates: IndexMap<String, Vec<Arc<ShadeopEntry>>>,
}

impl ShadeopRegistry {
    /// An empty registry, for tests that control every candidate.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry seeded with every statically registered built-in.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for descriptor in SHADEOPS.iter() {
            registry.register(ShadeopEntry::from(descriptor));
        }
        tracing::debug!(count = registry.len(), "shadeop registry assembled");
        registry
    }

    /// Add a candidate. Multiple candidates may share a name; they are
    /// kept in registration order, which resolution relies on.
    pub fn register(&mut self, entry: ShadeopEntry) {
        self.candidates
            .entry(entry.name.clone())
            .or_default()
            .push(Arc::new(entry));
    }

    /// All candidates registered under `name`, in registration order.
    pub fn candidates(&self, name: &str) -> &[Arc<ShadeopEntry>] {
        self.candidates
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Known signatures for `name`, for error reporting.
    pub fn known_signatures(&self, name: &str) -> Vec<String> {
        self.candidates(name)
            .iter()
            .map(|c| c.signature())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, ret: TypeCode, args: &[TypeCode]) -> ShadeopEntry {
        ShadeopEntry {
            name: name.to_string(),
            ret,
            args: args.to_vec(),
            doc: String::new(),
            init: None,
            eval: |_| ShadeopValue::Float(0.0),
        }
    }

    #[test]
    fn test_register_and_enumerate() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("fresnel", TypeCode::Float, &[TypeCode::Float]));
        reg.register(entry(
            "fresnel",
            TypeCode::Color,
            &[TypeCode::Vector, TypeCode::Float],
        ));
        assert_eq!(reg.candidates("fresnel").len(), 2);
        assert_eq!(
            reg.known_signatures("fresnel"),
            vec!["fresnel(f) -> f", "fresnel(v, f) -> c"]
        );
        assert!(reg.candidates("missing").is_empty());
    }

    #[test]
    fn test_exact_match() {
        let e = entry("op", TypeCode::Float, &[TypeCode::Float, TypeCode::Point]);
        assert!(e.matches_exactly(TypeCode::Float, &[TypeCode::Float, TypeCode::Point]));
        assert!(!e.matches_exactly(TypeCode::Color, &[TypeCode::Float, TypeCode::Point]));
        assert!(!e.matches_exactly(TypeCode::Float, &[TypeCode::Float]));
    }

    #[test]
    fn test_point_like_args_compatible() {
        let e = entry("op", TypeCode::Float, &[TypeCode::Point]);
        assert!(e.accepts_args(&[TypeCode::Normal]));
        assert!(e.accepts_args(&[TypeCode::Vector]));
        assert!(!e.accepts_args(&[TypeCode::Color]));
    }

    #[test]
    fn test_builtins_present() {
        let reg = ShadeopRegistry::with_builtins();
        assert!(!reg.candidates("luminance").is_empty());
    }
}
