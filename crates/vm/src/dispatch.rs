//! External shadeop dispatch.
//!
//! An `external` pseudo-opcode in the bytecode carries a call descriptor:
//! name, declared return type, and argument types. At load time the
//! descriptor is resolved against the configured [`ShadeopRegistry`]:
//!
//! 1. A candidate whose signature matches exactly wins.
//! 2. If none does and the declared return type is void, the first
//!    candidate with compatible argument types is accepted regardless of
//!    its actual return type; the substitution is logged and the unused
//!    result discarded. This fallback has no correctness guarantee beyond
//!    argument compatibility — it is preserved for compatibility with
//!    existing compiled shaders and is best-effort by design.
//! 3. Otherwise the load fails, enumerating every known signature for the
//!    name.
//!
//! Accepted candidates are lazily one-time-initialized per calling shader
//! instance the first time that instance reaches the call.

use crate::error::{LoadError, LoadResult, RunResult, RuntimeError};
use crate::machine::Machine;
use crate::value::ShadingValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use umbra_foundation::{StorageClass, TypeCode, VarType};
use umbra_shadeops::{ShadeopEntry, ShadeopRegistry, ShadeopValue};

/// An external call site, resolved at load time.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResolvedExternal {
    pub name: String,
    /// Return type declared at the call site.
    pub ret: TypeCode,
    /// Argument types declared at the call site.
    pub args: Vec<TypeCode>,
    /// Whether the bound candidate's result is discarded (void-declared
    /// call bound to a non-void candidate).
    pub discard_result: bool,
    /// The bound candidate. `None` only on a deserialized program that
    /// has not been re-linked.
    #[serde(skip)]
    pub entry: Option<Arc<ShadeopEntry>>,
}

impl ResolvedExternal {
    /// `name(f, p) -> c` rendering of the declared signature.
    pub fn declared_signature(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        format!("{}({}) -> {}", self.name, args.join(", "), self.ret)
    }
}

/// Resolve a call descriptor against the registry.
pub fn resolve(
    registry: &ShadeopRegistry,
    name: &str,
    ret: TypeCode,
    args: &[TypeCode],
) -> LoadResult<ResolvedExternal> {
    let candidates = registry.candidates(name);

    if let Some(exact) = candidates
        .iter()
        .find(|c| c.matches_exactly(ret, args))
    {
        debug!(name, signature = %exact.signature(), "resolved external");
        return Ok(ResolvedExternal {
            name: name.to_string(),
            ret,
            args: args.to_vec(),
            discard_result: false,
            entry: Some(exact.clone()),
        });
    }

    // Void-declared calls accept the first argument-compatible candidate
    // of any return type; the result is discarded.
    if ret == TypeCode::Void {
        if let Some(fallback) = candidates.iter().find(|c| c.accepts_args(args)) {
            warn!(
                name,
                bound = %fallback.signature(),
                "void-declared external bound to non-void candidate; result discarded"
            );
            return Ok(ResolvedExternal {
                name: name.to_string(),
                ret,
                args: args.to_vec(),
                discard_result: fallback.ret != TypeCode::Void,
                entry: Some(fallback.clone()),
            });
        }
    }

    let wanted = {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        format!("{}({}) -> {}", name, args.join(", "), ret)
    };
    Err(LoadError::UnresolvedExternal {
        wanted,
        known: registry.known_signatures(name).join(", "),
    })
}

/// Execute a resolved external call at the machine's current state.
pub(crate) fn call_external(m: &mut Machine<'_>, index: u16) -> RunResult<()> {
    let program = m.program;
    let call = program
        .externals
        .get(index as usize)
        .ok_or_else(|| RuntimeError::Internal(format!("external index {index} out of range")))?;
    let entry = call
        .entry
        .clone()
        .ok_or_else(|| RuntimeError::Internal(format!("external `{}` not linked", call.name)))?;
    let discard = call.discard_result;
    let ret = entry.ret;
    let argc = entry.args.len();

    // One-time init per calling shader instance.
    if m.initialized_externs.insert(index) {
        if let Some(init) = entry.init {
            debug!(name = %entry.name, instance = m.instance_id, "initializing shadeop");
            init(m.instance_id);
        }
    }

    // Pop arguments; the last argument is on top.
    m.stack.clear_varying_flag();
    let mut popped = Vec::with_capacity(argc);
    for _ in 0..argc {
        popped.push(m.stack.pop()?);
    }
    popped.reverse();
    let varying = m.stack.popped_varying();

    // A fully masked-off call site does no work at all.
    let skip = !m.env.is_running() || !m.run_state.any_active();

    let class = if varying {
        StorageClass::Varying
    } else {
        StorageClass::Uniform
    };
    let result_kind = ret.var_type().filter(|_| !discard);
    // A zeroed result is still pushed when the call is skipped, so the
    // stack stays balanced.
    let out = result_kind.map(|kind| {
        let out = m.pool.get_temporary(kind, class, m.npoints);
        out.borrow_mut().fill_default();
        out
    });

    if !skip {
        let count = if varying { m.npoints } else { 1 };
        let mut marshalled = Vec::with_capacity(argc);
        for i in 0..count {
            if varying && !m.run_state.is_active(i) {
                continue;
            }
            marshalled.clear();
            for entry_arg in &popped {
                marshalled.push(marshal(&entry_arg.value.borrow(), i)?);
            }
            let result = (entry.eval)(&marshalled);
            if let Some(out) = &out {
                write_result(&mut out.borrow_mut(), i, &result)?;
            }
        }
    }

    for entry_arg in popped {
        m.pool.release(entry_arg);
    }
    if let Some(out) = out {
        m.stack.push(out);
    }
    Ok(())
}

fn marshal(value: &ShadingValue, i: usize) -> RunResult<ShadeopValue> {
    Ok(match value.vtype() {
        VarType::Float => ShadeopValue::Float(*value.floats()?.at(i)),
        VarType::String => ShadeopValue::Str(value.strings()?.at(i).clone()),
        VarType::Matrix => ShadeopValue::Matrix(*value.matrices()?.at(i)),
        _ => ShadeopValue::Triple(*value.triples()?.at(i)),
    })
}

fn write_result(out: &mut ShadingValue, i: usize, result: &ShadeopValue) -> RunResult<()> {
    match (out.vtype(), result) {
        (VarType::Float, ShadeopValue::Float(v)) => out.floats_mut()?.set_at(i, *v),
        (VarType::String, ShadeopValue::Str(s)) => out.strings_mut()?.set_at(i, s.clone()),
        (VarType::Matrix, ShadeopValue::Matrix(m)) => out.matrices_mut()?.set_at(i, *m),
        (_, ShadeopValue::Triple(v)) => out.triples_mut()?.set_at(i, *v),
        (expected, _) => {
            return Err(RuntimeError::Internal(format!(
                "shadeop returned a value of the wrong kind, expected {expected}"
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_shadeops::ShadeopEntry;

    fn entry(name: &str, ret: TypeCode, args: &[TypeCode]) -> ShadeopEntry {
        ShadeopEntry {
            name: name.to_string(),
            ret,
            args: args.to_vec(),
            doc: String::new(),
            init: None,
            eval: |_| ShadeopValue::Float(1.0),
        }
    }

    #[test]
    fn test_exact_match_preferred() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("op", TypeCode::Color, &[TypeCode::Float]));
        reg.register(entry("op", TypeCode::Float, &[TypeCode::Float]));
        let resolved = resolve(&reg, "op", TypeCode::Float, &[TypeCode::Float]).unwrap();
        assert_eq!(resolved.entry.unwrap().ret, TypeCode::Float);
        assert!(!resolved.discard_result);
    }

    #[test]
    fn test_void_fallback_discards_result() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("emit", TypeCode::Color, &[TypeCode::Point]));
        let resolved = resolve(&reg, "emit", TypeCode::Void, &[TypeCode::Point]).unwrap();
        assert!(resolved.discard_result);
    }

    #[test]
    fn test_void_fallback_respects_arg_types() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("emit", TypeCode::Color, &[TypeCode::Float]));
        let err = resolve(&reg, "emit", TypeCode::Void, &[TypeCode::String]).unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedExternal { .. }));
    }

    #[test]
    fn test_unresolved_enumerates_candidates() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("op", TypeCode::Float, &[TypeCode::Float]));
        reg.register(entry("op", TypeCode::Color, &[TypeCode::Color]));
        let err = resolve(&reg, "op", TypeCode::Matrix, &[TypeCode::Matrix]).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("op(f) -> f"));
        assert!(text.contains("op(c) -> c"));
    }

    #[test]
    fn test_point_like_exactness_not_required_for_void() {
        let mut reg = ShadeopRegistry::empty();
        reg.register(entry("op", TypeCode::Float, &[TypeCode::Point]));
        let resolved = resolve(&reg, "op", TypeCode::Void, &[TypeCode::Normal]).unwrap();
        assert!(resolved.discard_result);
    }
}
