//! Texturing front-ends and renderer queries.
//!
//! These are the expensive, side-effecting opcodes: each one checks the
//! environment's running flag and the active-point set first, so a
//! fully masked-off or cancelled invocation short-circuits to a zeroed
//! result without touching the texture system.

use super::result_shape;
use crate::error::RunResult;
use crate::machine::Machine;
use tracing::debug;
use umbra_foundation::{StorageClass, VarType};

fn short_circuit(m: &Machine<'_>) -> bool {
    !m.env.is_running() || !m.run_state.any_active()
}

/// `texturef`: pops t, s, then the map name; single-channel lookup.
pub(crate) fn texture_float(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let t = m.stack.pop()?;
    let s = m.stack.pop()?;
    let name = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    out.borrow_mut().fill_default();
    if !short_circuit(m) {
        let nv = name.value.borrow();
        let map = nv.strings()?.at(0).clone();
        let sv = s.value.borrow();
        let tv = t.value.borrow();
        let sf = sv.floats()?;
        let tf = tv.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            if n > 1 && !m.run_state.is_active(i) {
                continue;
            }
            if let Some(texel) = m.env.texture(&map, *sf.at(i), *tf.at(i)) {
                of.set_at(i, texel.x);
            }
        }
    }
    m.stack.push(out);
    m.pool.release(name);
    m.pool.release(s);
    m.pool.release(t);
    Ok(())
}

/// `texturec`: pops t, s, then the map name; color lookup.
pub(crate) fn texture_color(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let t = m.stack.pop()?;
    let s = m.stack.pop()?;
    let name = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Color, class, m.npoints);
    out.borrow_mut().fill_default();
    if !short_circuit(m) {
        let nv = name.value.borrow();
        let map = nv.strings()?.at(0).clone();
        let sv = s.value.borrow();
        let tv = t.value.borrow();
        let sf = sv.floats()?;
        let tf = tv.floats()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            if n > 1 && !m.run_state.is_active(i) {
                continue;
            }
            if let Some(texel) = m.env.texture(&map, *sf.at(i), *tf.at(i)) {
                ot.set_at(i, texel);
            }
        }
    }
    m.stack.push(out);
    m.pool.release(name);
    m.pool.release(s);
    m.pool.release(t);
    Ok(())
}

/// `environmentc`: pops the direction, then the map name.
pub(crate) fn environment_color(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let dir = m.stack.pop()?;
    let name = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Color, class, m.npoints);
    out.borrow_mut().fill_default();
    if !short_circuit(m) {
        let nv = name.value.borrow();
        let map = nv.strings()?.at(0).clone();
        let dv = dir.value.borrow();
        let dt = dv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            if n > 1 && !m.run_state.is_active(i) {
                continue;
            }
            if let Some(texel) = m.env.environment(&map, *dt.at(i)) {
                ot.set_at(i, texel);
            }
        }
    }
    m.stack.push(out);
    m.pool.release(name);
    m.pool.release(dir);
    Ok(())
}

/// `shadow`: pops the point, then the map name; occlusion in [0, 1].
pub(crate) fn shadow(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let p = m.stack.pop()?;
    let name = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    out.borrow_mut().fill_default();
    if !short_circuit(m) {
        let nv = name.value.borrow();
        let map = nv.strings()?.at(0).clone();
        let pv = p.value.borrow();
        let pt = pv.triples()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            if n > 1 && !m.run_state.is_active(i) {
                continue;
            }
            if let Some(occlusion) = m.env.shadow(&map, *pt.at(i)) {
                of.set_at(i, occlusion);
            }
        }
    }
    m.stack.push(out);
    m.pool.release(name);
    m.pool.release(p);
    Ok(())
}

/// `textureinfo`: pops the field name, then the map name; uniform.
pub(crate) fn texture_info(m: &mut Machine<'_>) -> RunResult<()> {
    let field = m.stack.pop()?;
    let name = m.stack.pop()?;
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    {
        let nv = name.value.borrow();
        let fv = field.value.borrow();
        let map = nv.strings()?.at(0);
        let field_name = fv.strings()?.at(0);
        let info = m.env.texture_info(map, field_name).unwrap_or_else(|| {
            debug!(map = %map, field = %field_name, "textureinfo query unanswered");
            0.0
        });
        out.borrow_mut().floats_mut()?.set_at(0, info);
    }
    m.stack.push(out);
    m.pool.release(name);
    m.pool.release(field);
    Ok(())
}

/// `option`: pops the option name; uniform float, 0 when unknown.
pub(crate) fn option_query(m: &mut Machine<'_>) -> RunResult<()> {
    let name = m.stack.pop()?;
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    {
        let nv = name.value.borrow();
        let key = nv.strings()?.at(0);
        let v = m.env.option(key).unwrap_or_else(|| {
            debug!(option = %key, "option query unanswered");
            0.0
        });
        out.borrow_mut().floats_mut()?.set_at(0, v);
    }
    m.stack.push(out);
    m.pool.release(name);
    Ok(())
}

/// `attribute`: pops the attribute name; uniform float, 0 when unknown.
pub(crate) fn attribute_query(m: &mut Machine<'_>) -> RunResult<()> {
    let name = m.stack.pop()?;
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    {
        let nv = name.value.borrow();
        let key = nv.strings()?.at(0);
        let v = m.env.attribute(key).unwrap_or_else(|| {
            debug!(attribute = %key, "attribute query unanswered");
            0.0
        });
        out.borrow_mut().floats_mut()?.set_at(0, v);
    }
    m.stack.push(out);
    m.pool.release(name);
    Ok(())
}
