//! Lighting opcode handlers.
//!
//! `ambient`, `diffuse`, and `specular` are whole-integration front-ends
//! that drive the environment's light iterator internally. The
//! illuminance protocol exposes the same iterator to compiled loop
//! bodies:
//!
//! ```text
//! pushv P  [pushis "category"]
//! init_illuminance[2]          ; count of contributing lights
//! jz :end
//! :top
//! rs_push
//! pushv P  [pushv axis  pushif angle]
//! illuminance[2]               ; bind L/Cl, mask cone
//! <body>
//! rs_pop
//! advance_illuminance
//! jnz :top
//! :end
//! ```
//!
//! `init_gather`/`advance_gather` follow the same shape for ray-sample
//! loops.

use crate::env::StandardVar;
use crate::error::{RunResult, RuntimeError};
use crate::machine::Machine;
use umbra_foundation::{StorageClass, V3, VarType};

fn standard_handle(
    m: &Machine<'_>,
    var: StandardVar,
) -> RunResult<crate::value::ValueRef> {
    m.env
        .standard(var)
        .ok_or(RuntimeError::MissingGlobal(var.name()))
}

/// `ambient`: the non-directional contribution, uniform over the grid.
pub(crate) fn ambient(m: &mut Machine<'_>) -> RunResult<()> {
    let out = m
        .pool
        .get_temporary(VarType::Color, StorageClass::Uniform, 1);
    out.borrow_mut()
        .triples_mut()?
        .set_at(0, m.env.ambient_light());
    m.stack.push(out);
    Ok(())
}

/// `diffuse`: pops N; integrates `Cl * (L̂ · N̂)` over all lights.
pub(crate) fn diffuse(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let n_entry = m.stack.pop()?;
    let p_handle = standard_handle(m, StandardVar::P)?;
    let out = m
        .pool
        .get_temporary(VarType::Color, StorageClass::Varying, m.npoints);
    {
        let nv = n_entry.value.borrow();
        let nt = nv.triples()?;
        let pv = p_handle.borrow();
        let pt = pv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..m.npoints {
            ot.set_at(i, V3::ZERO);
        }

        let count = m.env.init_illuminance(None);
        let mut remaining = count;
        while remaining > 0 {
            for i in 0..m.npoints {
                if !m.run_state.is_active(i) {
                    continue;
                }
                if let Some((l, cl)) = m.env.light_contribution(i, *pt.at(i)) {
                    let cos = l.normalized().dot(nt.at(i).normalized()).max(0.0);
                    ot.set_at(i, *ot.at(i) + cl * cos);
                }
            }
            remaining -= 1;
            if remaining > 0 && !m.env.advance_illuminance() {
                break;
            }
        }
    }
    m.stack.push(out);
    m.pool.release(n_entry);
    Ok(())
}

/// `specular`: pops roughness, the eye vector, then N; Blinn half-angle
/// integration over all lights.
pub(crate) fn specular(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let rough_entry = m.stack.pop()?;
    let eye_entry = m.stack.pop()?;
    let n_entry = m.stack.pop()?;
    let p_handle = standard_handle(m, StandardVar::P)?;
    let out = m
        .pool
        .get_temporary(VarType::Color, StorageClass::Varying, m.npoints);
    {
        let nv = n_entry.value.borrow();
        let ev = eye_entry.value.borrow();
        let rv = rough_entry.value.borrow();
        let nt = nv.triples()?;
        let et = ev.triples()?;
        let rf = rv.floats()?;
        let pv = p_handle.borrow();
        let pt = pv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..m.npoints {
            ot.set_at(i, V3::ZERO);
        }

        let count = m.env.init_illuminance(None);
        let mut remaining = count;
        while remaining > 0 {
            for i in 0..m.npoints {
                if !m.run_state.is_active(i) {
                    continue;
                }
                if let Some((l, cl)) = m.env.light_contribution(i, *pt.at(i)) {
                    let half = (l.normalized() + et.at(i).normalized()).normalized();
                    let roughness = rf.at(i).max(1e-4);
                    let spec = nt
                        .at(i)
                        .normalized()
                        .dot(half)
                        .max(0.0)
                        .powf(1.0 / roughness);
                    ot.set_at(i, *ot.at(i) + cl * spec);
                }
            }
            remaining -= 1;
            if remaining > 0 && !m.env.advance_illuminance() {
                break;
            }
        }
    }
    m.stack.push(out);
    m.pool.release(n_entry);
    m.pool.release(eye_entry);
    m.pool.release(rough_entry);
    Ok(())
}

/// `init_illuminance[2]`: build/validate the light cache and position on
/// the first light. The `2` form pops a category string first.
pub(crate) fn init_illuminance(m: &mut Machine<'_>, with_category: bool) -> RunResult<()> {
    let category_entry = if with_category {
        Some(m.stack.pop()?)
    } else {
        None
    };
    let p_entry = m.stack.pop()?;

    let count = {
        let category = match &category_entry {
            Some(entry) => {
                let value = entry.value.borrow();
                Some(value.strings()?.at(0).clone())
            }
            None => None,
        };
        m.env.init_illuminance(category.as_deref())
    };

    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    out.borrow_mut().floats_mut()?.set_at(0, count as f32);
    m.stack.push(out);

    m.pool.release(p_entry);
    if let Some(entry) = category_entry {
        m.pool.release(entry);
    }
    Ok(())
}

/// `illuminance[2]`: bind L and Cl for the current light at every
/// enclosing-active point. The `2` form pops a cone (angle, axis) and
/// narrows the running state to points inside it.
pub(crate) fn illuminance(m: &mut Machine<'_>, with_cone: bool) -> RunResult<()> {
    let (angle_entry, axis_entry) = if with_cone {
        let angle = m.stack.pop()?;
        let axis = m.stack.pop()?;
        (Some(angle), Some(axis))
    } else {
        (None, None)
    };
    let p_entry = m.stack.pop()?;

    let l_handle = standard_handle(m, StandardVar::L)?;
    let cl_handle = standard_handle(m, StandardVar::Cl)?;

    let mut cone = vec![true; m.npoints];
    {
        let pv = p_entry.value.borrow();
        let pt = pv.triples()?;
        let mut lv = l_handle.borrow_mut();
        let lt = lv.triples_mut()?;
        let mut clv = cl_handle.borrow_mut();
        let clt = clv.triples_mut()?;

        for i in 0..m.npoints {
            match m.env.light_contribution(i, *pt.at(i)) {
                Some((l, cl)) => {
                    lt.set_at(i, l);
                    clt.set_at(i, cl);
                }
                None => {
                    lt.set_at(i, V3::ZERO);
                    clt.set_at(i, V3::ZERO);
                    cone[i] = false;
                }
            }
        }

        if let (Some(angle_entry), Some(axis_entry)) = (&angle_entry, &axis_entry) {
            let av = angle_entry.value.borrow();
            let af = av.floats()?;
            let xv = axis_entry.value.borrow();
            let xt = xv.triples()?;
            for (i, inside) in cone.iter_mut().enumerate() {
                let l = lt.at(i).normalized();
                let cos = l.dot(xt.at(i).normalized()).clamp(-1.0, 1.0);
                *inside = *inside && cos.acos() <= *af.at(i);
            }
        }
    }
    m.run_state.get(|i| cone[i]);

    m.pool.release(p_entry);
    if let Some(entry) = axis_entry {
        m.pool.release(entry);
    }
    if let Some(entry) = angle_entry {
        m.pool.release(entry);
    }
    Ok(())
}

/// `advance_illuminance`: step the iterator; pushes 1 while a light
/// remains, 0 at the end.
pub(crate) fn advance_illuminance(m: &mut Machine<'_>) -> RunResult<()> {
    let more = m.env.advance_illuminance();
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    out.borrow_mut()
        .floats_mut()?
        .set_at(0, if more { 1.0 } else { 0.0 });
    m.stack.push(out);
    Ok(())
}

/// `init_gather`: pops the sample count; pushes the iteration count.
pub(crate) fn init_gather(m: &mut Machine<'_>) -> RunResult<()> {
    let samples_entry = m.stack.pop()?;
    let samples = (*samples_entry.value.borrow().floats()?.at(0)).max(0.0) as usize;
    m.pool.release(samples_entry);

    let count = m.env.init_gather(samples);
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    out.borrow_mut().floats_mut()?.set_at(0, count as f32);
    m.stack.push(out);
    Ok(())
}

/// `advance_gather`: pushes 1 while a sample remains, 0 at the end.
pub(crate) fn advance_gather(m: &mut Machine<'_>) -> RunResult<()> {
    let more = m.env.advance_gather();
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Uniform, 1);
    out.borrow_mut()
        .floats_mut()?
        .set_at(0, if more { 1.0 } else { 0.0 });
    m.stack.push(out);
    Ok(())
}
