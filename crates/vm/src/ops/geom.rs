//! Geometric opcode handlers: orientation helpers, coordinate-space
//! transforms, and grid-derivative normals.

use super::{binary_triple, result_shape};
use crate::error::RunResult;
use crate::machine::Machine;
use tracing::warn;
use umbra_foundation::{vector, Mat4, StorageClass, V3, VarType};

pub(crate) fn faceforward(m: &mut Machine<'_>) -> RunResult<()> {
    // Pops I, N.
    m.stack.clear_varying_flag();
    let i_entry = m.stack.pop()?;
    let n_entry = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = n_entry.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let nv = n_entry.value.borrow();
        let iv = i_entry.value.borrow();
        let nt = nv.triples()?;
        let it = iv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for p in 0..n {
            ot.set_at(p, vector::faceforward(*nt.at(p), *it.at(p)));
        }
    }
    m.stack.push(out);
    m.pool.release(n_entry);
    m.pool.release(i_entry);
    Ok(())
}

pub(crate) fn reflect(m: &mut Machine<'_>) -> RunResult<()> {
    // Pops N, I.
    binary_triple(m, vector::reflect)
}

pub(crate) fn refract(m: &mut Machine<'_>) -> RunResult<()> {
    // Pops eta, N, I.
    m.stack.clear_varying_flag();
    let eta = m.stack.pop()?;
    let n_entry = m.stack.pop()?;
    let i_entry = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = i_entry.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let iv = i_entry.value.borrow();
        let nv = n_entry.value.borrow();
        let ev = eta.value.borrow();
        let it = iv.triples()?;
        let nt = nv.triples()?;
        let ef = ev.floats()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for p in 0..n {
            ot.set_at(p, vector::refract(*it.at(p), *nt.at(p), *ef.at(p)));
        }
    }
    m.stack.push(out);
    m.pool.release(i_entry);
    m.pool.release(n_entry);
    m.pool.release(eta);
    Ok(())
}

/// `calculatenormal`: cross product of the grid-difference derivatives of
/// the popped position value. Always a varying normal.
pub(crate) fn calculate_normal(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let p_entry = m.stack.pop()?;
    let width = m.env.grid_width().max(1);
    let height = m.env.grid_height().max(1);
    let out = m
        .pool
        .get_temporary(VarType::Normal, StorageClass::Varying, m.npoints);
    {
        let pv = p_entry.value.borrow();
        let pt = pv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        let at = |x: usize, y: usize| *pt.at(y * width + x);
        for y in 0..height {
            for x in 0..width {
                // One-sided differences, flipped at the far edges so the
                // orientation stays consistent.
                let du = if x + 1 < width {
                    at(x + 1, y) - at(x, y)
                } else if x > 0 {
                    at(x, y) - at(x - 1, y)
                } else {
                    V3::ZERO
                };
                let dv = if y + 1 < height {
                    at(x, y + 1) - at(x, y)
                } else if y > 0 {
                    at(x, y) - at(x, y - 1)
                } else {
                    V3::ZERO
                };
                ot.set_at(y * width + x, du.cross(dv));
            }
        }
    }
    m.stack.push(out);
    m.pool.release(p_entry);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TransformKind {
    Point,
    Vector,
    Normal,
}

/// `transform` / `vtransform` / `ntransform`: pops the value, then the
/// target space name; converts from "current" to the named space. An
/// unknown space leaves the value unchanged.
pub(crate) fn transform(m: &mut Machine<'_>, kind: TransformKind) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let value = m.stack.pop()?;
    let space = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let vkind = value.value.borrow().vtype();
    let out = m.pool.get_temporary(vkind, class, m.npoints);
    {
        let space_name = space.value.borrow().strings()?.at(0).clone();
        let matrix = m.env.space_matrix("current", &space_name).unwrap_or_else(|| {
            warn!(space = %space_name, "unknown coordinate space, using identity");
            Mat4::IDENTITY
        });
        let vv = value.value.borrow();
        let vt = vv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for p in 0..n {
            let transformed = match kind {
                TransformKind::Point => matrix.transform_point(*vt.at(p)),
                TransformKind::Vector => matrix.transform_vector(*vt.at(p)),
                TransformKind::Normal => matrix.transform_normal(*vt.at(p)),
            };
            ot.set_at(p, transformed);
        }
    }
    m.stack.push(out);
    m.pool.release(value);
    m.pool.release(space);
    Ok(())
}

/// `ctransform`: color-space conversion from RGB to the named space.
pub(crate) fn ctransform(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let value = m.stack.pop()?;
    let space = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Color, class, m.npoints);
    {
        let space_name = space.value.borrow().strings()?.at(0).clone();
        let convert: fn(V3) -> V3 = match space_name.as_str() {
            "rgb" | "" => |c| c,
            "hsv" => rgb_to_hsv,
            _ => {
                warn!(space = %space_name, "unknown color space, leaving color unchanged");
                |c| c
            }
        };
        let vv = value.value.borrow();
        let vt = vv.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for p in 0..n {
            ot.set_at(p, convert(*vt.at(p)));
        }
    }
    m.stack.push(out);
    m.pool.release(value);
    m.pool.release(space);
    Ok(())
}

/// `mtransform`: pops the matrix, then the space name; composes the
/// current-to-space matrix onto it.
pub(crate) fn mtransform(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let value = m.stack.pop()?;
    let space = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Matrix, class, m.npoints);
    {
        let space_name = space.value.borrow().strings()?.at(0).clone();
        let matrix = m.env.space_matrix("current", &space_name).unwrap_or_else(|| {
            warn!(space = %space_name, "unknown coordinate space, using identity");
            Mat4::IDENTITY
        });
        let vv = value.value.borrow();
        let vm = vv.matrices()?;
        let mut ov = out.borrow_mut();
        let om = ov.matrices_mut()?;
        for p in 0..n {
            om.set_at(p, matrix.mul(vm.at(p)));
        }
    }
    m.stack.push(out);
    m.pool.release(value);
    m.pool.release(space);
    Ok(())
}

fn rgb_to_hsv(c: V3) -> V3 {
    let max = c.x.max(c.y).max(c.z);
    let min = c.x.min(c.y).min(c.z);
    let delta = max - min;
    let h = if delta == 0.0 {
        0.0
    } else if max == c.x {
        (((c.y - c.z) / delta).rem_euclid(6.0)) / 6.0
    } else if max == c.y {
        ((c.z - c.x) / delta + 2.0) / 6.0
    } else {
        ((c.x - c.y) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    V3::new(h, s, max)
}
