//! Cast, component, and matrix opcode handlers.

use super::result_shape;
use crate::error::RunResult;
use crate::machine::Machine;
use tracing::warn;
use umbra_foundation::{Mat4, V3, VarType};

/// `setfc` / `setfp`: broadcast a float into all three components.
pub(crate) fn float_to_triple(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let av = a.value.borrow();
        let af = av.floats()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            ot.set_at(i, V3::splat(*af.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

/// `setpc` / `setcp`: reinterpret a triple under another kind. The
/// components carry over unchanged; only the type tag differs.
pub(crate) fn retype_triple(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let av = a.value.borrow();
        let at = av.triples()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            ot.set_at(i, *at.at(i));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

/// `mixpp` / `mixcc`: pops t, b, a; lerps a toward b.
pub(crate) fn mix_triple(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let t = m.stack.pop()?;
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = a.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let tv = t.value.borrow();
        let at = av.triples()?;
        let bt = bv.triples()?;
        let tf = tv.floats()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            ot.set_at(i, at.at(i).lerp(*bt.at(i), *tf.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    m.pool.release(t);
    Ok(())
}

/// `comp`: pops index, value; extracts one component per point.
pub(crate) fn component(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let index = m.stack.pop()?;
    let value = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m
        .pool
        .get_temporary(VarType::Float, class, m.npoints);
    {
        let vv = value.value.borrow();
        let iv = index.value.borrow();
        let vt = vv.triples()?;
        let idx = iv.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            let c = (*idx.at(i) as isize).clamp(0, 2) as usize;
            of.set_at(i, vt.at(i).component(c).unwrap_or(0.0));
        }
    }
    m.stack.push(out);
    m.pool.release(value);
    m.pool.release(index);
    Ok(())
}

/// `setcomp`: pops new value, index, triple; pushes the modified triple.
pub(crate) fn set_component(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let newval = m.stack.pop()?;
    let index = m.stack.pop()?;
    let value = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let kind = value.value.borrow().vtype();
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let vv = value.value.borrow();
        let iv = index.value.borrow();
        let nv = newval.value.borrow();
        let vt = vv.triples()?;
        let idx = iv.floats()?;
        let nf = nv.floats()?;
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..n {
            let mut triple = *vt.at(i);
            let c = (*idx.at(i) as isize).clamp(0, 2) as usize;
            triple.set_component(c, *nf.at(i));
            ot.set_at(i, triple);
        }
    }
    m.stack.push(out);
    m.pool.release(value);
    m.pool.release(index);
    m.pool.release(newval);
    Ok(())
}

/// `mulmm`: matrix product, second operand applied first.
pub(crate) fn mul_matrix(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Matrix, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let am = av.matrices()?;
        let bm = bv.matrices()?;
        let mut ov = out.borrow_mut();
        let om = ov.matrices_mut()?;
        for i in 0..n {
            om.set_at(i, am.at(i).mul(bm.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}

/// `minvert`: a singular matrix inverts to identity, with a log.
pub(crate) fn invert_matrix(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Matrix, class, m.npoints);
    {
        let av = a.value.borrow();
        let am = av.matrices()?;
        let mut ov = out.borrow_mut();
        let om = ov.matrices_mut()?;
        for i in 0..n {
            let inv = am.at(i).inverted().unwrap_or_else(|| {
                warn!("minvert of a singular matrix, substituting identity");
                Mat4::IDENTITY
            });
            om.set_at(i, inv);
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}

pub(crate) fn determinant(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let am = av.matrices()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, am.at(i).determinant());
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    Ok(())
}
