//! Noise and random opcode handlers.
//!
//! Noise is a pure function of position (deterministic across runs);
//! `random` draws from the environment's stream, which owns the sequence
//! state. Arity variants map the shading-language call forms onto the
//! 3D lattice: 1D calls sit on the x axis, 2D calls on the xy plane.

use super::result_shape;
use crate::error::RunResult;
use crate::machine::Machine;
use umbra_foundation::rng;
use umbra_foundation::{StorageClass, V3, VarType};

fn push_noise_result(
    m: &mut Machine<'_>,
    kind: VarType,
    class: StorageClass,
    n: usize,
    sample: impl Fn(usize) -> V3,
) -> RunResult<()> {
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let mut ov = out.borrow_mut();
        match kind {
            VarType::Float => {
                let of = ov.floats_mut()?;
                for i in 0..n {
                    of.set_at(i, rng::value_noise(sample(i), 0));
                }
            }
            _ => {
                let ot = ov.triples_mut()?;
                for i in 0..n {
                    ot.set_at(i, rng::value_noise_v3(sample(i)));
                }
            }
        }
    }
    m.stack.push(out);
    Ok(())
}

/// `noise1*`: pops one float coordinate.
pub(crate) fn noise1(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    {
        let av = a.value.borrow();
        let af = av.floats()?;
        push_noise_result(m, kind, class, n, |i| V3::new(*af.at(i), 0.0, 0.0))?;
    }
    m.pool.release(a);
    Ok(())
}

/// `noise2f`: pops t, then s.
pub(crate) fn noise2(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let t = m.stack.pop()?;
    let s = m.stack.pop()?;
    let (class, n) = result_shape(m);
    {
        let sv = s.value.borrow();
        let tv = t.value.borrow();
        let sf = sv.floats()?;
        let tf = tv.floats()?;
        push_noise_result(m, VarType::Float, class, n, |i| {
            V3::new(*sf.at(i), *tf.at(i), 0.0)
        })?;
    }
    m.pool.release(s);
    m.pool.release(t);
    Ok(())
}

/// `noise3*`: pops a point.
pub(crate) fn noise3(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let p = m.stack.pop()?;
    let (class, n) = result_shape(m);
    {
        let pv = p.value.borrow();
        let pt = pv.triples()?;
        push_noise_result(m, kind, class, n, |i| *pt.at(i))?;
    }
    m.pool.release(p);
    Ok(())
}

fn push_cellnoise_result(
    m: &mut Machine<'_>,
    kind: VarType,
    class: StorageClass,
    n: usize,
    sample: impl Fn(usize) -> V3,
) -> RunResult<()> {
    let out = m.pool.get_temporary(kind, class, m.npoints);
    {
        let mut ov = out.borrow_mut();
        match kind {
            VarType::Float => {
                let of = ov.floats_mut()?;
                for i in 0..n {
                    of.set_at(i, rng::cell_noise(sample(i), 0));
                }
            }
            _ => {
                let ot = ov.triples_mut()?;
                for i in 0..n {
                    ot.set_at(i, rng::cell_noise_v3(sample(i)));
                }
            }
        }
    }
    m.stack.push(out);
    Ok(())
}

pub(crate) fn cellnoise1(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    {
        let av = a.value.borrow();
        let af = av.floats()?;
        push_cellnoise_result(m, kind, class, n, |i| V3::new(*af.at(i), 0.0, 0.0))?;
    }
    m.pool.release(a);
    Ok(())
}

pub(crate) fn cellnoise3(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let p = m.stack.pop()?;
    let (class, n) = result_shape(m);
    {
        let pv = p.value.borrow();
        let pt = pv.triples()?;
        push_cellnoise_result(m, kind, class, n, |i| *pt.at(i))?;
    }
    m.pool.release(p);
    Ok(())
}

/// `pnoise1f`: pops the period, then the coordinate.
pub(crate) fn pnoise1(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let period = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let prv = period.value.borrow();
        let af = av.floats()?;
        let pf = prv.floats()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            let p = V3::new(*af.at(i), 0.0, 0.0);
            let per = V3::new(*pf.at(i), 1.0, 1.0);
            of.set_at(i, rng::periodic_noise(p, per, 0));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(period);
    Ok(())
}

/// `pnoise3f`: pops the period point, then the sample point.
pub(crate) fn pnoise3(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let period = m.stack.pop()?;
    let p = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let pv = p.value.borrow();
        let prv = period.value.borrow();
        let pt = pv.triples()?;
        let prt = prv.triples()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, rng::periodic_noise(*pt.at(i), *prt.at(i), 0));
        }
    }
    m.stack.push(out);
    m.pool.release(p);
    m.pool.release(period);
    Ok(())
}

/// `randomf`: always varying; every point draws from the sequence.
pub(crate) fn random_float(m: &mut Machine<'_>) -> RunResult<()> {
    let out = m
        .pool
        .get_temporary(VarType::Float, StorageClass::Varying, m.npoints);
    {
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..m.npoints {
            let v = m.env.random();
            of.set_at(i, v);
        }
    }
    m.stack.push(out);
    Ok(())
}

/// `randomp` / `randomc`.
pub(crate) fn random_triple(m: &mut Machine<'_>, kind: VarType) -> RunResult<()> {
    let out = m
        .pool
        .get_temporary(kind, StorageClass::Varying, m.npoints);
    {
        let mut ov = out.borrow_mut();
        let ot = ov.triples_mut()?;
        for i in 0..m.npoints {
            let v = V3::new(m.env.random(), m.env.random(), m.env.random());
            ot.set_at(i, v);
        }
    }
    m.stack.push(out);
    Ok(())
}
