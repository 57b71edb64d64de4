//! String opcode handlers.
//!
//! `format`/`printf` take their argument count from the element stream
//! (the shading-language forms are variadic) and substitute `%f`, `%p`,
//! `%c`, `%s`, and `%m` directives per point.

use super::{bool_f, result_shape};
use crate::error::RunResult;
use crate::machine::Machine;
use crate::stack::StackEntry;
use crate::value::ShadingValue;
use tracing::warn;
use umbra_foundation::VarType;

pub(crate) fn concat(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::String, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let astr = av.strings()?;
        let bstr = bv.strings()?;
        let mut ov = out.borrow_mut();
        let ostr = ov.strings_mut()?;
        for i in 0..n {
            ostr.set_at(i, format!("{}{}", astr.at(i), bstr.at(i)));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}

pub(crate) fn compare(m: &mut Machine<'_>, f: impl Fn(&str, &str) -> bool) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let b = m.stack.pop()?;
    let a = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let av = a.value.borrow();
        let bv = b.value.borrow();
        let astr = av.strings()?;
        let bstr = bv.strings()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, bool_f(f(astr.at(i), bstr.at(i))));
        }
    }
    m.stack.push(out);
    m.pool.release(a);
    m.pool.release(b);
    Ok(())
}

/// `match`: pops the subject, then the pattern; answers whether the
/// pattern occurs in the subject.
pub(crate) fn match_substring(m: &mut Machine<'_>) -> RunResult<()> {
    m.stack.clear_varying_flag();
    let subject = m.stack.pop()?;
    let pattern = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::Float, class, m.npoints);
    {
        let sv = subject.value.borrow();
        let pv = pattern.value.borrow();
        let sstr = sv.strings()?;
        let pstr = pv.strings()?;
        let mut ov = out.borrow_mut();
        let of = ov.floats_mut()?;
        for i in 0..n {
            of.set_at(i, bool_f(sstr.at(i).contains(pstr.at(i).as_str())));
        }
    }
    m.stack.push(out);
    m.pool.release(subject);
    m.pool.release(pattern);
    Ok(())
}

/// Render one directive for one argument at one point.
fn render_arg(value: &ShadingValue, i: usize) -> String {
    match value.vtype() {
        VarType::Float => value
            .floats()
            .map(|d| format!("{}", d.at(i)))
            .unwrap_or_default(),
        VarType::String => value
            .strings()
            .map(|d| d.at(i).clone())
            .unwrap_or_default(),
        VarType::Matrix => value
            .matrices()
            .map(|d| format!("{:?}", d.at(i).0))
            .unwrap_or_default(),
        _ => value
            .triples()
            .map(|d| {
                let v = d.at(i);
                format!("{} {} {}", v.x, v.y, v.z)
            })
            .unwrap_or_default(),
    }
}

fn render_pattern(pattern: &str, args: &[StackEntry], point: usize) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut next_arg = 0;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('f') | Some('p') | Some('v') | Some('n') | Some('c') | Some('s') | Some('m') => {
                match args.get(next_arg) {
                    Some(entry) => out.push_str(&render_arg(&entry.value.borrow(), point)),
                    None => warn!("format directive without a matching argument"),
                }
                next_arg += 1;
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// `format <argc>`: pops argc arguments, then the pattern; pushes the
/// substituted string.
pub(crate) fn format(m: &mut Machine<'_>) -> RunResult<()> {
    let argc = m.fetch_format_argc()?;
    m.stack.clear_varying_flag();
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(m.stack.pop()?);
    }
    args.reverse();
    let pattern = m.stack.pop()?;
    let (class, n) = result_shape(m);
    let out = m.pool.get_temporary(VarType::String, class, m.npoints);
    {
        let pv = pattern.value.borrow();
        let pstr = pv.strings()?;
        let mut ov = out.borrow_mut();
        let ostr = ov.strings_mut()?;
        for i in 0..n {
            ostr.set_at(i, render_pattern(pstr.at(i), &args, i));
        }
    }
    m.stack.push(out);
    m.pool.release(pattern);
    for entry in args {
        m.pool.release(entry);
    }
    Ok(())
}

/// `printf <argc>`: like `format`, but routes each active point's line to
/// the environment's message sink and pushes nothing.
pub(crate) fn printf(m: &mut Machine<'_>) -> RunResult<()> {
    let argc = m.fetch_format_argc()?;
    m.stack.clear_varying_flag();
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(m.stack.pop()?);
    }
    args.reverse();
    let pattern = m.stack.pop()?;
    let varying = m.stack.popped_varying();
    {
        let pv = pattern.value.borrow();
        let pstr = pv.strings()?;
        if varying {
            for i in 0..m.npoints {
                if m.run_state.is_active(i) {
                    m.env.message(&render_pattern(pstr.at(i), &args, i));
                }
            }
        } else if m.run_state.any_active() {
            m.env.message(&render_pattern(pstr.at(0), &args, 0));
        }
    }
    m.pool.release(pattern);
    for entry in args {
        m.pool.release(entry);
    }
    Ok(())
}
