//! Interpreter core.
//!
//! The machine executes one segment of a loaded program over one grid:
//! fetch the next element (which must be an opcode), pull the opcode's
//! statically known operands out of the element stream, and dispatch.
//! Data movement, control flow, and running-state manipulation live here;
//! the computational opcode library lives in [`crate::ops`] and external
//! calls in [`crate::dispatch`].
//!
//! Machine state is `Idle` outside [`Machine::run`] and `Running` inside;
//! a run either completes with an empty operand stack or fails with a
//! [`RuntimeError`] describing the internal inconsistency.

use crate::dispatch;
use crate::env::ShadingEnv;
use crate::error::{RunResult, RuntimeError};
use crate::ops;
use crate::pool::ValuePool;
use crate::program::{Opcode, Program, ProgramElement, VarRef};
use crate::stack::Stack;
use crate::state::RunningState;
use crate::value::ValueRef;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::warn;
use umbra_foundation::{StorageClass, VarType};

/// Which segment of the program to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Init,
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MachineState {
    Idle,
    Running,
}

/// One execution of one program segment over one grid.
pub struct Machine<'a> {
    pub(crate) program: &'a Program,
    elements: &'a [ProgramElement],
    pc: usize,
    state: MachineState,
    pub(crate) stack: Stack,
    pub(crate) pool: &'a mut ValuePool,
    pub(crate) env: &'a mut dyn ShadingEnv,
    pub(crate) locals: &'a [ValueRef],
    pub(crate) run_state: RunningState,
    pub(crate) npoints: usize,
    pub(crate) instance_id: u64,
    pub(crate) initialized_externs: &'a mut HashSet<u16>,
}

impl<'a> Machine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program: &'a Program,
        segment: Segment,
        env: &'a mut dyn ShadingEnv,
        pool: &'a mut ValuePool,
        locals: &'a [ValueRef],
        npoints: usize,
        instance_id: u64,
        initialized_externs: &'a mut HashSet<u16>,
    ) -> Self {
        let elements = match segment {
            Segment::Init => program.init.as_slice(),
            Segment::Code => program.code.as_slice(),
        };
        Self {
            program,
            elements,
            pc: 0,
            state: MachineState::Idle,
            stack: Stack::new(),
            pool,
            env,
            locals,
            run_state: RunningState::new(npoints),
            npoints: npoints.max(1),
            instance_id,
            initialized_externs,
        }
    }

    /// Whether the machine is between runs (no program counter active).
    pub fn is_idle(&self) -> bool {
        self.state == MachineState::Idle
    }

    /// Execute the bound segment to completion.
    pub fn run(&mut self) -> RunResult<()> {
        self.state = MachineState::Running;
        self.pc = 0;
        while self.pc < self.elements.len() {
            let op = match &self.elements[self.pc] {
                ProgramElement::Op(op) => *op,
                other => {
                    return Err(RuntimeError::Internal(format!(
                        "expected opcode at element {}, found {other:?}",
                        self.pc
                    )))
                }
            };
            self.pc += 1;
            self.exec(op)?;
        }
        self.state = MachineState::Idle;

        let depth = self.stack.depth();
        if depth != 0 {
            return Err(RuntimeError::StackImbalance(depth));
        }
        Ok(())
    }

    // --- element stream fetch --------------------------------------------

    fn fetch(&mut self, what: &'static str) -> RunResult<&ProgramElement> {
        let element = self
            .elements
            .get(self.pc)
            .ok_or_else(|| RuntimeError::Internal(format!("missing {what} operand")))?;
        self.pc += 1;
        Ok(element)
    }

    fn fetch_float(&mut self) -> RunResult<f32> {
        match self.fetch("float literal")? {
            ProgramElement::FloatLit(v) => Ok(*v),
            other => Err(RuntimeError::Internal(format!(
                "expected float literal operand, found {other:?}"
            ))),
        }
    }

    fn fetch_int(&mut self) -> RunResult<i32> {
        match self.fetch("integer literal")? {
            ProgramElement::IntLit(v) => Ok(*v),
            other => Err(RuntimeError::Internal(format!(
                "expected integer literal operand, found {other:?}"
            ))),
        }
    }

    fn fetch_string(&mut self) -> RunResult<String> {
        match self.fetch("string literal")? {
            ProgramElement::StringLit(s) => Ok(s.clone()),
            other => Err(RuntimeError::Internal(format!(
                "expected string literal operand, found {other:?}"
            ))),
        }
    }

    fn fetch_varref(&mut self) -> RunResult<VarRef> {
        match self.fetch("variable reference")? {
            ProgramElement::Variable(r) => Ok(*r),
            other => Err(RuntimeError::Internal(format!(
                "expected variable operand, found {other:?}"
            ))),
        }
    }

    fn fetch_label(&mut self) -> RunResult<usize> {
        match self.fetch("label")? {
            ProgramElement::Label(target) => Ok(target.address),
            other => Err(RuntimeError::Internal(format!(
                "expected label operand, found {other:?}"
            ))),
        }
    }

    fn fetch_external(&mut self) -> RunResult<u16> {
        match self.fetch("external descriptor")? {
            ProgramElement::External(index) => Ok(*index),
            other => Err(RuntimeError::Internal(format!(
                "expected external operand, found {other:?}"
            ))),
        }
    }

    /// Argument count carried by `format`/`printf`.
    pub(crate) fn fetch_format_argc(&mut self) -> RunResult<usize> {
        Ok(self.fetch_int()?.max(0) as usize)
    }

    /// Resolve a variable reference to its storage handle.
    pub(crate) fn lookup_var(&self, var: VarRef) -> RunResult<ValueRef> {
        match var {
            VarRef::Local(slot) => self
                .locals
                .get(slot as usize)
                .cloned()
                .ok_or_else(|| RuntimeError::Internal(format!("local slot {slot} out of range"))),
            VarRef::Standard(var) => self
                .env
                .standard(var)
                .ok_or(RuntimeError::MissingGlobal(var.name())),
        }
    }

    // --- dispatch ---------------------------------------------------------

    fn exec(&mut self, op: Opcode) -> RunResult<()> {
        match op {
            // stack and data movement
            Opcode::PushIF => {
                let v = self.fetch_float()?;
                let out = self
                    .pool
                    .get_temporary(VarType::Float, StorageClass::Uniform, 1);
                out.borrow_mut().floats_mut()?.set_at(0, v);
                self.stack.push(out);
            }
            Opcode::PushIS => {
                let s = self.fetch_string()?;
                let out = self
                    .pool
                    .get_temporary(VarType::String, StorageClass::Uniform, 1);
                out.borrow_mut().strings_mut()?.set_at(0, s);
                self.stack.push(out);
            }
            Opcode::PushV => {
                let var = self.fetch_varref()?;
                let value = self.lookup_var(var)?;
                self.stack.push_permanent(value);
            }
            Opcode::IPushV => {
                let var = self.fetch_varref()?;
                let array = self.lookup_var(var)?;
                let index_entry = self.stack.pop()?;
                let index = *index_entry.value.borrow().floats()?.at(0) as isize;
                self.pool.release(index_entry);

                let array_ref = array.borrow();
                let arr = array_ref.as_array()?;
                let count = arr.element_count();
                let clamped = if index < 0 || index as usize >= count {
                    warn!(
                        index,
                        count, "array index out of range on read, clamping"
                    );
                    index.clamp(0, count as isize - 1) as usize
                } else {
                    index as usize
                };
                let element = arr.element(clamped).ok_or_else(|| {
                    RuntimeError::Internal("array has no elements".to_string())
                })?;
                drop(array_ref);
                self.stack.push_permanent(element);
            }
            Opcode::Pop => {
                let var = self.fetch_varref()?;
                let dst = self.lookup_var(var)?;
                let entry = self.stack.pop()?;
                self.store(&dst, &entry.value)?;
                self.pool.release(entry);
            }
            Opcode::IPop => {
                let var = self.fetch_varref()?;
                let array = self.lookup_var(var)?;
                let index_entry = self.stack.pop()?;
                let index = *index_entry.value.borrow().floats()?.at(0) as isize;
                self.pool.release(index_entry);
                let entry = self.stack.pop()?;

                let element = {
                    let array_ref = array.borrow();
                    let arr = array_ref.as_array()?;
                    if index < 0 || index as usize >= arr.element_count() {
                        warn!(
                            index,
                            count = arr.element_count(),
                            "array index out of range on write, skipping"
                        );
                        None
                    } else {
                        arr.element(index as usize)
                    }
                };
                if let Some(element) = element {
                    self.store(&element, &entry.value)?;
                }
                self.pool.release(entry);
            }
            Opcode::Dup => {
                let entry = self.stack.pop()?;
                let (vtype, class) = {
                    let v = entry.value.borrow();
                    if v.as_array().is_ok() {
                        return Err(RuntimeError::Internal(
                            "cannot duplicate an array value".to_string(),
                        ));
                    }
                    (v.vtype(), v.class())
                };
                let copy = self.pool.get_temporary(vtype, class, self.npoints);
                copy.borrow_mut().set_from(&entry.value.borrow())?;
                self.stack.push_entry(entry);
                self.stack.push(copy);
            }
            Opcode::Drop => {
                let entry = self.stack.pop()?;
                self.pool.release(entry);
            }
            Opcode::Nop => {}

            // control flow
            Opcode::Jmp => {
                let target = self.fetch_label()?;
                self.pc = target;
            }
            Opcode::Jz => {
                let target = self.fetch_label()?;
                if self.pop_condition_unanimous(false)? {
                    self.pc = target;
                }
            }
            Opcode::Jnz => {
                let target = self.fetch_label()?;
                if self.pop_condition_unanimous(true)? {
                    self.pc = target;
                }
            }
            Opcode::RsJz => {
                let target = self.fetch_label()?;
                if !self.run_state.any_active() {
                    self.pc = target;
                }
            }
            Opcode::RsJnz => {
                let target = self.fetch_label()?;
                if self.run_state.any_active() {
                    self.pc = target;
                }
            }

            // running state
            Opcode::RsPush => self.run_state.push(),
            Opcode::RsPop => self.run_state.pop()?,
            Opcode::RsGet => {
                let entry = self.stack.pop()?;
                {
                    let value = entry.value.borrow();
                    let floats = value.floats()?;
                    self.run_state.get(|i| *floats.at(i) != 0.0);
                }
                self.pool.release(entry);
            }
            Opcode::RsInverse => self.run_state.invert(),
            Opcode::RsBreak => {
                let depth = self.fetch_int()?;
                self.run_state.break_out(depth.max(0) as usize);
            }
            Opcode::SClear => self.run_state.clear(),

            // external dispatch
            Opcode::External => {
                let index = self.fetch_external()?;
                dispatch::call_external(self, index)?;
            }

            // computational opcode library
            other => ops::exec(self, other)?,
        }
        Ok(())
    }

    /// Store a value into a destination variable, touching only
    /// mask-active points. A store of a variable into itself is a no-op.
    fn store(&mut self, dst: &ValueRef, src: &ValueRef) -> RunResult<()> {
        if Rc::ptr_eq(dst, src) {
            return Ok(());
        }
        let src_ref = src.borrow();
        let mut dst_ref = dst.borrow_mut();
        dst_ref.copy_from(&src_ref, Some(self.run_state.mask()))
    }

    /// Pop a condition and report whether every active point agrees with
    /// `want_nonzero`. Divergent conditions do not branch; the mask stack
    /// handles them.
    fn pop_condition_unanimous(&mut self, want_nonzero: bool) -> RunResult<bool> {
        let entry = self.stack.pop()?;
        let unanimous = {
            let value = entry.value.borrow();
            let floats = value.floats()?;
            if value.is_varying() {
                let mut agree = true;
                let mut any = false;
                for i in 0..self.npoints {
                    if self.run_state.is_active(i) {
                        any = true;
                        if (*floats.at(i) != 0.0) != want_nonzero {
                            agree = false;
                            break;
                        }
                    }
                }
                any && agree
            } else {
                (*floats.at(0) != 0.0) == want_nonzero
            }
        };
        self.pool.release(entry);
        Ok(unanimous)
    }
}
