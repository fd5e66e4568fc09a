//! Bytecode instruction builder.
//!
//! The builder tracks the verification frame (local slots and operand
//! stack) while instructions are appended, so StackMapTable entries fall
//! out of ordinary emission: every label that is the target of a jump or
//! an exception handler records a FULL_FRAME at bind time. Forward jump
//! offsets are patched when the method is finished.

use crate::emit::classfile::{CodeAttribute, ConstantPool, ExceptionEntry};
use crate::error::{CompileError, CompileResult};
use crate::types::JvmType;

/// Verification type of one slot or stack entry.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object(String),
    /// A `new`-ed object before its constructor ran, tagged with the pc
    /// of the `new` instruction.
    Uninitialized(u32),
}

impl VerifType {
    pub fn of(ty: &JvmType) -> VerifType {
        match ty {
            JvmType::Boolean
            | JvmType::Byte
            | JvmType::Char
            | JvmType::Short
            | JvmType::Int => VerifType::Integer,
            JvmType::Float => VerifType::Float,
            JvmType::Long => VerifType::Long,
            JvmType::Double => VerifType::Double,
            JvmType::Void => VerifType::Top,
            JvmType::Reference(name) => VerifType::Object(name.clone()),
            JvmType::Array(_) => VerifType::Object(ty.descriptor()),
        }
    }

    fn slots(&self) -> u16 {
        match self {
            VerifType::Long | VerifType::Double => 2,
            _ => 1,
        }
    }
}

/// A frame snapshot: slot-indexed locals (wide types followed by `Top`)
/// and the operand stack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub locals: Vec<VerifType>,
    pub stack: Vec<VerifType>,
}

/// Comparison conditions for conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    fn offset(self) -> u8 {
        match self {
            Cond::Eq => 0,
            Cond::Ne => 1,
            Cond::Lt => 2,
            Cond::Ge => 3,
            Cond::Gt => 4,
            Cond::Le => 5,
        }
    }

    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }
}

/// Ways a method can be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoke {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelState {
    pc: Option<u32>,
    frame: Option<Frame>,
    referenced: bool,
}

#[derive(Debug)]
struct Fixup {
    /// Position of the 2-byte offset within the code array.
    at: usize,
    /// Pc of the branch opcode the offset is relative to.
    opcode_pc: u32,
    label: Label,
}

#[derive(Debug)]
struct Region {
    start_pc: u16,
    end_pc: u16,
    handler: Label,
    catch_class: Option<String>,
}

#[derive(Debug)]
pub struct CodeBuilder {
    code: Vec<u8>,
    frame: Frame,
    stack_slots: u16,
    max_stack: u16,
    max_locals: u16,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    frames: Vec<(u32, Frame)>,
    regions: Vec<Region>,
    reachable: bool,
}

impl CodeBuilder {
    /// Start a method body. `params` seeds the frame with the receiver
    /// (when present) and parameter slots.
    pub fn new(params: Vec<VerifType>) -> Self {
        let mut locals = Vec::new();
        for p in params {
            let wide = p.slots() == 2;
            locals.push(p);
            if wide {
                locals.push(VerifType::Top);
            }
        }
        let max_locals = locals.len() as u16;
        Self {
            code: Vec::new(),
            frame: Frame {
                locals,
                stack: Vec::new(),
            },
            stack_slots: 0,
            max_stack: 0,
            max_locals,
            labels: Vec::new(),
            fixups: Vec::new(),
            frames: Vec::new(),
            regions: Vec::new(),
            reachable: true,
        }
    }

    pub fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn locals(&self) -> &[VerifType] {
        &self.frame.locals
    }

    pub fn stack_height(&self) -> usize {
        self.frame.stack.len()
    }

    // ----- frame bookkeeping -----

    fn push_t(&mut self, vt: VerifType) {
        self.stack_slots += vt.slots();
        if self.stack_slots > self.max_stack {
            self.max_stack = self.stack_slots;
        }
        self.frame.stack.push(vt);
    }

    fn pop_t(&mut self) -> VerifType {
        let vt = self.frame.stack.pop().unwrap_or(VerifType::Top);
        self.stack_slots -= vt.slots();
        vt
    }

    fn set_local(&mut self, slot: u16, vt: VerifType) {
        let wide = vt.slots() == 2;
        let needed = slot as usize + if wide { 2 } else { 1 };
        if self.frame.locals.len() < needed {
            self.frame.locals.resize(needed, VerifType::Top);
        }
        self.frame.locals[slot as usize] = vt;
        if wide {
            self.frame.locals[slot as usize + 1] = VerifType::Top;
        }
        if needed as u16 > self.max_locals {
            self.max_locals = needed as u16;
        }
    }

    /// Mark every slot at or past `from_slot` dead. Called when a
    /// lexical scope ends so reused sibling slots never collide in a
    /// merged frame.
    pub fn retire_locals(&mut self, from_slot: u16) {
        for slot in self.frame.locals.iter_mut().skip(from_slot as usize) {
            *slot = VerifType::Top;
        }
        while self.frame.locals.last() == Some(&VerifType::Top) {
            self.frame.locals.pop();
        }
    }

    fn byte(&mut self, b: u8) {
        self.code.push(b);
    }

    fn u16_arg(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_be_bytes());
    }

    // ----- labels and control flow -----

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() - 1)
    }

    fn merge_into_label(&mut self, label: Label) {
        let frame = self.frame.clone();
        let state = &mut self.labels[label.0];
        state.referenced = true;
        match &mut state.frame {
            None => state.frame = Some(frame),
            Some(existing) => merge_frames(existing, &frame),
        }
        // A branch to an already-bound label is backward; the bound pc
        // needs a recorded frame.
        let bound_pc = state.pc;
        if let Some(pc) = bound_pc {
            let merged = state.frame.clone().unwrap_or_default();
            match self.frames.iter_mut().find(|(p, _)| *p == pc) {
                Some(entry) => entry.1 = merged,
                None => self.frames.push((pc, merged)),
            }
        }
    }

    /// Bind a label at the current pc. A referenced label records a
    /// stack map frame here and makes the point reachable again.
    pub fn bind(&mut self, label: Label) {
        let pc = self.pc();
        let state = &self.labels[label.0];
        debug_assert!(state.pc.is_none(), "label bound twice");
        if state.referenced {
            if self.reachable {
                // Fallthrough edge joins the recorded jumps.
                self.merge_into_label(label);
            }
            let merged = self.labels[label.0]
                .frame
                .clone()
                .unwrap_or_else(|| self.frame.clone());
            self.frame = merged.clone();
            self.stack_slots = merged.stack.iter().map(VerifType::slots).sum();
            self.reachable = true;
            if self.frames.last().map(|(p, _)| *p) != Some(pc) {
                self.frames.push((pc, merged));
            }
        } else if self.reachable {
            // Unreferenced so far; keep the frame at the bind point as
            // the baseline for any later backward branch.
            self.labels[label.0].frame = Some(self.frame.clone());
        }
        self.labels[label.0].pc = Some(pc);
    }

    fn emit_branch(&mut self, opcode: u8, label: Label) {
        let opcode_pc = self.pc();
        self.byte(opcode);
        self.fixups.push(Fixup {
            at: self.code.len(),
            opcode_pc,
            label,
        });
        self.u16_arg(0);
        self.merge_into_label(label);
    }

    /// `ifeq` family: consumes one int.
    pub fn jump_if(&mut self, cond: Cond, label: Label) {
        if !self.reachable {
            return;
        }
        self.pop_t();
        self.emit_branch(0x99 + cond.offset(), label);
    }

    /// `if_icmp` family: consumes two ints.
    pub fn jump_if_icmp(&mut self, cond: Cond, label: Label) {
        if !self.reachable {
            return;
        }
        self.pop_t();
        self.pop_t();
        self.emit_branch(0x9F + cond.offset(), label);
    }

    /// `if_acmpeq` / `if_acmpne`: consumes two references.
    pub fn jump_if_acmp(&mut self, equal: bool, label: Label) {
        if !self.reachable {
            return;
        }
        self.pop_t();
        self.pop_t();
        self.emit_branch(if equal { 0xA5 } else { 0xA6 }, label);
    }

    pub fn jump_if_null(&mut self, label: Label) {
        if !self.reachable {
            return;
        }
        self.pop_t();
        self.emit_branch(0xC6, label);
    }

    pub fn jump_if_nonnull(&mut self, label: Label) {
        if !self.reachable {
            return;
        }
        self.pop_t();
        self.emit_branch(0xC7, label);
    }

    pub fn goto(&mut self, label: Label) {
        if !self.reachable {
            return;
        }
        self.emit_branch(0xA7, label);
        self.reachable = false;
    }

    // ----- constants -----

    pub fn push_int(&mut self, pool: &mut ConstantPool, value: i32) {
        if !self.reachable {
            return;
        }
        match value {
            -1..=5 => self.byte((3 + value) as u8),
            -128..=127 => {
                self.byte(0x10);
                self.byte(value as i8 as u8);
            }
            -32768..=32767 => {
                self.byte(0x11);
                self.u16_arg(value as i16 as u16);
            }
            _ => {
                let idx = pool.integer(value);
                self.ldc(idx);
            }
        }
        self.push_t(VerifType::Integer);
    }

    pub fn push_long(&mut self, pool: &mut ConstantPool, value: i64) {
        if !self.reachable {
            return;
        }
        match value {
            0 => self.byte(0x09),
            1 => self.byte(0x0A),
            _ => {
                let idx = pool.long(value);
                self.byte(0x14);
                self.u16_arg(idx);
            }
        }
        self.push_t(VerifType::Long);
    }

    pub fn push_float(&mut self, pool: &mut ConstantPool, value: f32) {
        if !self.reachable {
            return;
        }
        if value == 0.0 && value.is_sign_positive() {
            self.byte(0x0B);
        } else if value == 1.0 {
            self.byte(0x0C);
        } else if value == 2.0 {
            self.byte(0x0D);
        } else {
            let idx = pool.float(value);
            self.ldc(idx);
        }
        self.push_t(VerifType::Float);
    }

    pub fn push_double(&mut self, pool: &mut ConstantPool, value: f64) {
        if !self.reachable {
            return;
        }
        if value == 0.0 && value.is_sign_positive() {
            self.byte(0x0E);
        } else if value == 1.0 {
            self.byte(0x0F);
        } else {
            let idx = pool.double(value);
            self.byte(0x14);
            self.u16_arg(idx);
        }
        self.push_t(VerifType::Double);
    }

    pub fn push_string(&mut self, pool: &mut ConstantPool, value: &str) {
        if !self.reachable {
            return;
        }
        let idx = pool.string(value);
        self.ldc(idx);
        self.push_t(VerifType::Object(crate::types::STRING.to_string()));
    }

    pub fn push_null(&mut self) {
        if !self.reachable {
            return;
        }
        self.byte(0x01);
        self.push_t(VerifType::Null);
    }

    /// `ldc` of a class constant.
    pub fn push_class(&mut self, pool: &mut ConstantPool, name: &str) {
        if !self.reachable {
            return;
        }
        let idx = pool.class(name);
        self.ldc(idx);
        self.push_t(VerifType::Object("java/lang/Class".to_string()));
    }

    fn ldc(&mut self, idx: u16) {
        if idx < 256 {
            self.byte(0x12);
            self.byte(idx as u8);
        } else {
            self.byte(0x13);
            self.u16_arg(idx);
        }
    }

    // ----- locals -----

    pub fn load_local(&mut self, slot: u16, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        let (base, short_base) = match ty {
            JvmType::Long => (0x16, 0x1E),
            JvmType::Float => (0x17, 0x22),
            JvmType::Double => (0x18, 0x26),
            t if t.is_reference() => (0x19, 0x2A),
            _ => (0x15, 0x1A),
        };
        self.local_op(base, short_base, slot);
        // The slot may hold a more precise type than the static one.
        let vt = self
            .frame
            .locals
            .get(slot as usize)
            .cloned()
            .filter(|vt| *vt != VerifType::Top)
            .unwrap_or_else(|| VerifType::of(ty));
        self.push_t(vt);
    }

    pub fn store_local(&mut self, slot: u16, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        let vt = self.pop_t();
        let (base, short_base) = match ty {
            JvmType::Long => (0x37, 0x3F),
            JvmType::Float => (0x38, 0x43),
            JvmType::Double => (0x39, 0x47),
            t if t.is_reference() => (0x3A, 0x4B),
            _ => (0x36, 0x3B),
        };
        self.local_op(base, short_base, slot);
        let stored = if vt == VerifType::Null && ty.is_reference() {
            VerifType::of(ty)
        } else {
            vt
        };
        self.set_local(slot, stored);
    }

    fn local_op(&mut self, base: u8, short_base: u8, slot: u16) {
        if slot < 4 {
            self.byte(short_base + slot as u8);
        } else if slot < 256 {
            self.byte(base);
            self.byte(slot as u8);
        } else {
            self.byte(0xC4); // wide
            self.byte(base);
            self.u16_arg(slot);
        }
    }

    pub fn iinc(&mut self, slot: u16, delta: i16) {
        if !self.reachable {
            return;
        }
        if slot < 256 && (-128..=127).contains(&delta) {
            self.byte(0x84);
            self.byte(slot as u8);
            self.byte(delta as i8 as u8);
        } else {
            self.byte(0xC4);
            self.byte(0x84);
            self.u16_arg(slot);
            self.u16_arg(delta as u16);
        }
    }

    // ----- stack shuffles -----

    pub fn pop_value(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.byte(if ty.is_wide() { 0x58 } else { 0x57 });
        self.pop_t();
    }

    pub fn dup(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.byte(if ty.is_wide() { 0x5C } else { 0x59 });
        let top = self.frame.stack.last().cloned().unwrap_or(VerifType::Top);
        self.push_t(top);
    }

    /// `dup_x1` / `dup2_x1`: duplicate the top value beneath the one
    /// below it.
    pub fn dup_under(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.byte(if ty.is_wide() { 0x5D } else { 0x5A });
        let top = self.pop_t();
        let under = self.pop_t();
        self.push_t(top.clone());
        self.push_t(under);
        self.push_t(top);
    }

    /// `dup_x2` / `dup2_x2`: duplicate the top value beneath the two
    /// below it.
    pub fn dup_under2(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.byte(if ty.is_wide() { 0x5E } else { 0x5B });
        let top = self.pop_t();
        let b = self.pop_t();
        let c = self.pop_t();
        self.push_t(top.clone());
        self.push_t(c);
        self.push_t(b);
        self.push_t(top);
    }

    pub fn swap(&mut self) {
        if !self.reachable {
            return;
        }
        self.byte(0x5F);
        let a = self.pop_t();
        let b = self.pop_t();
        self.push_t(a);
        self.push_t(b);
    }

    // ----- arithmetic -----

    fn typed_op(&mut self, base: u8, ty: &JvmType) {
        let offset = match ty {
            JvmType::Long => 1,
            JvmType::Float => 2,
            JvmType::Double => 3,
            _ => 0,
        };
        self.byte(base + offset);
    }

    fn binary_op(&mut self, base: u8, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.typed_op(base, ty);
        self.pop_t();
        self.pop_t();
        self.push_t(VerifType::of(ty));
    }

    pub fn add(&mut self, ty: &JvmType) {
        self.binary_op(0x60, ty);
    }

    pub fn sub(&mut self, ty: &JvmType) {
        self.binary_op(0x64, ty);
    }

    pub fn mul(&mut self, ty: &JvmType) {
        self.binary_op(0x68, ty);
    }

    pub fn div(&mut self, ty: &JvmType) {
        self.binary_op(0x6C, ty);
    }

    pub fn rem(&mut self, ty: &JvmType) {
        self.binary_op(0x70, ty);
    }

    pub fn neg(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.typed_op(0x74, ty);
    }

    /// Shifts take an int shift amount regardless of the value type.
    fn shift_op(&mut self, int_op: u8, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        self.byte(if *ty == JvmType::Long {
            int_op + 1
        } else {
            int_op
        });
        self.pop_t();
    }

    pub fn shl(&mut self, ty: &JvmType) {
        self.shift_op(0x78, ty);
    }

    pub fn shr(&mut self, ty: &JvmType) {
        self.shift_op(0x7A, ty);
    }

    pub fn ushr(&mut self, ty: &JvmType) {
        self.shift_op(0x7C, ty);
    }

    pub fn bit_and(&mut self, ty: &JvmType) {
        self.binary_op(0x7E, ty);
    }

    pub fn bit_or(&mut self, ty: &JvmType) {
        self.binary_op(0x80, ty);
    }

    pub fn bit_xor(&mut self, ty: &JvmType) {
        self.binary_op(0x82, ty);
    }

    /// `lcmp` / `fcmpl` / `dcmpl`: collapse a wide comparison to an int.
    pub fn compare(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        match ty {
            JvmType::Long => self.byte(0x94),
            JvmType::Float => self.byte(0x95),
            JvmType::Double => self.byte(0x97),
            _ => return,
        }
        self.pop_t();
        self.pop_t();
        self.push_t(VerifType::Integer);
    }

    /// Numeric conversion between primitive types. No-op when the
    /// computational types already agree.
    pub fn convert(&mut self, from: &JvmType, to: &JvmType) {
        if !self.reachable {
            return;
        }
        let kind = |t: &JvmType| match t {
            JvmType::Long => 1u8,
            JvmType::Float => 2,
            JvmType::Double => 3,
            _ => 0,
        };
        let (f, t) = (kind(from), kind(to));
        if f != t {
            // i2l..i2d 0x85.., l2i.. 0x88.., f2i.. 0x8B.., d2i.. 0x8E..
            let base = 0x85 + f * 3;
            let offset = if t < f { t } else { t - 1 };
            self.byte(base + offset);
            self.pop_t();
            self.push_t(VerifType::of(to));
        }
        // Narrowing to a sub-int type truncates in place.
        if t == 0 {
            match to {
                JvmType::Byte | JvmType::Boolean => self.byte(0x91),
                JvmType::Char => self.byte(0x92),
                JvmType::Short => self.byte(0x93),
                _ => {}
            }
        }
    }

    // ----- objects and calls -----

    pub fn new_object(&mut self, pool: &mut ConstantPool, class: &str) {
        if !self.reachable {
            return;
        }
        let pc = self.pc();
        let idx = pool.class(class);
        self.byte(0xBB);
        self.u16_arg(idx);
        self.push_t(VerifType::Uninitialized(pc));
    }

    /// `invokespecial <init>` on an uninitialized receiver; every copy
    /// of the token on the stack becomes an initialized reference.
    pub fn invoke_init(&mut self, pool: &mut ConstantPool, class: &str, params: &[JvmType]) {
        if !self.reachable {
            return;
        }
        let descriptor = method_descriptor(params, &JvmType::Void);
        let idx = pool.method_ref(class, "<init>", &descriptor);
        self.byte(0xB7);
        self.u16_arg(idx);
        for _ in params {
            self.pop_t();
        }
        let token = self.pop_t();
        for entry in self.frame.stack.iter_mut() {
            if *entry == token {
                *entry = VerifType::Object(class.to_string());
            }
        }
    }

    /// `super()` inside a constructor: invokespecial on the superclass
    /// `<init>` with `uninitializedThis` as the receiver. Afterwards the
    /// receiver is typed as the class under construction, everywhere it
    /// appears.
    pub fn invoke_super_init(
        &mut self,
        pool: &mut ConstantPool,
        super_class: &str,
        this_class: &str,
        params: &[JvmType],
    ) {
        if !self.reachable {
            return;
        }
        let descriptor = method_descriptor(params, &JvmType::Void);
        let idx = pool.method_ref(super_class, "<init>", &descriptor);
        self.byte(0xB7);
        self.u16_arg(idx);
        for _ in params {
            self.pop_t();
        }
        self.pop_t();
        let initialized = VerifType::Object(this_class.to_string());
        for entry in self.frame.stack.iter_mut() {
            if *entry == VerifType::UninitializedThis {
                *entry = initialized.clone();
            }
        }
        for entry in self.frame.locals.iter_mut() {
            if *entry == VerifType::UninitializedThis {
                *entry = initialized.clone();
            }
        }
    }

    pub fn invoke(
        &mut self,
        pool: &mut ConstantPool,
        kind: Invoke,
        owner: &str,
        name: &str,
        params: &[JvmType],
        ret: &JvmType,
    ) {
        if !self.reachable {
            return;
        }
        let descriptor = method_descriptor(params, ret);
        match kind {
            Invoke::Interface => {
                let idx = pool.interface_method_ref(owner, name, &descriptor);
                let count: u16 = 1 + params.iter().map(|p| p.slot_width()).sum::<u16>();
                self.byte(0xB9);
                self.u16_arg(idx);
                self.byte(count as u8);
                self.byte(0);
            }
            _ => {
                let idx = pool.method_ref(owner, name, &descriptor);
                self.byte(match kind {
                    Invoke::Virtual => 0xB6,
                    Invoke::Special => 0xB7,
                    _ => 0xB8,
                });
                self.u16_arg(idx);
            }
        }
        for _ in params {
            self.pop_t();
        }
        if kind != Invoke::Static {
            self.pop_t();
        }
        if *ret != JvmType::Void {
            self.push_t(VerifType::of(ret));
        }
    }

    pub fn get_field(&mut self, pool: &mut ConstantPool, owner: &str, name: &str, ty: &JvmType, is_static: bool) {
        if !self.reachable {
            return;
        }
        let idx = pool.field_ref(owner, name, &ty.descriptor());
        if is_static {
            self.byte(0xB2);
        } else {
            self.byte(0xB4);
            self.pop_t();
        }
        self.u16_arg(idx);
        self.push_t(VerifType::of(ty));
    }

    pub fn put_field(&mut self, pool: &mut ConstantPool, owner: &str, name: &str, ty: &JvmType, is_static: bool) {
        if !self.reachable {
            return;
        }
        let idx = pool.field_ref(owner, name, &ty.descriptor());
        if is_static {
            self.byte(0xB3);
            self.pop_t();
        } else {
            self.byte(0xB5);
            self.pop_t();
            self.pop_t();
        }
        self.u16_arg(idx);
    }

    pub fn checkcast(&mut self, pool: &mut ConstantPool, class: &str) {
        if !self.reachable {
            return;
        }
        let idx = pool.class(class);
        self.byte(0xC0);
        self.u16_arg(idx);
        self.pop_t();
        self.push_t(VerifType::Object(class.to_string()));
    }

    pub fn anewarray(&mut self, pool: &mut ConstantPool, elem_class: &str) {
        if !self.reachable {
            return;
        }
        let idx = pool.class(elem_class);
        self.byte(0xBD);
        self.u16_arg(idx);
        self.pop_t();
        self.push_t(VerifType::Object(format!("[L{elem_class};")));
    }

    pub fn array_store_ref(&mut self) {
        if !self.reachable {
            return;
        }
        self.byte(0x53); // aastore
        self.pop_t();
        self.pop_t();
        self.pop_t();
    }

    pub fn array_length(&mut self) {
        if !self.reachable {
            return;
        }
        self.byte(0xBE);
        self.pop_t();
        self.push_t(VerifType::Integer);
    }

    pub fn athrow(&mut self) {
        if !self.reachable {
            return;
        }
        self.byte(0xBF);
        self.pop_t();
        self.reachable = false;
    }

    pub fn ret(&mut self, ty: &JvmType) {
        if !self.reachable {
            return;
        }
        match ty {
            JvmType::Void => self.byte(0xB1),
            JvmType::Long => {
                self.byte(0xAD);
                self.pop_t();
            }
            JvmType::Float => {
                self.byte(0xAE);
                self.pop_t();
            }
            JvmType::Double => {
                self.byte(0xAF);
                self.pop_t();
            }
            t if t.is_reference() => {
                self.byte(0xB0);
                self.pop_t();
            }
            _ => {
                self.byte(0xAC);
                self.pop_t();
            }
        }
        self.reachable = false;
    }

    // ----- exception regions -----

    /// Register a try region. The handler label's frame must be set via
    /// [`CodeBuilder::set_handler_frame`] before the method finishes.
    pub fn add_exception_region(
        &mut self,
        start_pc: u32,
        end_pc: u32,
        handler: Label,
        catch_class: Option<String>,
    ) {
        self.labels[handler.0].referenced = true;
        self.regions.push(Region {
            start_pc: start_pc as u16,
            end_pc: end_pc as u16,
            handler,
            catch_class,
        });
    }

    /// Seed a handler label with its entry frame: the locals visible at
    /// the try entry plus the thrown exception on the stack.
    pub fn set_handler_frame(&mut self, handler: Label, locals: Vec<VerifType>, exception_class: &str) {
        self.labels[handler.0].referenced = true;
        self.labels[handler.0].frame = Some(Frame {
            locals,
            stack: vec![VerifType::Object(exception_class.to_string())],
        });
    }

    // ----- finish -----

    pub fn finish(mut self, pool: &mut ConstantPool) -> CompileResult<CodeAttribute> {
        if self.code.len() > u16::MAX as usize {
            return Err(CompileError::internal("method body exceeds 65535 bytes"));
        }
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .pc
                .ok_or_else(|| CompileError::internal("branch to an unbound label"))?;
            let delta = target as i64 - fixup.opcode_pc as i64;
            let delta = i16::try_from(delta)
                .map_err(|_| CompileError::internal("jump offset exceeds 16 bits"))?;
            self.code[fixup.at..fixup.at + 2].copy_from_slice(&delta.to_be_bytes());
        }

        let mut exceptions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let handler_pc = self.labels[region.handler.0]
                .pc
                .ok_or_else(|| CompileError::internal("exception handler not bound"))?;
            let catch_type = match &region.catch_class {
                Some(class) => pool.class(class),
                None => 0,
            };
            exceptions.push(ExceptionEntry {
                start_pc: region.start_pc,
                end_pc: region.end_pc,
                handler_pc: handler_pc as u16,
                catch_type,
            });
        }

        let stack_map = serialize_stack_map(&self.frames, pool);
        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: self.code,
            exceptions,
            stack_map,
        })
    }
}

/// Pointwise merge of two frames reaching the same point. Disagreeing
/// local slots degrade to `Top`; stacks must agree by construction.
fn merge_frames(into: &mut Frame, other: &Frame) {
    let len = into.locals.len().min(other.locals.len());
    into.locals.truncate(len);
    for (slot, theirs) in into.locals.iter_mut().zip(&other.locals) {
        if slot != theirs {
            let null_merge = match (&slot, theirs) {
                (VerifType::Null, VerifType::Object(name)) => Some(VerifType::Object(name.clone())),
                (VerifType::Object(_), VerifType::Null) => None,
                _ => Some(VerifType::Top),
            };
            if let Some(merged) = null_merge {
                *slot = merged;
            }
        }
    }
    while into.locals.last() == Some(&VerifType::Top) {
        into.locals.pop();
    }
}

fn serialize_stack_map(frames: &[(u32, Frame)], pool: &mut ConstantPool) -> Option<(u16, Vec<u8>)> {
    if frames.is_empty() {
        return None;
    }
    let mut sorted: Vec<&(u32, Frame)> = frames.iter().collect();
    sorted.sort_by_key(|(pc, _)| *pc);
    sorted.dedup_by_key(|(pc, _)| *pc);

    let mut out = Vec::new();
    let mut count = 0u16;
    let mut prev: Option<u32> = None;
    for (pc, frame) in sorted {
        let delta = match prev {
            None => *pc,
            Some(p) => pc - p - 1,
        };
        prev = Some(*pc);
        out.push(255); // FULL_FRAME
        out.extend_from_slice(&(delta as u16).to_be_bytes());
        write_verif_list(&mut out, collapse_locals(&frame.locals), pool);
        write_verif_list(&mut out, frame.stack.clone(), pool);
        count += 1;
    }
    Some((count, out))
}

/// Frame locals collapse wide entries: a long or double is one
/// verification entry even though it fills two slots.
fn collapse_locals(locals: &[VerifType]) -> Vec<VerifType> {
    let mut out = Vec::with_capacity(locals.len());
    let mut i = 0;
    while i < locals.len() {
        let vt = locals[i].clone();
        let wide = vt.slots() == 2;
        out.push(vt);
        i += if wide { 2 } else { 1 };
    }
    out
}

fn write_verif_list(out: &mut Vec<u8>, list: Vec<VerifType>, pool: &mut ConstantPool) {
    out.extend_from_slice(&(list.len() as u16).to_be_bytes());
    for vt in list {
        match vt {
            VerifType::Top => out.push(0),
            VerifType::Integer => out.push(1),
            VerifType::Float => out.push(2),
            VerifType::Double => out.push(3),
            VerifType::Long => out.push(4),
            VerifType::Null => out.push(5),
            VerifType::UninitializedThis => out.push(6),
            VerifType::Object(name) => {
                let idx = pool.class(&name);
                out.push(7);
                out.extend_from_slice(&idx.to_be_bytes());
            }
            VerifType::Uninitialized(pc) => {
                out.push(8);
                out.extend_from_slice(&(pc as u16).to_be_bytes());
            }
        }
    }
}

/// Build a method descriptor from parameter and return types.
pub fn method_descriptor(params: &[JvmType], ret: &JvmType) -> String {
    let mut out = String::from("(");
    for p in params {
        out.push_str(&p.descriptor());
    }
    out.push(')');
    out.push_str(&ret.descriptor());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_42() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_int(&mut pool, 42);
        code.ret(&JvmType::Int);
        let attr = code.finish(&mut pool).unwrap();
        // bipush 42, ireturn
        assert_eq!(attr.code, vec![0x10, 42, 0xAC]);
        assert_eq!(attr.max_stack, 1);
        assert!(attr.stack_map.is_none());
    }

    #[test]
    fn test_small_int_forms() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_int(&mut pool, -1);
        code.push_int(&mut pool, 5);
        code.push_int(&mut pool, 1000);
        code.push_int(&mut pool, 100_000);
        assert_eq!(code.code[0], 0x02); // iconst_m1
        assert_eq!(code.code[1], 0x08); // iconst_5
        assert_eq!(code.code[2], 0x11); // sipush
        assert_eq!(code.code[5], 0x12); // ldc
    }

    #[test]
    fn test_branch_patching() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        let end = code.new_label();
        code.push_int(&mut pool, 1);
        code.jump_if(Cond::Eq, end); // pc 1, 3 bytes
        code.push_int(&mut pool, 2);
        code.pop_value(&JvmType::Int);
        code.bind(end);
        code.ret(&JvmType::Void);
        let attr = code.finish(&mut pool).unwrap();
        // ifeq at pc 1, target pc 6, offset 5
        assert_eq!(attr.code[1], 0x99);
        assert_eq!(i16::from_be_bytes([attr.code[2], attr.code[3]]), 5);
        // A branch target gets a stack map frame.
        let (count, _) = attr.stack_map.expect("frame at branch target");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_backward_branch_loop() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_int(&mut pool, 0);
        code.store_local(0, &JvmType::Int);
        let top = code.new_label();
        code.bind(top);
        code.load_local(0, &JvmType::Int);
        code.push_int(&mut pool, 10);
        let done = code.new_label();
        code.jump_if_icmp(Cond::Ge, done);
        code.iinc(0, 1);
        code.goto(top);
        code.bind(done);
        code.ret(&JvmType::Void);
        let attr = code.finish(&mut pool).unwrap();
        // goto offset is negative.
        let goto_at = attr.code.len() - 4;
        assert_eq!(attr.code[goto_at], 0xA7);
        let off = i16::from_be_bytes([attr.code[goto_at + 1], attr.code[goto_at + 2]]);
        assert!(off < 0);
        let (count, _) = attr.stack_map.unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_wide_types_use_two_slots() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_double(&mut pool, 2.5);
        code.store_local(0, &JvmType::Double);
        code.load_local(0, &JvmType::Double);
        code.ret(&JvmType::Double);
        let attr = code.finish(&mut pool).unwrap();
        assert_eq!(attr.max_locals, 2);
        assert_eq!(attr.max_stack, 2);
    }

    #[test]
    fn test_constructor_pattern_initializes_token() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.new_object(&mut pool, "java/util/ArrayList");
        code.dup(&JvmType::array_list());
        code.invoke_init(&mut pool, "java/util/ArrayList", &[]);
        // The remaining copy is now an initialized reference.
        code.ret(&JvmType::array_list());
        let attr = code.finish(&mut pool).unwrap();
        assert_eq!(attr.code[0], 0xBB);
        assert_eq!(attr.code[3], 0x59);
        assert_eq!(attr.code[4], 0xB7);
        assert_eq!(*attr.code.last().unwrap(), 0xB0);
    }

    #[test]
    fn test_conversions() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_int(&mut pool, 1);
        code.convert(&JvmType::Int, &JvmType::Double);
        assert_eq!(*code.code.last().unwrap(), 0x87); // i2d
        code.convert(&JvmType::Double, &JvmType::Long);
        assert_eq!(*code.code.last().unwrap(), 0x8F); // d2l
        code.convert(&JvmType::Long, &JvmType::Float);
        assert_eq!(*code.code.last().unwrap(), 0x89); // l2f
        code.convert(&JvmType::Float, &JvmType::Int);
        assert_eq!(*code.code.last().unwrap(), 0x8B); // f2i
    }

    #[test]
    fn test_dead_code_is_dropped() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.ret(&JvmType::Void);
        let before = code.pc();
        code.push_int(&mut pool, 7);
        code.ret(&JvmType::Int);
        assert_eq!(code.pc(), before);
    }

    #[test]
    fn test_retired_locals_degrade_to_top() {
        let mut pool = ConstantPool::new();
        let mut code = CodeBuilder::new(vec![]);
        code.push_int(&mut pool, 1);
        code.store_local(0, &JvmType::Int);
        code.push_string(&mut pool, "s");
        code.store_local(1, &JvmType::string());
        code.retire_locals(1);
        assert_eq!(code.locals(), &[VerifType::Integer]);
    }
}
