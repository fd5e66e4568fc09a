//! Class file serialization and constant pool interning.
//!
//! Output targets class file major version 61 (Java 17), minor 0. Every
//! pool entry is interned; `long` and `double` entries occupy two pool
//! slots as the format requires.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};

pub const MAGIC: u32 = 0xCAFE_BABE;
pub const MAJOR_VERSION: u16 = 61;
pub const MINOR_VERSION: u16 = 0;

bitflags! {
    /// Class access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Field access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Method access flags as written to the class file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccess: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VARARGS = 0x0080;
        const SYNTHETIC = 0x1000;
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    Str(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    /// Second slot of a long or double entry.
    Wide,
}

/// Interning constant pool. Indices are 1-based.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Entry>,
    utf8: FxHashMap<String, u16>,
    classes: FxHashMap<String, u16>,
    strings: FxHashMap<u16, u16>,
    integers: FxHashMap<i32, u16>,
    longs: FxHashMap<i64, u16>,
    floats: FxHashMap<u32, u16>,
    doubles: FxHashMap<u64, u16>,
    name_and_types: FxHashMap<(u16, u16), u16>,
    refs: FxHashMap<(u8, u16, u16), u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: Entry) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(&idx) = self.utf8.get(value) {
            return idx;
        }
        let idx = self.push(Entry::Utf8(value.to_string()));
        self.utf8.insert(value.to_string(), idx);
        idx
    }

    pub fn class(&mut self, internal_name: &str) -> u16 {
        if let Some(&idx) = self.classes.get(internal_name) {
            return idx;
        }
        let name_idx = self.utf8(internal_name);
        let idx = self.push(Entry::Class(name_idx));
        self.classes.insert(internal_name.to_string(), idx);
        idx
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let utf8_idx = self.utf8(value);
        if let Some(&idx) = self.strings.get(&utf8_idx) {
            return idx;
        }
        let idx = self.push(Entry::Str(utf8_idx));
        self.strings.insert(utf8_idx, idx);
        idx
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        if let Some(&idx) = self.integers.get(&value) {
            return idx;
        }
        let idx = self.push(Entry::Integer(value));
        self.integers.insert(value, idx);
        idx
    }

    pub fn float(&mut self, value: f32) -> u16 {
        let bits = value.to_bits();
        if let Some(&idx) = self.floats.get(&bits) {
            return idx;
        }
        let idx = self.push(Entry::Float(value));
        self.floats.insert(bits, idx);
        idx
    }

    pub fn long(&mut self, value: i64) -> u16 {
        if let Some(&idx) = self.longs.get(&value) {
            return idx;
        }
        let idx = self.push(Entry::Long(value));
        self.entries.push(Entry::Wide);
        self.longs.insert(value, idx);
        idx
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let bits = value.to_bits();
        if let Some(&idx) = self.doubles.get(&bits) {
            return idx;
        }
        let idx = self.push(Entry::Double(value));
        self.entries.push(Entry::Wide);
        self.doubles.insert(bits, idx);
        idx
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_idx = self.utf8(name);
        let desc_idx = self.utf8(descriptor);
        if let Some(&idx) = self.name_and_types.get(&(name_idx, desc_idx)) {
            return idx;
        }
        let idx = self.push(Entry::NameAndType(name_idx, desc_idx));
        self.name_and_types.insert((name_idx, desc_idx), idx);
        idx
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, owner, name, descriptor)
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, owner, name, descriptor)
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(11, owner, name, descriptor)
    }

    fn member_ref(&mut self, tag: u8, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_idx = self.class(owner);
        let nat_idx = self.name_and_type(name, descriptor);
        if let Some(&idx) = self.refs.get(&(tag, class_idx, nat_idx)) {
            return idx;
        }
        let entry = match tag {
            9 => Entry::FieldRef(class_idx, nat_idx),
            10 => Entry::MethodRef(class_idx, nat_idx),
            _ => Entry::InterfaceMethodRef(class_idx, nat_idx),
        };
        let idx = self.push(entry);
        self.refs.insert((tag, class_idx, nat_idx), idx);
        idx
    }

    /// Number of pool slots plus one, as written to the header.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16 + 1
    }

    fn write(&self, out: &mut Vec<u8>) {
        write_u16(out, self.count());
        for entry in &self.entries {
            match entry {
                Entry::Utf8(s) => {
                    out.push(1);
                    let bytes = modified_utf8(s);
                    write_u16(out, bytes.len() as u16);
                    out.extend_from_slice(&bytes);
                }
                Entry::Integer(v) => {
                    out.push(3);
                    write_u32(out, *v as u32);
                }
                Entry::Float(v) => {
                    out.push(4);
                    write_u32(out, v.to_bits());
                }
                Entry::Long(v) => {
                    out.push(5);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Entry::Double(v) => {
                    out.push(6);
                    out.extend_from_slice(&v.to_bits().to_be_bytes());
                }
                Entry::Class(name) => {
                    out.push(7);
                    write_u16(out, *name);
                }
                Entry::Str(utf8) => {
                    out.push(8);
                    write_u16(out, *utf8);
                }
                Entry::FieldRef(class, nat) => {
                    out.push(9);
                    write_u16(out, *class);
                    write_u16(out, *nat);
                }
                Entry::MethodRef(class, nat) => {
                    out.push(10);
                    write_u16(out, *class);
                    write_u16(out, *nat);
                }
                Entry::InterfaceMethodRef(class, nat) => {
                    out.push(11);
                    write_u16(out, *class);
                    write_u16(out, *nat);
                }
                Entry::NameAndType(name, desc) => {
                    out.push(12);
                    write_u16(out, *name);
                    write_u16(out, *desc);
                }
                Entry::Wide => {}
            }
        }
    }
}

/// JVM modified UTF-8: NUL encodes as 0xC0 0x80, supplementary
/// characters as surrogate pairs. Plain ASCII and BMP text pass through
/// as standard UTF-8.
fn modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        if cp == 0 {
            out.extend_from_slice(&[0xC0, 0x80]);
        } else if cp < 0x80 {
            out.push(cp as u8);
        } else if cp < 0x800 {
            out.push(0xC0 | (cp >> 6) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else if cp < 0x10000 {
            out.push(0xE0 | (cp >> 12) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        } else {
            let v = cp - 0x10000;
            let hi = 0xD800 + (v >> 10);
            let lo = 0xDC00 + (v & 0x3FF);
            for half in [hi, lo] {
                out.push(0xE0 | (half >> 12) as u8);
                out.push(0x80 | ((half >> 6) & 0x3F) as u8);
                out.push(0x80 | (half & 0x3F) as u8);
            }
        }
    }
    out
}

/// One entry of a method's exception table, fully resolved.
#[derive(Debug, Clone)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Pool index of the caught class, 0 for catch-all.
    pub catch_type: u16,
}

/// A finished Code attribute body.
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
    /// Serialized StackMapTable entries and their count.
    pub stack_map: Option<(u16, Vec<u8>)>,
}

#[derive(Debug)]
struct FieldEntry {
    flags: FieldFlags,
    name: String,
    descriptor: String,
}

#[derive(Debug)]
struct MethodEntry {
    flags: MethodAccess,
    name: String,
    descriptor: String,
    code: Option<CodeAttribute>,
}

/// Builder for one class file.
#[derive(Debug)]
pub struct ClassFile {
    pub pool: ConstantPool,
    flags: ClassFlags,
    name: String,
    super_name: String,
    fields: Vec<FieldEntry>,
    methods: Vec<MethodEntry>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>, super_name: impl Into<String>, flags: ClassFlags) -> Self {
        Self {
            pool: ConstantPool::new(),
            flags,
            name: name.into(),
            super_name: super_name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_field(&mut self, flags: FieldFlags, name: &str, descriptor: &str) {
        self.fields.push(FieldEntry {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
    }

    pub fn add_method(
        &mut self,
        flags: MethodAccess,
        name: &str,
        descriptor: &str,
        code: CodeAttribute,
    ) {
        self.methods.push(MethodEntry {
            flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Some(code),
        });
    }

    pub fn to_bytes(mut self) -> CompileResult<Vec<u8>> {
        // Intern header names first so the pool is complete before it is
        // written.
        let this_class = self.pool.class(&self.name);
        let super_class = self.pool.class(&self.super_name);
        let mut field_indices = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let name = self.pool.utf8(&field.name);
            let desc = self.pool.utf8(&field.descriptor);
            field_indices.push((name, desc));
        }
        let code_attr = if self.methods.iter().any(|m| m.code.is_some()) {
            self.pool.utf8("Code")
        } else {
            0
        };
        let stack_map_attr = if self
            .methods
            .iter()
            .any(|m| m.code.as_ref().is_some_and(|c| c.stack_map.is_some()))
        {
            self.pool.utf8("StackMapTable")
        } else {
            0
        };
        let mut method_indices = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            let name = self.pool.utf8(&method.name);
            let desc = self.pool.utf8(&method.descriptor);
            method_indices.push((name, desc));
        }

        let mut out = Vec::with_capacity(1024);
        write_u32(&mut out, MAGIC);
        write_u16(&mut out, MINOR_VERSION);
        write_u16(&mut out, MAJOR_VERSION);
        self.pool.write(&mut out);
        write_u16(&mut out, self.flags.bits());
        write_u16(&mut out, this_class);
        write_u16(&mut out, super_class);
        write_u16(&mut out, 0); // interfaces

        write_u16(&mut out, self.fields.len() as u16);
        for (field, (name, desc)) in self.fields.iter().zip(&field_indices) {
            write_u16(&mut out, field.flags.bits());
            write_u16(&mut out, *name);
            write_u16(&mut out, *desc);
            write_u16(&mut out, 0); // attributes
        }

        write_u16(&mut out, self.methods.len() as u16);
        for (method, (name, desc)) in self.methods.iter().zip(&method_indices) {
            write_u16(&mut out, method.flags.bits());
            write_u16(&mut out, *name);
            write_u16(&mut out, *desc);
            match &method.code {
                Some(code) => {
                    write_u16(&mut out, 1);
                    write_code_attribute(&mut out, code, code_attr, stack_map_attr)?;
                }
                None => write_u16(&mut out, 0),
            }
        }

        write_u16(&mut out, 0); // class attributes
        Ok(out)
    }
}

fn write_code_attribute(
    out: &mut Vec<u8>,
    code: &CodeAttribute,
    code_attr: u16,
    stack_map_attr: u16,
) -> CompileResult<()> {
    if code.code.len() > u16::MAX as usize {
        return Err(CompileError::internal("method body exceeds 65535 bytes"));
    }
    let mut body = Vec::with_capacity(code.code.len() + 64);
    write_u16(&mut body, code.max_stack);
    write_u16(&mut body, code.max_locals);
    write_u32(&mut body, code.code.len() as u32);
    body.extend_from_slice(&code.code);
    write_u16(&mut body, code.exceptions.len() as u16);
    for entry in &code.exceptions {
        write_u16(&mut body, entry.start_pc);
        write_u16(&mut body, entry.end_pc);
        write_u16(&mut body, entry.handler_pc);
        write_u16(&mut body, entry.catch_type);
    }
    match &code.stack_map {
        Some((count, bytes)) => {
            write_u16(&mut body, 1);
            write_u16(&mut body, stack_map_attr);
            write_u32(&mut body, bytes.len() as u32 + 2);
            write_u16(&mut body, *count);
            body.extend_from_slice(bytes);
        }
        None => write_u16(&mut body, 0),
    }
    write_u16(out, code_attr);
    write_u32(out, body.len() as u32);
    out.extend_from_slice(&body);
    Ok(())
}

pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}
