//! Local variable slot allocation.
//!
//! Slots follow lexical blocks: a nested block allocates past its
//! parent, and sibling blocks reuse the slots freed when the previous
//! sibling ended. Wide types take two slots.

use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};
use crate::infer::VarTypes;
use crate::types::JvmType;

#[derive(Debug, Clone)]
pub struct Local {
    pub slot: u16,
    pub ty: JvmType,
    pub is_const: bool,
}

#[derive(Debug)]
struct Scope {
    vars: FxHashMap<String, Local>,
    base_slot: u16,
}

/// Block-scoped slot allocator for one method body.
#[derive(Debug)]
pub struct LocalSlotTable {
    scopes: Vec<Scope>,
    next_slot: u16,
    max_slots: u16,
}

impl LocalSlotTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                vars: FxHashMap::default(),
                base_slot: 0,
            }],
            next_slot: 0,
            max_slots: 0,
        }
    }

    /// Reserve a parameter slot in the outermost scope.
    pub fn declare_param(&mut self, name: &str, ty: JvmType) -> CompileResult<u16> {
        self.declare(name, ty, false)
    }

    pub fn declare(&mut self, name: &str, ty: JvmType, is_const: bool) -> CompileResult<u16> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::internal("no open scope"))?;
        if scope.vars.contains_key(name) {
            return Err(CompileError::type_error(format!(
                "Variable '{name}' is already declared in this scope"
            )));
        }
        let slot = self.next_slot;
        let width = ty.slot_width();
        self.next_slot = slot
            .checked_add(width)
            .ok_or_else(|| CompileError::internal("too many local variables"))?;
        if self.next_slot > self.max_slots {
            self.max_slots = self.next_slot;
        }
        scope.vars.insert(
            name.to_string(),
            Local {
                slot,
                ty,
                is_const,
            },
        );
        Ok(slot)
    }

    /// Reserve an unnamed slot for lowering temporaries.
    pub fn declare_temp(&mut self, ty: &JvmType) -> CompileResult<u16> {
        let slot = self.next_slot;
        self.next_slot = slot
            .checked_add(ty.slot_width())
            .ok_or_else(|| CompileError::internal("too many local variables"))?;
        if self.next_slot > self.max_slots {
            self.max_slots = self.next_slot;
        }
        Ok(slot)
    }

    pub fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|s| s.vars.get(name))
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope {
            vars: FxHashMap::default(),
            base_slot: self.next_slot,
        });
    }

    /// Close the current scope. Returns the first slot freed, so the
    /// emitter can retire the slots from its tracked frame.
    pub fn exit_scope(&mut self) -> u16 {
        match self.scopes.pop() {
            Some(scope) => {
                self.next_slot = scope.base_slot;
                scope.base_slot
            }
            None => 0,
        }
    }

    pub fn max_slots(&self) -> u16 {
        self.max_slots
    }
}

impl Default for LocalSlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VarTypes for LocalSlotTable {
    fn var_type(&self, name: &str) -> Option<JvmType> {
        self.lookup(name).map(|local| local.ty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_types_take_two_slots() {
        let mut table = LocalSlotTable::new();
        assert_eq!(table.declare("a", JvmType::Int, false).unwrap(), 0);
        assert_eq!(table.declare("b", JvmType::Double, false).unwrap(), 1);
        assert_eq!(table.declare("c", JvmType::Int, false).unwrap(), 3);
        assert_eq!(table.max_slots(), 4);
    }

    #[test]
    fn test_sibling_blocks_reuse_slots() {
        let mut table = LocalSlotTable::new();
        table.declare("a", JvmType::Int, false).unwrap();
        table.enter_scope();
        let first = table.declare("x", JvmType::Long, false).unwrap();
        table.exit_scope();
        table.enter_scope();
        let second = table.declare("y", JvmType::string(), false).unwrap();
        table.exit_scope();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(table.max_slots(), 3);
    }

    #[test]
    fn test_nested_blocks_never_overlap() {
        let mut table = LocalSlotTable::new();
        table.declare("a", JvmType::Int, false).unwrap();
        table.enter_scope();
        table.declare("b", JvmType::Int, false).unwrap();
        table.enter_scope();
        let inner = table.declare("c", JvmType::Int, false).unwrap();
        assert_eq!(inner, 2);
        table.exit_scope();
        table.exit_scope();
    }

    #[test]
    fn test_shadowing_across_scopes() {
        let mut table = LocalSlotTable::new();
        table.declare("x", JvmType::Int, false).unwrap();
        table.enter_scope();
        table.declare("x", JvmType::string(), false).unwrap();
        assert_eq!(table.lookup("x").unwrap().ty, JvmType::string());
        table.exit_scope();
        assert_eq!(table.lookup("x").unwrap().ty, JvmType::Int);
    }

    #[test]
    fn test_duplicate_in_same_scope_rejected() {
        let mut table = LocalSlotTable::new();
        table.declare("x", JvmType::Int, false).unwrap();
        let err = table.declare("x", JvmType::Int, false).unwrap_err();
        assert!(err.to_string().contains("already declared"));
    }
}
