//! For-in loop lowering.
//!
//! `for (k in x)` iterates string keys: list and string operands loop
//! an index counter and bind `String.valueOf(i)`, map operands walk
//! the key set iterator. The loop variable is always a `String`.

use kava_ast::{ForInHead, ForInStmt, Span, VarKind};

use crate::emit::code::{Cond, Invoke};
use crate::emit::{LoopCtx, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::types::{JvmType, ARRAY_LIST, LINKED_HASH_MAP, LIST, MAP, STRING};

const ITERATOR: &str = "java/util/Iterator";
const SET: &str = "java/util/Set";

struct HeadVar {
    slot: u16,
    ty: JvmType,
}

impl MethodEmitter<'_> {
    pub(crate) fn emit_for_in(
        &mut self,
        stmt: &ForInStmt,
        label: Option<String>,
    ) -> CompileResult<()> {
        let obj_ty = self.infer(&stmt.object, None)?;
        self.locals.enter_scope();
        match &obj_ty {
            JvmType::Reference(name) if name == ARRAY_LIST || name == LIST => {
                self.counted_loop(stmt, label, &obj_ty, "size")?;
            }
            ty if ty.is_string() => {
                self.counted_loop(stmt, label, &obj_ty, "length")?;
            }
            JvmType::Reference(name) if name == LINKED_HASH_MAP || name == MAP => {
                self.key_set_loop(stmt, label, &obj_ty)?;
            }
            other => {
                return Err(CompileError::type_error(format!(
                    "For-in loops require List, Map, or String type, but got: {other}"
                ))
                .at(stmt.object.span()));
            }
        }
        let freed = self.locals.exit_scope();
        self.code.retire_locals(freed);
        Ok(())
    }

    /// Index loop over a list or string; the head sees `String.valueOf(i)`.
    fn counted_loop(
        &mut self,
        stmt: &ForInStmt,
        label: Option<String>,
        obj_ty: &JvmType,
        len_method: &str,
    ) -> CompileResult<()> {
        let head = self.bind_head(&stmt.head, stmt.span)?;
        self.emit_expr(&stmt.object, None)?;
        let obj_slot = self.locals.declare_temp(obj_ty)?;
        self.code.store_local(obj_slot, obj_ty);
        self.code.push_int(self.pool, 0);
        let idx_slot = self.locals.declare_temp(&JvmType::Int)?;
        self.code.store_local(idx_slot, &JvmType::Int);

        let top = self.code.new_label();
        let cont = self.code.new_label();
        let end = self.code.new_label();
        self.code.bind(top);
        self.code.load_local(idx_slot, &JvmType::Int);
        self.code.load_local(obj_slot, obj_ty);
        let (kind, owner) = match obj_ty {
            JvmType::Reference(name) if name == LIST => (Invoke::Interface, LIST),
            JvmType::Reference(name) if name == ARRAY_LIST => (Invoke::Virtual, ARRAY_LIST),
            _ => (Invoke::Virtual, STRING),
        };
        self.code
            .invoke(self.pool, kind, owner, len_method, &[], &JvmType::Int);
        self.code.jump_if_icmp(Cond::Ge, end);

        self.code.load_local(idx_slot, &JvmType::Int);
        self.code.invoke(
            self.pool,
            Invoke::Static,
            STRING,
            "valueOf",
            &[JvmType::Int],
            &JvmType::string(),
        );
        self.store_head(&head, stmt.span)?;

        self.loops.push(LoopCtx {
            label,
            break_to: end,
            continue_to: cont,
            is_loop: true,
            finally_depth: self.finallies.len(),
        });
        self.emit_stmt(&stmt.body)?;
        self.loops.pop();

        self.code.bind(cont);
        self.code.iinc(idx_slot, 1);
        self.code.goto(top);
        self.code.bind(end);
        Ok(())
    }

    /// Key-set iterator loop over a map.
    fn key_set_loop(
        &mut self,
        stmt: &ForInStmt,
        label: Option<String>,
        obj_ty: &JvmType,
    ) -> CompileResult<()> {
        let head = self.bind_head(&stmt.head, stmt.span)?;
        self.emit_expr(&stmt.object, None)?;
        let (kind, owner) = match obj_ty {
            JvmType::Reference(name) if name == MAP => (Invoke::Interface, MAP),
            _ => (Invoke::Virtual, LINKED_HASH_MAP),
        };
        self.code.invoke(
            self.pool,
            kind,
            owner,
            "keySet",
            &[],
            &JvmType::reference(SET),
        );
        self.code.invoke(
            self.pool,
            Invoke::Interface,
            SET,
            "iterator",
            &[],
            &JvmType::reference(ITERATOR),
        );
        let iter_ty = JvmType::reference(ITERATOR);
        let iter_slot = self.locals.declare_temp(&iter_ty)?;
        self.code.store_local(iter_slot, &iter_ty);

        let top = self.code.new_label();
        let end = self.code.new_label();
        self.code.bind(top);
        self.code.load_local(iter_slot, &iter_ty);
        self.code.invoke(
            self.pool,
            Invoke::Interface,
            ITERATOR,
            "hasNext",
            &[],
            &JvmType::Boolean,
        );
        self.code.jump_if(Cond::Eq, end);
        self.code.load_local(iter_slot, &iter_ty);
        self.code.invoke(
            self.pool,
            Invoke::Interface,
            ITERATOR,
            "next",
            &[],
            &JvmType::object(),
        );
        self.code.invoke(
            self.pool,
            Invoke::Static,
            STRING,
            "valueOf",
            &[JvmType::object()],
            &JvmType::string(),
        );
        self.store_head(&head, stmt.span)?;

        self.loops.push(LoopCtx {
            label,
            break_to: end,
            continue_to: top,
            is_loop: true,
            finally_depth: self.finallies.len(),
        });
        self.emit_stmt(&stmt.body)?;
        self.loops.pop();

        self.code.goto(top);
        self.code.bind(end);
        Ok(())
    }

    /// Resolve the loop variable: a fresh declaration binds a `String`
    /// local in the loop scope, a bare identifier reuses an existing
    /// assignable local.
    fn bind_head(&mut self, head: &ForInHead, span: Span) -> CompileResult<HeadVar> {
        match head {
            ForInHead::Decl { kind, name } => {
                let is_const = matches!(kind, VarKind::Const);
                let slot = self
                    .locals
                    .declare(&name.name, JvmType::string(), is_const)
                    .map_err(|e| e.at(name.span))?;
                Ok(HeadVar {
                    slot,
                    ty: JvmType::string(),
                })
            }
            ForInHead::Ident(id) => {
                let local = self.locals.lookup(&id.name).ok_or_else(|| {
                    CompileError::type_error(format!("Undefined variable: {}", id.name))
                        .at(id.span)
                })?;
                if local.is_const {
                    return Err(CompileError::type_error(format!(
                        "Cannot assign to constant '{}'",
                        id.name
                    ))
                    .at(id.span));
                }
                if !local.ty.is_string() && local.ty != JvmType::object() {
                    return Err(CompileError::type_error(format!(
                        "For-in loop variable '{}' must be a String, but is {}",
                        id.name, local.ty
                    ))
                    .at(span));
                }
                Ok(HeadVar {
                    slot: local.slot,
                    ty: local.ty.clone(),
                })
            }
        }
    }

    /// Store the key string sitting on the stack into the head variable.
    fn store_head(&mut self, head: &HeadVar, span: Span) -> CompileResult<()> {
        self.convert_value(&JvmType::string(), &head.ty, span)?;
        self.code.store_local(head.slot, &head.ty);
        Ok(())
    }
}
