//! Typed memory: contexts, per-type pools and instances.
//!
//! A context owns, for each of the seven data types, a contiguous element
//! heap, an instance table and a dimension pool. All three have fixed
//! capacities declared by the `CONTEXT_CFG` packet and advance through
//! monotonic cursors; nothing is freed until the context is destroyed.
//!
//! Reads and writes go through access descriptors (see [`access`]); the
//! write path is the single place where type coercion happens.

use crate::error::{Owner, VmError, VmResult};
use blockflow_asm::Fault;
use blockflow_types::{DataType, Value};

pub mod access;

pub use access::{Access, AccessId, AccessPool, IndexValue};

use crate::consts::{MAX_CONTEXTS, MAX_DIMS};

/// Per-type capacity declaration of one context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TypeCaps {
    /// Heap capacity, in elements of the type.
    pub heap_elements: u32,
    /// Instance table capacity.
    pub max_instances: u16,
    /// Dimension pool capacity, in `u16` slots.
    pub max_dims: u16,
}

/// Capacity declaration of a whole context, one entry per type in tag order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContextCaps {
    /// Capacities indexed by [`DataType`] tag.
    pub types: [TypeCaps; DataType::COUNT],
}

/// One scalar or N-dimensional array living inside a context.
///
/// `ctx`/`ty`/`elem_offset` describe the data location and normally point
/// into the pool owning the instance record; the input-selector mirrors
/// whole records, which makes a record alias another pool's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance {
    /// Context holding the data.
    pub ctx: u8,
    /// Element type of the data.
    pub ty: DataType,
    /// Dimension count; 0 for scalars.
    pub dims_cnt: u8,
    /// Base index into the owning pool's dimension pool.
    pub dims_idx: u16,
    /// Element offset of the data region inside the heap.
    pub elem_offset: u32,
    /// Value has been produced this tick.
    pub updated: bool,
    /// The driver may clear `updated` at tick start.
    pub can_clear: bool,
}

/// Stable address of an instance record: `(context, type, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    /// Context id.
    pub ctx: u8,
    /// Type pool.
    pub ty: DataType,
    /// Index inside the instance table.
    pub idx: u16,
}

/// A fully resolved element location, the by-reference view of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Context holding the element.
    pub ctx: u8,
    /// Element type.
    pub ty: DataType,
    /// Element offset inside the heap.
    pub elem_offset: u32,
}

/// Heap, instance table and dimension pool of one `(context, type)` pair.
#[derive(Debug, Default, Clone)]
struct TypePool {
    heap: Vec<u8>,
    heap_cap: u32,
    heap_cursor: u32,
    instances: Vec<Instance>,
    instances_cap: u16,
    dims: Vec<u16>,
    dims_cap: u16,
}

/// One memory context.
#[derive(Debug, Default, Clone)]
pub struct Context {
    types: [TypePool; DataType::COUNT],
}

impl Context {
    fn new(caps: &ContextCaps) -> Self {
        let mut ctx = Context::default();
        for (ty, cap) in DataType::all().into_iter().zip(caps.types.iter()) {
            let pool = &mut ctx.types[ty as u8 as usize];
            pool.heap = vec![0; cap.heap_elements as usize * ty.size()];
            pool.heap_cap = cap.heap_elements;
            pool.instances = Vec::with_capacity(cap.max_instances as usize);
            pool.instances_cap = cap.max_instances;
            pool.dims = Vec::with_capacity(cap.max_dims as usize);
            pool.dims_cap = cap.max_dims;
        }
        ctx
    }
}

/// All memory contexts plus the access-descriptor slab.
#[derive(Debug, Default)]
pub struct Memory {
    contexts: [Option<Box<Context>>; MAX_CONTEXTS],
    /// Access-descriptor slab; one per code load.
    pub(crate) access: AccessPool,
}

impl Memory {
    /// Empty memory: no contexts, no descriptor slab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate context `id` with the declared capacities.
    ///
    /// Allocating an id that already exists reports `MEM_ALREADY_CREATED`
    /// as a warning and leaves the existing context untouched.
    pub fn allocate_context(&mut self, id: u8, caps: &ContextCaps) -> VmResult<()> {
        if id as usize >= MAX_CONTEXTS {
            return Err(VmError::abort(
                Fault::CtxInvalidId,
                Owner::ContextAllocate,
                id as u16,
            ));
        }
        if self.contexts[id as usize].is_some() {
            tracing::warn!(ctx = id, "context already created, skipping");
            return Err(VmError::warning(
                Fault::MemAlreadyCreated,
                Owner::ContextAllocate,
                id as u16,
            ));
        }
        self.contexts[id as usize] = Some(Box::new(Context::new(caps)));
        tracing::debug!(ctx = id, "context allocated");
        Ok(())
    }

    /// Destroy context `id`; a missing context is a no-op.
    pub fn delete_context(&mut self, id: u8) {
        if let Some(slot) = self.contexts.get_mut(id as usize) {
            if slot.take().is_some() {
                tracing::debug!(ctx = id, "context destroyed");
            }
        }
    }

    /// Destroy every context and the descriptor slab.
    pub fn reset(&mut self) {
        for id in 0..MAX_CONTEXTS as u8 {
            self.delete_context(id);
        }
        self.access.reset();
    }

    /// True when context `id` is constructed.
    pub fn has_context(&self, id: u8) -> bool {
        (id as usize) < MAX_CONTEXTS && self.contexts[id as usize].is_some()
    }

    fn pool(&self, ctx: u8, ty: DataType) -> Result<&TypePool, Fault> {
        let context = self
            .contexts
            .get(ctx as usize)
            .ok_or(Fault::CtxInvalidId)?
            .as_ref()
            .ok_or(Fault::NullPtr)?;
        Ok(&context.types[ty as u8 as usize])
    }

    fn pool_mut(&mut self, ctx: u8, ty: DataType) -> Result<&mut TypePool, Fault> {
        let context = self
            .contexts
            .get_mut(ctx as usize)
            .ok_or(Fault::CtxInvalidId)?
            .as_mut()
            .ok_or(Fault::NullPtr)?;
        Ok(&mut context.types[ty as u8 as usize])
    }

    /// Create an instance; returns its stable index inside the pool.
    ///
    /// Indices are assigned in creation order. The `updated` flag starts
    /// high for plain variables and low for `can_clear` outputs.
    pub fn create_instance(
        &mut self,
        ctx: u8,
        ty: DataType,
        dims: &[u16],
        can_clear: bool,
    ) -> VmResult<u16> {
        let fail = |fault| VmError::abort(fault, Owner::InstanceCreate, ctx as u16);
        if dims.len() > MAX_DIMS {
            return Err(fail(Fault::InvalidArg));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(fail(Fault::InvalidArg));
        }
        let pool = self.pool_mut(ctx, ty).map_err(fail)?;

        let total = dims
            .iter()
            .try_fold(1u32, |acc, &d| acc.checked_mul(u32::from(d)))
            .ok_or_else(|| fail(Fault::NoMem))?;
        if pool.heap_cursor.saturating_add(total) > pool.heap_cap {
            return Err(fail(Fault::NoMem));
        }
        if pool.instances.len() >= pool.instances_cap as usize {
            return Err(fail(Fault::NoMem));
        }
        if pool.dims.len() + dims.len() > pool.dims_cap as usize {
            return Err(fail(Fault::NoMem));
        }

        let idx = pool.instances.len() as u16;
        let dims_idx = pool.dims.len() as u16;
        pool.dims.extend_from_slice(dims);
        pool.instances.push(Instance {
            ctx,
            ty,
            dims_cnt: dims.len() as u8,
            dims_idx,
            elem_offset: pool.heap_cursor,
            updated: !can_clear,
            can_clear,
        });
        pool.heap_cursor += total;
        tracing::trace!(ctx, %ty, idx, dims = dims.len(), "instance created");
        Ok(idx)
    }

    /// Number of instances created in the `(ctx, ty)` pool.
    pub fn instance_count(&self, ctx: u8, ty: DataType) -> u16 {
        self.pool(ctx, ty)
            .map(|p| p.instances.len() as u16)
            .unwrap_or(0)
    }

    /// Look up an instance record.
    pub fn instance(&self, r: InstanceRef) -> Result<&Instance, Fault> {
        self.pool(r.ctx, r.ty)?
            .instances
            .get(r.idx as usize)
            .ok_or(Fault::MemInvalidIdx)
    }

    /// Mutable instance record lookup.
    pub fn instance_mut(&mut self, r: InstanceRef) -> Result<&mut Instance, Fault> {
        self.pool_mut(r.ctx, r.ty)?
            .instances
            .get_mut(r.idx as usize)
            .ok_or(Fault::MemInvalidIdx)
    }

    /// Dimension sizes of an instance; empty for scalars.
    pub fn dims_of(&self, inst: &Instance) -> Result<&[u16], Fault> {
        if inst.dims_cnt == 0 {
            return Ok(&[]);
        }
        let pool = self.pool(inst.ctx, inst.ty)?;
        let start = inst.dims_idx as usize;
        let end = start + inst.dims_cnt as usize;
        pool.dims.get(start..end).ok_or(Fault::MemInvalidIdx)
    }

    /// Total element count of an instance (1 for scalars).
    pub fn elem_count(&self, inst: &Instance) -> Result<u32, Fault> {
        Ok(self
            .dims_of(inst)?
            .iter()
            .map(|&d| u32::from(d))
            .product::<u32>()
            .max(1))
    }

    /// Raw little-endian bytes of an instance's data region.
    pub fn instance_bytes(&self, inst: &Instance) -> Result<&[u8], Fault> {
        let count = self.elem_count(inst)? as usize;
        let pool = self.pool(inst.ctx, inst.ty)?;
        let start = inst.elem_offset as usize * inst.ty.size();
        let end = start + count * inst.ty.size();
        pool.heap.get(start..end).ok_or(Fault::MemOutOfBounds)
    }

    /// Write raw bytes into an instance's data region at an element offset.
    ///
    /// Used by the data-fill packets; rejects writes past the region with
    /// `INVALID_DATA` so a malformed packet can never spill into a
    /// neighboring instance.
    pub fn fill_instance(
        &mut self,
        r: InstanceRef,
        start_elem: u16,
        bytes: &[u8],
    ) -> Result<(), Fault> {
        let inst = *self.instance(r)?;
        let count = self.elem_count(&inst)? as usize;
        let size = inst.ty.size();
        if bytes.len() % size != 0 {
            return Err(Fault::InvalidData);
        }
        let items = bytes.len() / size;
        if start_elem as usize + items > count {
            return Err(Fault::InvalidData);
        }
        let start = (inst.elem_offset as usize + start_elem as usize) * size;
        let pool = self.pool_mut(inst.ctx, inst.ty)?;
        pool.heap[start..start + bytes.len()].copy_from_slice(bytes);
        self.instance_mut(r)?.updated = true;
        Ok(())
    }

    /// Read the element at a resolved location.
    pub fn read_at(&self, loc: Location) -> Result<Value, Fault> {
        let pool = self.pool(loc.ctx, loc.ty)?;
        let start = loc.elem_offset as usize * loc.ty.size();
        let bytes = pool
            .heap
            .get(start..start + loc.ty.size())
            .ok_or(Fault::MemOutOfBounds)?;
        Value::read_le(loc.ty, bytes).ok_or(Fault::Unlikely)
    }

    /// Store a value at a resolved location, coercing to the element type.
    pub fn write_at(&mut self, loc: Location, value: Value) -> Result<(), Fault> {
        let coerced = value.coerce(loc.ty);
        let start = loc.elem_offset as usize * loc.ty.size();
        let pool = self.pool_mut(loc.ctx, loc.ty)?;
        let bytes = pool
            .heap
            .get_mut(start..start + loc.ty.size())
            .ok_or(Fault::MemOutOfBounds)?;
        coerced.write_le(bytes);
        Ok(())
    }

    /// Resolve an access descriptor to its element location.
    ///
    /// Static descriptors use the precomputed offset; dynamic indices are
    /// fetched recursively, cast to `u16` and bounds-checked against their
    /// dimension. The bounds check here and at descriptor parse time are
    /// the only producers of `MEM_OUT_OF_BOUNDS`.
    pub fn locate(&self, id: AccessId) -> VmResult<Location> {
        let fail = |fault| VmError::abort(fault, Owner::MemGet, 0);
        let access = self.access.node(id).map_err(fail)?;
        let inst = *self.instance(access.target).map_err(fail)?;

        let rel = if let Some(resolved) = access.resolved {
            resolved
        } else {
            let dims = self.dims_of(&inst).map_err(fail)?;
            let mut offset = 0u32;
            let mut stride = 1u32;
            for (i, index) in access.indices.iter().enumerate().rev() {
                let dim = u32::from(*dims.get(i).ok_or_else(|| fail(Fault::MemInvalidIdx))?);
                let index_val = match *index {
                    IndexValue::Static(v) => u32::from(v),
                    IndexValue::Dynamic(child) => {
                        let v = self
                            .get(child)
                            .map_err(|e| e.chain(Owner::MemGet, access.target.idx))?;
                        u32::from(v.as_u16())
                    }
                };
                if index_val >= dim {
                    tracing::debug!(index_val, dim, "access out of bounds");
                    return Err(fail(Fault::MemOutOfBounds));
                }
                offset += index_val * stride;
                stride *= dim;
            }
            offset
        };

        Ok(Location {
            ctx: inst.ctx,
            ty: inst.ty,
            elem_offset: inst.elem_offset + rel,
        })
    }

    /// Read the value an access descriptor points at.
    pub fn get(&self, id: AccessId) -> VmResult<Value> {
        let loc = self.locate(id)?;
        self.read_at(loc)
            .map_err(|f| VmError::abort(f, Owner::MemGet, 0))
    }

    /// Write a value through an access descriptor.
    ///
    /// The target instance is marked `updated` unconditionally; the value
    /// is coerced to the destination type (see [`Value::coerce`]).
    pub fn set(&mut self, id: AccessId, value: Value) -> VmResult<()> {
        let loc = self
            .locate(id)
            .map_err(|e| e.chain(Owner::MemSet, 0))?;
        let target = self
            .access
            .node(id)
            .map_err(|f| VmError::abort(f, Owner::MemSet, 0))?
            .target;
        self.instance_mut(target)
            .map_err(|f| VmError::abort(f, Owner::MemSet, 0))?
            .updated = true;
        self.write_at(loc, value)
            .map_err(|f| VmError::abort(f, Owner::MemSet, 0))
    }
}
