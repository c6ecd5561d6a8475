//! Access descriptors and their slab allocator.
//!
//! A descriptor names "the value reached by instance X, indexed by
//! `[k0, k1, ...]`" where every index is either a `u16` literal or another
//! descriptor resolved at read time. Descriptors are owned by the code
//! graph: one slab per code load, sized by the `ACCESS_CFG` packet and
//! freed wholesale on reset.

use crate::error::{Owner, VmError, VmResult};
use crate::memory::{InstanceRef, Memory};
use blockflow_asm::{Fault, Unpacker};
use blockflow_types::DataType;

/// Slab handle of one access descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessId(u32);

/// One array index: a literal or a nested descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexValue {
    /// Literal index.
    Static(u16),
    /// Index computed from another descriptor at read time.
    Dynamic(AccessId),
}

/// Access descriptor node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// The instance the descriptor reads or writes.
    pub target: InstanceRef,
    /// One entry per dimension; empty for whole-instance references.
    pub indices: Vec<IndexValue>,
    /// Flat element offset, precomputed when every index is static.
    pub resolved: Option<u32>,
}

/// Bump slab holding every descriptor of the current code load.
#[derive(Debug, Default)]
pub struct AccessPool {
    nodes: Vec<Access>,
    node_cap: u16,
    index_budget: u16,
    indices_used: u16,
    created: bool,
}

impl AccessPool {
    /// Size the slab for a code load, dropping any previous one.
    pub fn allocate(&mut self, node_cap: u16, total_indices: u16) {
        if self.created {
            self.reset();
        }
        self.nodes = Vec::with_capacity(node_cap as usize);
        self.node_cap = node_cap;
        self.index_budget = total_indices;
        self.indices_used = 0;
        self.created = true;
        tracing::debug!(node_cap, total_indices, "access slab allocated");
    }

    /// Free every descriptor.
    pub fn reset(&mut self) {
        self.nodes = Vec::new();
        self.node_cap = 0;
        self.index_budget = 0;
        self.indices_used = 0;
        self.created = false;
    }

    /// True once `ACCESS_CFG` sized the slab.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Descriptors allocated so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no descriptor has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    pub fn node(&self, id: AccessId) -> Result<&Access, Fault> {
        self.nodes.get(id.0 as usize).ok_or(Fault::NullPtr)
    }

    fn push(&mut self, access: Access) -> Result<AccessId, Fault> {
        if !self.created {
            return Err(Fault::NullPtr);
        }
        if self.nodes.len() >= self.node_cap as usize {
            return Err(Fault::NoMem);
        }
        let extra = access.indices.len() as u16;
        if self.indices_used + extra > self.index_budget {
            return Err(Fault::NoMem);
        }
        self.indices_used += extra;
        let id = AccessId(self.nodes.len() as u32);
        self.nodes.push(access);
        Ok(id)
    }
}

impl Memory {
    /// Parse one access descriptor subtree from the packet cursor.
    ///
    /// Wire node: `{type:4, ctx:3, _:1}` `{dims_cnt:3, static_mask:3, _:2}`
    /// `{instance_idx:u16}`, then per dimension either a `u16` literal
    /// (mask bit high) or a nested node. Whenever every index is a literal
    /// the flat offset is precomputed and bounds-checked here.
    pub fn parse_access(&mut self, r: &mut Unpacker<'_>) -> VmResult<AccessId> {
        let fail = |fault| VmError::abort(fault, Owner::AccessParse, 0);

        let b0 = r.u8().map_err(fail)?;
        let b1 = r.u8().map_err(fail)?;
        let instance_idx = r.u16().map_err(fail)?;

        let ty = DataType::try_from(b0 & 0x0f)
            .map_err(|_| fail(Fault::MemInvalidDatatype))?;
        let ctx = (b0 >> 4) & 0x07;
        let dims_cnt = (b1 & 0x07) as usize;
        let static_mask = (b1 >> 3) & 0x07;

        let target = InstanceRef {
            ctx,
            ty,
            idx: instance_idx,
        };
        let inst = *self.instance(target).map_err(fail)?;
        if dims_cnt != 0 && dims_cnt != inst.dims_cnt as usize {
            return Err(fail(Fault::InvalidData));
        }

        let mut indices = Vec::with_capacity(dims_cnt);
        let mut all_static = true;
        for i in 0..dims_cnt {
            if (static_mask >> i) & 1 == 1 {
                indices.push(IndexValue::Static(r.u16().map_err(fail)?));
            } else {
                all_static = false;
                let child = self
                    .parse_access(r)
                    .map_err(|e| e.chain(Owner::AccessParse, instance_idx))?;
                indices.push(IndexValue::Dynamic(child));
            }
        }

        let resolved = if dims_cnt == 0 {
            Some(0)
        } else if all_static {
            let dims = self.dims_of(&inst).map_err(fail)?;
            let mut offset = 0u32;
            let mut stride = 1u32;
            for (i, index) in indices.iter().enumerate().rev() {
                let IndexValue::Static(index_val) = *index else {
                    return Err(fail(Fault::Unlikely));
                };
                let dim = u32::from(dims[i]);
                if u32::from(index_val) >= dim {
                    return Err(fail(Fault::MemOutOfBounds));
                }
                offset += u32::from(index_val) * stride;
                stride *= dim;
            }
            Some(offset)
        } else {
            None
        };

        self.access
            .push(Access {
                target,
                indices,
                resolved,
            })
            .map_err(fail)
    }
}
