use crate::error::{DealerError, DealerResult};

/// One physical GPU card on a node.
///
/// The card index is zero-based and cards are densely packed in the index
/// space — it is a position, not an identity that survives a reboot.
#[derive(Debug, Clone, PartialEq)]
pub struct Gpu {
    pub index: usize,
    /// Fixed, normalised to 100 per card.
    pub total_core: u32,
    /// Card VRAM, MiB.
    pub total_memory: u32,
    committed_core: u32,
    committed_memory: u32,
}

impl Gpu {
    pub fn new(index: usize, total_core: u32, total_memory: u32) -> Self {
        Self {
            index,
            total_core,
            total_memory,
            committed_core: 0,
            committed_memory: 0,
        }
    }

    pub fn committed_core(&self) -> u32 {
        self.committed_core
    }

    pub fn committed_memory(&self) -> u32 {
        self.committed_memory
    }

    pub fn residual_core(&self) -> u32 {
        self.total_core.saturating_sub(self.committed_core)
    }

    pub fn residual_memory(&self) -> u32 {
        self.total_memory.saturating_sub(self.committed_memory)
    }

    /// A container request (c, m) fits iff both residuals cover it.
    pub fn fits(&self, core: u32, memory: u32) -> bool {
        self.residual_core() >= core && self.residual_memory() >= memory
    }

    /// Commit is the only mutation that grows `committed_*`. Callers must
    /// have already checked `fits` — this enforces the invariant loudly
    /// rather than silently clamping.
    pub fn commit(&mut self, core: u32, memory: u32) -> DealerResult<()> {
        let new_core = self.committed_core + core;
        let new_memory = self.committed_memory + memory;
        if new_core > self.total_core || new_memory > self.total_memory {
            return Err(DealerError::Invariant(format!(
                "gpu {} commit would exceed capacity: core {}+{} > {}, memory {}+{} > {}",
                self.index,
                self.committed_core,
                core,
                self.total_core,
                self.committed_memory,
                memory,
                self.total_memory
            )));
        }
        self.committed_core = new_core;
        self.committed_memory = new_memory;
        Ok(())
    }

    /// Revert is the only mutation that shrinks `committed_*`.
    pub fn revert(&mut self, core: u32, memory: u32) -> DealerResult<()> {
        if core > self.committed_core || memory > self.committed_memory {
            return Err(DealerError::Invariant(format!(
                "gpu {} revert underflow: core {}-{}, memory {}-{}",
                self.index, self.committed_core, core, self.committed_memory, memory
            )));
        }
        self.committed_core -= core;
        self.committed_memory -= memory;
        Ok(())
    }
}
