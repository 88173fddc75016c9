use crate::shader::declaration::StorageAccess;
use crate::shader::types::{ShaderStage, StageMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    StorageBuffer,
    Sampler,
    Image,
}

impl DescriptorKind {
    pub fn name(self) -> &'static str {
        match self {
            DescriptorKind::StorageBuffer => "SSBO",
            DescriptorKind::Sampler => "sampler",
            DescriptorKind::Image => "image",
        }
    }
}

/// One SSBO, sampler or storage image shared across stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    pub name: String,
    pub ty: String,
    pub stages: StageMask,
    pub access: Option<StorageAccess>,
    binding: Option<u32>,
}

impl DescriptorSet {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        DescriptorSet {
            name: name.into(),
            ty: ty.into(),
            stages: StageMask::empty(),
            access: None,
            binding: None,
        }
    }

    pub fn binding(&self) -> Option<u32> {
        self.binding
    }

    /// Marks `stage` as a user and assigns `next_binding` if no binding exists yet.
    /// Returns the next free binding number.
    pub fn add_stage(&mut self, stage: ShaderStage, next_binding: u32) -> u32 {
        self.stages.insert(stage);
        if self.binding.is_some() {
            return next_binding;
        }
        self.binding = Some(next_binding);
        next_binding + 1
    }
}

/// Insertion-ordered descriptors of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorTable {
    pub kind: DescriptorKind,
    entries: Vec<DescriptorSet>,
}

impl DescriptorTable {
    pub fn new(kind: DescriptorKind) -> Self {
        DescriptorTable {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DescriptorSet> {
        self.entries.iter().find(|d| d.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DescriptorSet> {
        self.entries.iter_mut().find(|d| d.name == name)
    }

    /// Returns the entry for `name`, creating it with type `ty` on first use.
    pub fn ensure(&mut self, name: &str, ty: &str) -> &mut DescriptorSet {
        let idx = match self.entries.iter().position(|d| d.name == name) {
            Some(idx) => idx,
            None => {
                self.entries.push(DescriptorSet::new(name, ty));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DescriptorSet> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, DescriptorSet> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_by(&self, stage: ShaderStage) -> impl Iterator<Item = &DescriptorSet> {
        self.entries.iter().filter(move |d| d.stages.contains(stage))
    }

    /// Assigns bindings `base..` in stage order, first requester wins.
    pub fn assign_bindings(&mut self, base: u32, stage_order: &[ShaderStage]) -> u32 {
        self.assign_bindings_where(base, stage_order, |_| true)
    }

    /// Same as [`assign_bindings`](Self::assign_bindings) for the entries
    /// `filter` accepts. Returns the next free binding.
    pub fn assign_bindings_where(
        &mut self,
        base: u32,
        stage_order: &[ShaderStage],
        filter: impl Fn(&DescriptorSet) -> bool,
    ) -> u32 {
        let mut next = base;
        for &stage in stage_order {
            for entry in self.entries.iter_mut().filter(|d| d.stages.contains(stage) && filter(d)) {
                next = entry.add_stage(stage, next);
            }
        }
        next
    }
}
