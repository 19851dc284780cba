// Descriptor set layouts, pools and writers
//
// Builders collect bindings/pool sizes first and validate them before any
// Vulkan object is created.

use anyhow::{Context, Result};
use ash::vk;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use super::VulkanDevice;

/// Binding table shared by a layout and the writers that target it
#[derive(Debug, Clone, Default)]
pub struct LayoutBindings {
    bindings: BTreeMap<u32, vk::DescriptorSetLayoutBinding>,
}

impl LayoutBindings {
    pub fn add(
        &mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Result<()> {
        if self.bindings.contains_key(&binding) {
            anyhow::bail!("Descriptor binding {} is already in use", binding);
        }
        if count == 0 {
            anyhow::bail!("Descriptor binding {} has a count of zero", binding);
        }
        self.bindings.insert(
            binding,
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        Ok(())
    }

    /// Descriptor type for a single-descriptor write at `binding`
    pub fn single_write_type(&self, binding: u32) -> Result<vk::DescriptorType> {
        let description = self
            .bindings
            .get(&binding)
            .with_context(|| format!("Layout does not contain binding {}", binding))?;
        if description.descriptor_count != 1 {
            anyhow::bail!(
                "Binding {} expects {} descriptors, single write not supported",
                binding,
                description.descriptor_count
            );
        }
        Ok(description.descriptor_type)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn as_vec(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings.values().copied().collect()
    }
}

pub struct DescriptorSetLayoutBuilder {
    bindings: LayoutBindings,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Result<Self> {
        self.bindings.add(binding, descriptor_type, stage_flags, count)?;
        Ok(self)
    }

    pub fn build(self, device: Arc<VulkanDevice>) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, self.bindings)
    }
}

/// Owned `vk::DescriptorSetLayout`
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    bindings: LayoutBindings,
    device: Arc<VulkanDevice>,
}

impl DescriptorSetLayout {
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder {
            bindings: LayoutBindings::default(),
        }
    }

    fn new(device: Arc<VulkanDevice>, bindings: LayoutBindings) -> Result<Self> {
        if bindings.is_empty() {
            anyhow::bail!("Descriptor set layout needs at least one binding");
        }
        let binding_list = bindings.as_vec();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&binding_list);

        let layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&create_info, None)
                .context("Failed to create descriptor set layout")?
        };
        log::debug!("Created descriptor set layout with {} bindings", bindings.len());

        Ok(Self {
            layout,
            bindings,
            device,
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &LayoutBindings {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
}

impl DescriptorPoolBuilder {
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    pub fn max_sets(mut self, count: u32) -> Self {
        self.max_sets = count;
        self
    }

    pub fn build(self, device: Arc<VulkanDevice>) -> Result<DescriptorPool> {
        if self.pool_sizes.is_empty() {
            anyhow::bail!("Descriptor pool needs at least one pool size");
        }

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&self.pool_sizes)
            .max_sets(self.max_sets);

        let pool = unsafe {
            device
                .device
                .create_descriptor_pool(&create_info, None)
                .context("Failed to create descriptor pool")?
        };

        Ok(DescriptorPool {
            pool,
            budget: Cell::new(SetBudget::new(self.max_sets)),
            device,
        })
    }
}

/// Sets handed out since the pool was created or last reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SetBudget {
    max_sets: u32,
    allocated: u32,
}

impl SetBudget {
    fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            allocated: 0,
        }
    }

    fn reserve(self) -> Result<Self> {
        if self.allocated >= self.max_sets {
            anyhow::bail!(
                "Descriptor pool exhausted: all {} sets allocated, reset the pool first",
                self.max_sets
            );
        }
        Ok(Self {
            allocated: self.allocated + 1,
            ..self
        })
    }

    fn reset(self) -> Self {
        Self::new(self.max_sets)
    }
}

/// Owned `vk::DescriptorPool`
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    budget: Cell<SetBudget>,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder {
            pool_sizes: Vec::new(),
            max_sets: 1000,
        }
    }

    pub fn allocate_descriptor(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let budget = self.budget.get().reserve()?;
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        // Running out of per-type descriptors still surfaces here
        let sets = unsafe {
            self.device
                .device
                .allocate_descriptor_sets(&alloc_info)
                .context("Failed to allocate descriptor set")?
        };
        self.budget.set(budget);

        sets.into_iter()
            .next()
            .context("Driver returned no descriptor set")
    }

    /// Return every set to the pool; sets allocated earlier become invalid
    pub fn reset_pool(&self) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
                .context("Failed to reset descriptor pool")?;
        }
        self.budget.set(self.budget.get().reset());
        Ok(())
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

struct PendingBufferWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: vk::DescriptorBufferInfo,
}

/// Collects buffer writes for one set, then allocates and/or updates it
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<PendingBufferWrite>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Result<Self> {
        let descriptor_type = self.layout.bindings().single_write_type(binding)?;
        self.writes.push(PendingBufferWrite {
            binding,
            descriptor_type,
            info,
        });
        Ok(self)
    }

    /// Allocate a set from the pool and write every pending descriptor into it
    pub fn build(self) -> Result<vk::DescriptorSet> {
        let set = self.pool.allocate_descriptor(self.layout)?;
        self.overwrite(set);
        Ok(set)
    }

    pub fn overwrite(&self, set: vk::DescriptorSet) {
        // Infos stay borrowed from `self.writes` until the update returns
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.descriptor_type)
                    .buffer_info(std::slice::from_ref(&write.info))
                    .build()
            })
            .collect();

        unsafe {
            self.pool.device.device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_binding_is_rejected() {
        let mut bindings = LayoutBindings::default();
        bindings
            .add(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
            .unwrap();
        let err = bindings
            .add(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .unwrap_err();
        assert!(err.to_string().contains("already in use"));
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn zero_count_binding_is_rejected() {
        let mut bindings = LayoutBindings::default();
        assert!(bindings
            .add(3, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 0)
            .is_err());
        assert!(bindings.is_empty());
    }

    #[test]
    fn single_write_type_follows_layout() {
        let mut bindings = LayoutBindings::default();
        bindings
            .add(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
            .unwrap();
        bindings
            .add(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::FRAGMENT, 4)
            .unwrap();

        assert_eq!(
            bindings.single_write_type(0).unwrap(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert!(bindings.single_write_type(1).is_err());
        assert!(bindings.single_write_type(7).is_err());
    }

    #[test]
    fn bindings_are_listed_in_binding_order() {
        let mut bindings = LayoutBindings::default();
        bindings
            .add(2, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .unwrap();
        bindings
            .add(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, 1)
            .unwrap();
        let order: Vec<u32> = bindings.as_vec().iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![0, 2]);
    }

    #[test]
    fn set_budget_runs_out_at_max_sets() {
        let budget = SetBudget::new(2).reserve().unwrap().reserve().unwrap();
        assert_eq!(budget.allocated, 2);
        let err = budget.reserve().unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn reset_returns_the_whole_budget() {
        let budget = SetBudget::new(1).reserve().unwrap();
        assert!(budget.reserve().is_err());
        let budget = budget.reset();
        assert_eq!(budget, SetBudget::new(1));
        assert!(budget.reserve().is_ok());
    }
}
