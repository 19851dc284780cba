// GPU buffers and images backed by gpu-allocator
//
// Buffers track instance size, count and per-instance alignment so uniform
// data can be written per frame or per index.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::VulkanDevice;

/// Round `instance_size` up to a multiple of `min_offset_alignment`
pub fn aligned_size(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_offset_alignment > 0 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

fn check_write_range(buffer_size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> Result<()> {
    let end = offset
        .checked_add(len as vk::DeviceSize)
        .context("Buffer write range overflows")?;
    if end > buffer_size {
        anyhow::bail!(
            "Buffer write of {} bytes at offset {} exceeds buffer size {}",
            len,
            offset,
            buffer_size
        );
    }
    Ok(())
}

/// Byte offset of instance `index`, checking the index and the data size
fn instance_offset(
    index: u32,
    instance_count: u32,
    data_len: usize,
    instance_size: vk::DeviceSize,
    alignment_size: vk::DeviceSize,
) -> Result<vk::DeviceSize> {
    if index >= instance_count {
        anyhow::bail!("Instance index {} out of range ({})", index, instance_count);
    }
    if data_len as vk::DeviceSize > instance_size {
        anyhow::bail!("Instance data is {} bytes, expected at most {}", data_len, instance_size);
    }
    Ok(index as vk::DeviceSize * alignment_size)
}

/// A `vk::Buffer` with its memory allocation, freed on drop
pub struct Buffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    buffer_size: vk::DeviceSize,
    instance_size: vk::DeviceSize,
    instance_count: u32,
    alignment_size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let alignment_size = aligned_size(instance_size, min_offset_alignment);
        let buffer_size = alignment_size * instance_count as vk::DeviceSize;
        if buffer_size == 0 {
            anyhow::bail!("Buffer '{}' would be empty", name);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(buffer_size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&buffer_info, None)
                .with_context(|| format!("Failed to create buffer '{}'", name))?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            let _ = device.allocator().lock().free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e).with_context(|| format!("Failed to bind memory for '{}'", name));
        }

        log::trace!("Created buffer '{}' ({} bytes, {:?})", name, buffer_size, location);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            buffer_size,
            instance_size,
            instance_count,
            alignment_size,
            device,
        })
    }

    /// Create a host-visible buffer and fill it with `data`
    pub fn with_data<T: bytemuck::Pod>(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let mut buffer = Self::new(
            device,
            name,
            std::mem::size_of::<T>() as vk::DeviceSize,
            data.len() as u32,
            usage,
            MemoryLocation::CpuToGpu,
            1,
        )?;
        buffer.write_to_buffer(bytemuck::cast_slice(data), 0)?;
        Ok(buffer)
    }

    /// Copy `data` into mapped memory at `offset`
    pub fn write_to_buffer(&mut self, data: &[u8], offset: vk::DeviceSize) -> Result<()> {
        check_write_range(self.buffer_size, offset, data.len())?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Write one instance worth of data at `index * alignment_size`
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> Result<()> {
        let offset = instance_offset(
            index,
            self.instance_count,
            data.len(),
            self.instance_size,
            self.alignment_size,
        )?;
        self.write_to_buffer(data, offset)
    }

    /// One instance's slice, for a uniform binding per instance
    pub fn descriptor_info_for_index(&self, index: u32) -> Result<vk::DescriptorBufferInfo> {
        let offset = instance_offset(index, self.instance_count, 0, self.instance_size, self.alignment_size)?;
        Ok(vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: self.instance_size,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Depth attachment image, memory and view
pub struct DepthImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
}

impl DepthImage {
    pub fn new(device: &VulkanDevice, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .device
                .create_image(&image_info, None)
                .context("Failed to create depth image")?
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: "depth image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e).context("Failed to allocate depth image memory");
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            let _ = device.allocator().lock().free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(e).context("Failed to bind depth image memory");
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                let _ = device.allocator().lock().free(allocation);
                unsafe { device.device.destroy_image(image, None) };
                return Err(e).context("Failed to create depth image view");
            }
        };

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
        })
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_image_view(self.view, None);
            device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = device.allocator().lock().free(allocation) {
                log::error!("Failed to free depth image memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_size_rounds_up_to_alignment() {
        assert_eq!(aligned_size(112, 256), 256);
        assert_eq!(aligned_size(256, 256), 256);
        assert_eq!(aligned_size(257, 64), 320);
    }

    #[test]
    fn aligned_size_without_alignment_is_identity() {
        assert_eq!(aligned_size(112, 0), 112);
        assert_eq!(aligned_size(44, 1), 44);
    }

    #[test]
    fn write_range_must_fit() {
        assert!(check_write_range(128, 0, 128).is_ok());
        assert!(check_write_range(128, 64, 64).is_ok());
        assert!(check_write_range(128, 64, 65).is_err());
        assert!(check_write_range(128, u64::MAX, 1).is_err());
    }

    #[test]
    fn instance_offset_steps_by_aligned_size() {
        // Three 112-byte uniforms padded to 256
        assert_eq!(instance_offset(0, 3, 112, 112, 256).unwrap(), 0);
        assert_eq!(instance_offset(2, 3, 112, 112, 256).unwrap(), 512);
        assert_eq!(instance_offset(1, 3, 64, 112, 256).unwrap(), 256);
    }

    #[test]
    fn instance_offset_rejects_bad_index_or_oversized_data() {
        let err = instance_offset(3, 3, 112, 112, 256).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let err = instance_offset(0, 3, 113, 112, 256).unwrap_err();
        assert!(err.to_string().contains("expected at most 112"));
    }
}
