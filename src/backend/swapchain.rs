// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, the
// depth buffers and framebuffers that go with them, and the per-frame
// synchronization used to keep several frames in flight.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::buffer::DepthImage;
use super::pipeline::{create_framebuffers, create_render_pass};
use super::sync::{next_frame_index, FrameSync};
use super::VulkanDevice;

const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Prefer SRGB, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Use the configured mode when the surface offers it; FIFO is always supported
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, bounded by the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

/// Swapchain creation parameters coming from config
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub present_mode: vk::PresentModeKHR,
    pub max_frames_in_flight: usize,
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub depth_format: vk::Format,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    depth_images: Vec<DepthImage>,
    frame_sync: Vec<FrameSync>,
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
    settings: SwapchainSettings,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        window_extent: vk::Extent2D,
        settings: SwapchainSettings,
        previous: Option<&Swapchain>,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", window_extent.width, window_extent.height);

        let surface = device.surface;
        let surface_loader = &device.surface_loader;

        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }
        .context("Failed to query surface formats")?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }
        .context("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, settings.present_mode);
        log::info!("Present mode: {:?}", present_mode);

        let extent = choose_extent(&surface_caps, window_extent);
        let image_count = choose_image_count(&surface_caps);

        let depth_format = device.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let families = device.queue_families;
        let family_indices = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        log::info!("Created swapchain with {} images", images.len());

        // Partially built swapchain is released by Drop if a later step fails
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images_in_flight: vec![vk::Fence::null(); images.len()],
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            depth_format,
            extent,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            depth_images: Vec::new(),
            frame_sync: Vec::new(),
            current_frame: 0,
            settings,
            device,
        };

        this.create_image_views()?;
        this.render_pass = create_render_pass(&this.device, this.format, this.depth_format)?;
        this.create_depth_resources()?;
        let depth_views: Vec<_> = this.depth_images.iter().map(|d| d.view).collect();
        this.framebuffers = create_framebuffers(
            &this.device,
            &this.image_views,
            &depth_views,
            this.render_pass,
            this.extent,
        )?;
        this.frame_sync =
            FrameSync::create_all(&this.device.device, settings.max_frames_in_flight.max(1))?;

        Ok(this)
    }

    fn create_image_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe {
                self.device
                    .device
                    .create_image_view(&create_info, None)
                    .context("Failed to create image view")?
            };
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth_resources(&mut self) -> Result<()> {
        for _ in 0..self.images.len() {
            let depth = DepthImage::new(&self.device, self.extent, self.depth_format)?;
            self.depth_images.push(depth);
        }
        Ok(())
    }

    /// Whether `other` renders to the same color and depth formats
    pub fn compare_formats(&self, other: &Swapchain) -> bool {
        self.format == other.format && self.depth_format == other.depth_format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    /// Frame slot whose fence and semaphores the next acquire/submit use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Wait for the current frame slot, then acquire the next image
    ///
    /// Returns `None` when the swapchain is out of date and must be recreated.
    pub fn acquire_next_image(&self) -> Result<Option<(u32, bool)>> {
        let sync = &self.frame_sync[self.current_frame];

        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
                .context("Failed to wait for in-flight fence")?;
        }

        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Submit recorded work for `image_index` and present it
    ///
    /// Returns `true` when the swapchain should be recreated.
    pub fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<bool> {
        let device = &self.device.device;
        let image_slot = image_index as usize;

        // An earlier frame may still be using this image
        let image_fence = self.images_in_flight[image_slot];
        if image_fence != vk::Fence::null() {
            unsafe {
                device
                    .wait_for_fences(&[image_fence], true, u64::MAX)
                    .context("Failed to wait for image fence")?;
            }
        }

        let sync = &self.frame_sync[self.current_frame];
        self.images_in_flight[image_slot] = sync.in_flight_fence;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .reset_fences(&[sync.in_flight_fence])
                .context("Failed to reset in-flight fence")?;
            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };

        self.current_frame = next_frame_index(self.current_frame, self.frame_sync.len());

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }

    pub fn settings(&self) -> SwapchainSettings {
        self.settings
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = &self.device;
        unsafe {
            for &framebuffer in &self.framebuffers {
                device.device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.device.destroy_render_pass(self.render_pass, None);
            }
        }
        for depth in &mut self.depth_images {
            depth.destroy(device);
        }
        for sync in &self.frame_sync {
            sync.destroy(&device.device);
        }
        unsafe {
            for &view in &self.image_views {
                device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
