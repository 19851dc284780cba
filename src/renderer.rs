// Renderer - per-frame orchestration
//
// Owns the swapchain and one primary command buffer per frame in flight.
// A frame is `begin_frame` -> `begin_swap_chain_render_pass` -> record ->
// `end_swap_chain_render_pass` -> `end_frame`. Swapchain recreation happens
// between frames, never inside one.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use crate::backend::swapchain::SwapchainSettings;
use crate::backend::{Swapchain, VulkanDevice};

/// Command buffer recorded for frame slot `slot`
///
/// The slot comes from the swapchain, which also owns that slot's fence and
/// semaphores.
fn slot_command_buffer(command_buffers: &[vk::CommandBuffer], slot: usize) -> Result<vk::CommandBuffer> {
    command_buffers.get(slot).copied().with_context(|| {
        format!(
            "Frame slot {} has no command buffer ({} allocated)",
            slot,
            command_buffers.len()
        )
    })
}

/// Begin/end bookkeeping for one frame at a time
#[derive(Debug)]
pub struct FrameTracker {
    frames_in_flight: usize,
    image_index: u32,
    started: bool,
}

impl FrameTracker {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            image_index: 0,
            started: false,
        }
    }

    pub fn begin(&mut self, image_index: u32) -> Result<()> {
        if self.started {
            anyhow::bail!("Cannot begin a frame while one is already in progress");
        }
        self.image_index = image_index;
        self.started = true;
        Ok(())
    }

    /// Finish the frame, returning the image it drew to
    pub fn end(&mut self) -> Result<u32> {
        if !self.started {
            anyhow::bail!("Cannot end a frame that was never started");
        }
        self.started = false;
        Ok(self.image_index)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Image acquired for the frame in progress
    pub fn image_index(&self) -> Result<u32> {
        if !self.started {
            anyhow::bail!("No frame in progress");
        }
        Ok(self.image_index)
    }

    /// Abandon the frame in progress
    pub fn reset(&mut self) {
        self.started = false;
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}

pub struct Renderer {
    command_buffers: Vec<vk::CommandBuffer>,
    swapchain: Swapchain,
    tracker: FrameTracker,
    window_extent: vk::Extent2D,
    needs_recreate: bool,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(
        device: Arc<VulkanDevice>,
        window_extent: vk::Extent2D,
        settings: SwapchainSettings,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let swapchain = Swapchain::new(device.clone(), window_extent, settings, None)?;
        let tracker = FrameTracker::new(settings.max_frames_in_flight);

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(tracker.frames_in_flight() as u32);

        let command_buffers = unsafe {
            device
                .device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffers")?
        };

        log::info!(
            "Renderer ready: {} frames in flight, {} swapchain images",
            command_buffers.len(),
            swapchain.image_count()
        );

        Ok(Self {
            command_buffers,
            swapchain,
            tracker,
            window_extent,
            needs_recreate: false,
            clear_color,
            device,
        })
    }

    /// Rebuild the swapchain for `window_extent`
    ///
    /// A zero-sized window (minimised) defers the rebuild. If creation fails
    /// the previous swapchain is kept.
    pub fn recreate_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<()> {
        self.window_extent = window_extent;
        if window_extent.width == 0 || window_extent.height == 0 {
            self.needs_recreate = true;
            return Ok(());
        }
        if self.tracker.is_started() {
            anyhow::bail!("Cannot recreate the swapchain while a frame is in progress");
        }

        self.device.wait_idle()?;

        let settings = self.swapchain.settings();
        let swapchain = Swapchain::new(
            self.device.clone(),
            window_extent,
            settings,
            Some(&self.swapchain),
        )?;

        // Pipelines are built against the render pass formats
        if !self.swapchain.compare_formats(&swapchain) {
            anyhow::bail!("Swapchain image or depth format has changed");
        }

        // The new swapchain starts again at frame slot 0
        self.swapchain = swapchain;
        self.needs_recreate = false;
        Ok(())
    }

    /// Request a swapchain rebuild before the next frame
    pub fn mark_resized(&mut self, window_extent: vk::Extent2D) {
        self.window_extent = window_extent;
        self.needs_recreate = true;
    }

    /// Acquire an image and start recording
    ///
    /// Returns `None` when no frame can be drawn right now (out-of-date
    /// swapchain or minimised window); try again next frame.
    pub fn begin_frame(&mut self) -> Result<Option<vk::CommandBuffer>> {
        if self.tracker.is_started() {
            anyhow::bail!("Cannot call begin_frame while a frame is already in progress");
        }

        if self.needs_recreate {
            self.recreate_swapchain(self.window_extent)?;
            if self.needs_recreate {
                return Ok(None);
            }
        }

        let Some((image_index, suboptimal)) = self.swapchain.acquire_next_image()? else {
            log::debug!("Swapchain out of date at acquire");
            self.needs_recreate = true;
            return Ok(None);
        };
        if suboptimal {
            self.needs_recreate = true;
        }

        let command_buffer = slot_command_buffer(&self.command_buffers, self.swapchain.current_frame())?;
        self.tracker.begin(image_index)?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let device = &self.device.device;
        let begun = unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .and_then(|_| device.begin_command_buffer(command_buffer, &begin_info))
        };
        if let Err(e) = begun {
            self.tracker.reset();
            return Err(e).context("Failed to begin recording command buffer");
        }

        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present
    pub fn end_frame(&mut self) -> Result<()> {
        let command_buffer = self.current_command_buffer()?;
        let image_index = self.tracker.end()?;

        unsafe {
            self.device
                .device
                .end_command_buffer(command_buffer)
                .context("Failed to record command buffer")?;
        }

        if self.swapchain.submit_command_buffers(command_buffer, image_index)? {
            self.needs_recreate = true;
        }

        if self.needs_recreate {
            self.recreate_swapchain(self.window_extent)?;
        }
        Ok(())
    }

    pub fn begin_swap_chain_render_pass(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.check_frame_command_buffer(command_buffer)?;
        let image_index = self.tracker.image_index()? as usize;
        let extent = self.swapchain.extent;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swapchain.render_pass)
            .framebuffer(self.swapchain.framebuffers[image_index])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            let device = &self.device.device;
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
        Ok(())
    }

    pub fn end_swap_chain_render_pass(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.check_frame_command_buffer(command_buffer)?;
        unsafe {
            self.device.device.cmd_end_render_pass(command_buffer);
        }
        Ok(())
    }

    fn check_frame_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        if self.current_command_buffer()? != command_buffer {
            anyhow::bail!("Render pass commands recorded on a command buffer from a different frame");
        }
        Ok(())
    }

    pub fn current_command_buffer(&self) -> Result<vk::CommandBuffer> {
        if !self.tracker.is_started() {
            anyhow::bail!("Cannot get command buffer when frame not in progress");
        }
        slot_command_buffer(&self.command_buffers, self.swapchain.current_frame())
    }

    /// Frame slot in `0..max_frames_in_flight`, for per-frame resources
    ///
    /// Read between `begin_frame` and `end_frame`; presenting advances it.
    pub fn frame_index(&self) -> usize {
        self.swapchain.current_frame()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.tracker.frames_in_flight()
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent_aspect_ratio()
    }

    pub fn swapchain_render_pass(&self) -> vk::RenderPass {
        self.swapchain.render_pass
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during renderer teardown: {:?}", e);
        }
        unsafe {
            self.device
                .device
                .free_command_buffers(self.device.command_pool, &self.command_buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn command_buffer_follows_frame_slot() {
        let buffers = [vk::CommandBuffer::from_raw(1), vk::CommandBuffer::from_raw(2)];
        assert_eq!(slot_command_buffer(&buffers, 0).unwrap(), buffers[0]);
        assert_eq!(slot_command_buffer(&buffers, 1).unwrap(), buffers[1]);
    }

    #[test]
    fn slot_without_command_buffer_is_an_error() {
        let buffers = [vk::CommandBuffer::from_raw(1)];
        let err = slot_command_buffer(&buffers, 1).unwrap_err();
        assert!(err.to_string().contains("Frame slot 1"));
    }

    #[test]
    fn end_returns_the_image_that_was_begun() {
        let mut tracker = FrameTracker::new(2);
        for image in 0..5 {
            tracker.begin(image % 3).unwrap();
            assert_eq!(tracker.end().unwrap(), image % 3);
        }
        assert!(!tracker.is_started());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut tracker = FrameTracker::new(2);
        tracker.begin(0).unwrap();
        assert!(tracker.begin(1).is_err());
        assert_eq!(tracker.image_index().unwrap(), 0);
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut tracker = FrameTracker::new(2);
        assert!(tracker.end().is_err());
    }

    #[test]
    fn image_index_is_only_available_during_a_frame() {
        let mut tracker = FrameTracker::new(1);
        assert!(tracker.image_index().is_err());
        tracker.begin(2).unwrap();
        assert_eq!(tracker.image_index().unwrap(), 2);
        tracker.end().unwrap();
        assert!(tracker.image_index().is_err());
    }

    #[test]
    fn zero_frames_in_flight_is_treated_as_one() {
        let tracker = FrameTracker::new(0);
        assert_eq!(tracker.frames_in_flight(), 1);
    }

    #[test]
    fn reset_abandons_the_frame_in_progress() {
        let mut tracker = FrameTracker::new(3);
        tracker.begin(1).unwrap();
        tracker.reset();
        assert!(!tracker.is_started());
        assert!(tracker.begin(0).is_ok());
    }
}
