// Backend module - thin ownership layer over ash
//
// Each wrapper owns its Vulkan handles and destroys them on drop. Render
// systems talk to command buffers through `CommandRecorder` only.

pub mod buffer;
pub mod descriptors;
pub mod device;
pub mod pipeline;
pub mod recorder;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use device::VulkanDevice;
pub use pipeline::{Pipeline, PipelineConfig, ShaderPaths};
pub use recorder::{AshRecorder, CommandRecorder};
pub use swapchain::Swapchain;
