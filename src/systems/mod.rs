// Render systems - each owns a pipeline and records one kind of draw

pub mod simple_render_system;

pub use simple_render_system::SimpleRenderSystem;
