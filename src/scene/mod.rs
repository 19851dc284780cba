// Scene data: cameras, objects, meshes and per-frame context

pub mod camera;
pub mod frame_info;
pub mod game_object;
pub mod model;

pub use camera::Camera;
pub use frame_info::{FrameInfo, GlobalUbo};
pub use game_object::{GameObject, Transform};
pub use model::{Model, ModelBuilder, Vertex};
