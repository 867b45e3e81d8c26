pub mod gfx;
pub mod rom;
pub mod scene;
pub mod segment;
pub mod vfs;

pub use rom::Rom;
pub use scene::{read_main_scene, read_scene, Headers};
pub use vfs::Vfs;
