pub mod audio;
pub mod frames;
