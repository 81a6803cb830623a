pub mod composer;
pub mod narration;
pub mod scenes;
pub mod timeline;
