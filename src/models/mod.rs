pub mod image_file;
pub mod progress;
pub mod search;
pub mod text_index;
