// Adapters layer: mapping sources backed by the filesystem.

pub mod mappings_dir;

pub use mappings_dir::MappingsDir;
