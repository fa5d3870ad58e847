mod engine;

pub use engine::Catalog;
pub use engine::Engine;
