pub mod limits;

pub use limits::ResourceLimits;
