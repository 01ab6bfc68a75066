//! "Resources" are owning wrappers around single GPU objects created from the device context.
//! Each one releases its handles on drop.

pub mod buffer;
pub mod image;
pub mod shader;
pub mod uniform_ring;
