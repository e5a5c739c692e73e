//! Binary frame formats spoken by the detector head.
//!
//! Two fixed-format records cross the serial link: the 28-byte [`InfoFrame`]
//! produced once per handshake and the 4166-byte [`PackageFrame`] streamed
//! continuously while acquiring. Both are decoded with explicit byte-offset
//! functions rather than reinterpreting memory, so the layout is portable
//! and carries no alignment assumptions.

mod buffer;
mod codec;
mod info;
mod package;

pub use buffer::FrameBuffer;
pub use info::InfoFrame;
pub use package::{HARDWARE_CHANNELS, PackageFrame};
