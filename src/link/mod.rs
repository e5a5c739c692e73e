//! Serial detector link: transport, protocol state machine and async driver.

mod driver;
mod protocol;
mod transport;

pub use driver::DetectorLink;
pub use protocol::{
    CMD_GET_INFO, CMD_START_STREAMING, CMD_STOP_STREAMING, LinkAction, LinkEvent, LinkProtocol,
    LinkState, MAX_RETRIES, RESPONSE_TIMEOUT,
};
pub use transport::{SerialConfig, SerialTransport, Transport};
