//! Mode control entity core: the display state machine and the device
//! lifecycle coupling it depends on.
//!
//! Module numbering follows the component list this crate implements:
//! C1 [`bus`], C2 [`socket`], C3 [`fb`], C4 [`brightness`], C5 [`blanking`],
//! C6 [`compositor`], C7 [`suspend`], C8 [`dsm`], C9 [`shutdown`]. The
//! remaining modules are collaborators the core depends on but does not
//! itself own the implementation of in production (config, sensors, led,
//! brightness curve, bus transport) plus the filesystem flag-file watcher.

pub mod blanking;
pub mod brightness;
pub mod brightness_curve;
pub mod bus;
pub mod bus_transport;
pub mod compositor;
pub mod config;
pub mod dsm;
pub mod error;
pub mod fb;
pub mod flags;
pub mod led;
pub mod sensors;
pub mod shutdown;
pub mod socket;
pub mod suspend;
pub mod types;

pub use error::MceError;
