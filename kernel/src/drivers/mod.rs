//! Device drivers subsystem
//!
//! The Pi Zero 2 W build carries one driver family here: the DWC2 USB host
//! stack. The console and timer drivers live with the board bring-up code.

pub mod usb;
