#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "xtensa")]
pub mod ble;
#[cfg(target_arch = "xtensa")]
pub mod lora;
/// Text record format shared by the radio and serial sides of the relay.
pub mod protocol;
