//! Infrastructure layer for the device manager.
//!
//! Contains OS-facing adapters: the TCP endpoint hosts connect to, the proxy
//! that speaks to a host over it, the process installer and the config file.
//!
//! **Dependency rule**: this layer may depend on `application` and `hdf_core`,
//! but MUST NOT be imported by the `application` layer (tests aside).

pub mod host_proxy;
pub mod installer;
pub mod listener;
pub mod storage;
