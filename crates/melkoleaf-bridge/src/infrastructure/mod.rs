//! Infrastructure layer for the bridge.
//!
//! Contains OS-facing adapters: the UDP stream receiver, the emulated HTTP
//! API and its mDNS record, the Bluetooth LE transport, file-system storage,
//! and the control surface with the supervisor that runs everything.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `melkoleaf_core`, but MUST NOT be imported by the `application` or domain
//! layers (tests aside, which borrow the in-memory transport).

pub mod ble;
pub mod control;
pub mod emulation;
pub mod runtime;
pub mod storage;
pub mod stream_receiver;
