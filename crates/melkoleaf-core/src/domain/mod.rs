//! Domain entities for the MelkoLeaf bridge.
//!
//! This module contains pure value types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain**.  Domain code:
//!
//! - Has **no** imports from OS APIs, Bluetooth stacks, sockets, or UI
//!   frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//! - Defines the data that flows through the bridge: a color arriving from
//!   the upstream controller, the frame that carries it through the queue,
//!   and the hardware address of each strip it is written to.
//!
//! Code in outer layers (application, infrastructure) depends on the domain,
//! but the domain never depends on them.

/// RGB color with clamping constructors.
pub mod color;

/// Bluetooth hardware addresses.
pub mod device;

/// Timestamped color frames.
pub mod frame;

/// Static panel layout reported to the upstream controller.
pub mod layout;
