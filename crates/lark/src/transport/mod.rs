// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layer: UDP beacon socket, interface discovery, and the framed
//! TCP wire protocol spoken between endpoints and the nexus.

pub mod beacon;
pub mod frame;
pub mod ifaces;
pub mod message;

pub use beacon::BeaconSocket;
pub use frame::FrameCodec;
pub use message::WireMessage;
