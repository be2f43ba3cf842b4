// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces to inject cryptographic algorithms into the TreeKEM engine.
mod provider;

pub use provider::CryptoProvider;
