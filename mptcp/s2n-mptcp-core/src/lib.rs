// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core types for the s2n-mptcp subflow path manager: wire-format options,
//! handshake crypto primitives, segment representation and time/randomness
//! abstractions. Stateful machinery lives in `s2n-mptcp-transport`.

pub mod crypto;
pub mod inet;
pub mod options;
pub mod random;
pub mod segment;
pub mod time;
