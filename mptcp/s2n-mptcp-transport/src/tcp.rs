// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interface onto the TCP input/output machinery proper.
//!
//! Segmentation, retransmission and the receive state machine are out of
//! scope; this trait is the seam the path manager drives them through. A
//! recording mock lives in [`crate::testing`].

use crate::{join::request::RequestState, meta::Meta, route::Route, subflow::Subflow};
use core::fmt;
use s2n_mptcp_core::segment::Segment;

/// A transmit attempt failed (allocation, device, ...)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transmit failed")
    }
}

impl std::error::Error for SendError {}

/// The receive state machine rejected a segment; the caller resets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessError;

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "receive processing failed")
    }
}

impl std::error::Error for ProcessError {}

/// TCP machinery consumed by the path manager.
///
/// None of these calls may block; they are invoked from packet-receive
/// context with the meta lock held.
pub trait Tcp {
    /// Emits the SYN-ACK for a pending JOIN using the meta's own routing
    /// state (same address family as the meta)
    fn send_synack(&mut self, meta: &Meta, req: &RequestState) -> Result<(), SendError>;

    /// Emits the SYN-ACK over an explicitly resolved route. Used when the
    /// subflow's family differs from the meta's, whose cached route is
    /// useless for it.
    fn send_synack_routed(
        &mut self,
        meta: &Meta,
        req: &RequestState,
        route: &Route,
    ) -> Result<(), SendError>;

    /// Standard same-family SYN-ACK retransmission
    fn rtx_synack(&mut self, meta: &Meta, req: &RequestState) -> Result<(), SendError>;

    /// Emits a RST toward the sender of `seg`
    fn send_reset(&mut self, seg: &Segment);

    /// Emits a bare ACK on `sub`, carrying whatever options are pending
    /// (REMOVE_ADDR, MP_PRIO)
    fn send_ack(&mut self, sub: &mut Subflow);

    /// Drives a freshly promoted child through the receive state machine
    fn rcv_state_process(&mut self, sub: &mut Subflow, seg: &Segment) -> Result<(), ProcessError>;

    /// Delegates a non-JOIN segment to the owning subflow's receive path
    fn sub_do_rcv(&mut self, sub: &mut Subflow, seg: Segment);

    /// Requeues a closing subflow's unacknowledged data at the meta level
    fn reinject_data(&mut self, sub: &mut Subflow);
}
