//! Pending-request arbitration for shared resources
//!
//! A shared peripheral (an I²C channel, a half-duplex bus) can serve
//! one requestor at a time. Requestors queue by reactor handle in a
//! [`Mask`]; whenever the resource goes idle the highest-priority bit
//! is popped and its handle notified. The notified handler owns the
//! resource until it reports completion, at which point the next
//! request is served.
//!
//! Main-context only, like every mask.

use crate::alert::{self, Fault};
use crate::mask::Mask;
use crate::reactor::Handle;
use crate::types::Arg;

/// Priority-ordered queue of requestors for one shared resource
pub struct Arbiter {
    requests: Mask,
    in_flight: bool,
    completion: Option<Handle>,
}

impl Arbiter {
    pub const fn new() -> Self {
        Self {
            requests: Mask::EMPTY,
            in_flight: false,
            completion: None,
        }
    }

    /// True when no operation is in flight
    #[inline]
    pub fn is_idle(&self) -> bool {
        !self.in_flight
    }

    /// Queue a requestor. Re-requesting while already queued is
    /// idempotent. If the resource is idle the requestor is served
    /// immediately (through the reactor, not synchronously).
    pub fn request(&mut self, requestor: Handle) {
        self.requests.append(requestor);
        self.check_pending();
    }

    /// Queue a whole mask of requestors at once
    pub fn request_mask(&mut self, requestors: Mask) {
        self.requests.append_mask(requestors);
        self.check_pending();
    }

    /// If the resource is idle and requests are queued, grant the
    /// highest-priority one: its handle is notified and is expected to
    /// fill the shared buffers and start the operation.
    pub fn check_pending(&mut self) {
        if self.in_flight {
            return;
        }

        if let Some(next) = self.requests.pop() {
            self.in_flight = true;
            next.notify(0);
        }
    }

    /// Register the completion callback for the operation in flight.
    /// Called by the granted requestor when it starts the transfer;
    /// calling without owning the resource is a fatal fault.
    pub fn set_completion(&mut self, completion: Handle) {
        alert::stop_if(!self.in_flight, Fault::BusNotIdle);
        self.completion = Some(completion);
    }

    /// Report completion of the in-flight operation.
    ///
    /// Delivers `status` to the completion handle registered by the
    /// finished requestor (if any), releases the resource and serves
    /// the next queued request.
    pub fn complete(&mut self, status: Arg) {
        if let Some(completion) = self.completion.take() {
            completion.notify(status);
        }

        self.in_flight = false;
        self.check_pending();
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}
