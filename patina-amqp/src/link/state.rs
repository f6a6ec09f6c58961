//! Link state and link flow state

use std::collections::VecDeque;

use patina_amqp_types::definitions::{LinkError, SequenceNo};

use super::CreditMode;

/// Link state.
///
/// There is no official definition of the link state in the AMQP 1.0 specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not attached yet, or no longer attached
    Detached,

    /// An attach frame has been sent
    AttachSent,

    /// Attach frames have been exchanged
    Attached,

    /// A closing detach frame has been sent
    DetachSent,
}

/// Serial number comparison: a difference that went "negative" means no credit
pub(crate) fn serial_difference(limit: SequenceNo, count: SequenceNo) -> u32 {
    let diff = limit.wrapping_sub(count);
    if diff > i32::MAX as u32 {
        0
    } else {
        diff
    }
}

/// Flow state of the sending end of a link, and the messages waiting for credit
#[derive(Debug)]
pub(crate) struct SenderFlow<T> {
    initial_delivery_count: SequenceNo,
    delivery_count: SequenceNo,
    link_credit: u32,
    drain: bool,
    pending: VecDeque<T>,
}

impl<T> SenderFlow<T> {
    pub fn new(initial_delivery_count: SequenceNo) -> Self {
        Self {
            initial_delivery_count,
            delivery_count: initial_delivery_count,
            link_credit: 0,
            drain: false,
            pending: VecDeque::new(),
        }
    }

    pub fn initial_delivery_count(&self) -> SequenceNo {
        self.initial_delivery_count
    }

    pub fn delivery_count(&self) -> SequenceNo {
        self.delivery_count
    }

    pub fn link_credit(&self) -> u32 {
        self.link_credit
    }

    pub fn available(&self) -> u32 {
        u32::try_from(self.pending.len()).unwrap_or(u32::MAX)
    }

    pub fn drain(&self) -> bool {
        self.drain
    }

    pub fn enqueue(&mut self, item: T) {
        self.pending.push_back(item)
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.pending.retain(f)
    }

    /// Takes the next pending item if there is credit for it. Each item consumes one credit.
    pub fn next_sendable(&mut self) -> Option<T> {
        if self.link_credit == 0 {
            return None;
        }
        let item = self.pending.pop_front()?;
        self.link_credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        Some(item)
    }

    /// Applies the receiver's view of the link.
    ///
    /// link-credit = delivery-count(rcv) + link-credit(rcv) - delivery-count(snd). A null
    /// delivery count from the receiver means it has not seen our attach yet.
    pub fn on_flow(&mut self, delivery_count: Option<SequenceNo>, link_credit: u32, drain: bool) {
        let delivery_count_rcv = delivery_count.unwrap_or(self.initial_delivery_count);
        let limit = delivery_count_rcv.wrapping_add(link_credit);
        self.link_credit = serial_difference(limit, self.delivery_count);
        self.drain = drain;
    }

    /// Consumes all remaining credit when the receiver asked for a drain and nothing is
    /// waiting. Returns true if the flow state must be sent back.
    pub fn try_drain(&mut self) -> bool {
        if !self.drain || !self.pending.is_empty() {
            return false;
        }
        self.delivery_count = self.delivery_count.wrapping_add(self.link_credit);
        self.link_credit = 0;
        self.drain = false;
        true
    }

    pub fn take_pending(&mut self) -> impl Iterator<Item = T> + '_ {
        self.pending.drain(..)
    }
}

/// Flow state of the receiving end of a link
#[derive(Debug)]
pub(crate) struct ReceiverFlow {
    credit_mode: CreditMode,
    delivery_count: SequenceNo,
    link_credit: u32,
}

impl ReceiverFlow {
    pub fn new(credit_mode: CreditMode) -> Self {
        Self {
            credit_mode,
            delivery_count: 0,
            link_credit: 0,
        }
    }

    pub fn delivery_count(&self) -> SequenceNo {
        self.delivery_count
    }

    pub fn link_credit(&self) -> u32 {
        self.link_credit
    }

    pub fn on_attach(&mut self, initial_delivery_count: SequenceNo) {
        self.delivery_count = initial_delivery_count;
    }

    /// Credit granted as soon as the link is attached
    pub fn initial_credit(&mut self) -> Option<u32> {
        match self.credit_mode {
            CreditMode::Auto(credit) if credit > 0 => {
                self.link_credit = credit;
                Some(credit)
            }
            _ => None,
        }
    }

    pub fn set_credit(&mut self, credit: u32) {
        self.link_credit = credit;
    }

    /// Accounts for one incoming transfer.
    ///
    /// Returns the new credit if it was refilled automatically.
    pub fn on_transfer(&mut self) -> Result<Option<u32>, LinkError> {
        if self.link_credit == 0 {
            return Err(LinkError::TransferLimitExceeded);
        }
        self.link_credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);

        match self.credit_mode {
            CreditMode::Auto(credit) if self.link_credit <= credit / 2 => {
                self.link_credit = credit;
                Ok(Some(credit))
            }
            _ => Ok(None),
        }
    }

    /// Applies the sender's view of the link, eg. after it drained the credit
    pub fn on_flow(&mut self, delivery_count: Option<SequenceNo>) {
        if let Some(delivery_count) = delivery_count {
            let limit = self.delivery_count.wrapping_add(self.link_credit);
            self.link_credit = serial_difference(limit, delivery_count);
            self.delivery_count = delivery_count;
        }
    }
}
