// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use s2n_http2_core::{error::Error, http2_error};

/// Receive-side window accounting for one stream (or the connection)
///
/// `window` is the credit currently extended to the peer, `processed` is
/// payload that was delivered but whose credit has not been re-extended yet.
/// At every quiescent point `window + processed <= initial_window`.
#[derive(Debug)]
pub struct RecvFlowController {
    window: i64,
    initial_window: u32,
    processed: u32,
    /// Accumulated since the last WINDOW_UPDATE emission
    returned: u32,
    /// Temporarily negative after an initial-window shrink, tolerating frames
    /// that were already in flight when the peer learned of the shrink
    lower_bound: i64,
}

impl RecvFlowController {
    pub fn new(initial_window: u32) -> Self {
        Self {
            window: initial_window as i64,
            initial_window,
            processed: 0,
            returned: 0,
            lower_bound: 0,
        }
    }

    /// The credit currently extended to the peer
    #[inline]
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Charges a received DATA frame against the window
    pub fn consume(&mut self, len: u32) -> Result<(), Error> {
        let next = self.window - len as i64;
        if next < self.lower_bound {
            //= https://www.rfc-editor.org/rfc/rfc9113#section-6.9.1
            //# A sender MUST NOT send a flow-controlled frame with a length that
            //# exceeds the space available in either of the flow-control windows
            //# advertised by the receiver.
            return Err(http2_error!(
                FLOW_CONTROL_ERROR,
                "peer exceeded its flow-control window"
            ));
        }
        self.window = next;
        self.processed += len;
        Ok(())
    }

    /// Re-extends credit for payload the application has consumed
    ///
    /// Returns the increment to announce once the accumulated amount reaches
    /// half of the initial window. The threshold trades WINDOW_UPDATE
    /// frequency against peer stall time.
    pub fn return_bytes(&mut self, len: u32) -> Option<u32> {
        debug_assert!(len <= self.processed, "returned more than was delivered");
        self.processed = self.processed.saturating_sub(len);
        self.returned += len;

        if self.returned > self.initial_window / 2 {
            let increment = core::mem::take(&mut self.returned);
            self.window += increment as i64;
            Some(increment)
        } else {
            None
        }
    }

    /// Applies a change of the negotiated initial window
    ///
    /// The current window shifts by the delta rather than resetting, and a
    /// shrink lowers the tolerated bound below zero for frames already in
    /// flight.
    pub fn set_initial_window(&mut self, initial_window: u32) {
        let delta = initial_window as i64 - self.initial_window as i64;
        self.initial_window = initial_window;
        self.window += delta;
        self.lower_bound = delta.min(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_http2_core::error::ErrorCode;

    #[test]
    fn consume_tracks_the_window() {
        let mut flow = RecvFlowController::new(65_535);
        flow.consume(40_000).unwrap();
        assert_eq!(flow.window(), 25_535);

        let err = flow.consume(30_000).unwrap_err();
        assert_eq!(err.code, ErrorCode::FLOW_CONTROL_ERROR);
        // a failed charge must not move the window
        assert_eq!(flow.window(), 25_535);
    }

    #[test]
    fn updates_are_batched_at_half_the_window() {
        let mut flow = RecvFlowController::new(65_535);
        flow.consume(65_535).unwrap();

        // 32_767 returned is just below the 32_767.5 threshold
        assert_eq!(flow.return_bytes(32_767), None);
        let increment = flow.return_bytes(1).expect("threshold reached");
        assert_eq!(increment, 32_768);
        assert_eq!(flow.window(), 32_768);

        // the accumulator restarted from zero
        assert_eq!(flow.return_bytes(100), None);
    }

    #[test]
    fn window_plus_processed_never_exceeds_initial() {
        let mut flow = RecvFlowController::new(65_535);
        flow.consume(50_000).unwrap();
        assert!(flow.window() + 50_000 <= 65_535);

        flow.return_bytes(50_000).unwrap();
        assert!(flow.window() <= 65_535);
    }

    #[test]
    fn shrink_tolerates_inflight_frames() {
        let mut flow = RecvFlowController::new(65_535);
        flow.consume(20_000).unwrap();

        flow.set_initial_window(1024);
        assert_eq!(flow.window(), 45_535 + 1024 - 65_535);

        // the peer had 45_535 octets of credit before it learned of the
        // shrink; all of it must still be accepted
        flow.consume(45_535).unwrap();
        let err = flow.consume(1).unwrap_err();
        assert_eq!(err.code, ErrorCode::FLOW_CONTROL_ERROR);
    }

    #[test]
    fn growth_applies_immediately() {
        let mut flow = RecvFlowController::new(65_535);
        flow.set_initial_window(1 << 20);
        assert_eq!(flow.window(), (1 << 20) as i64);
    }

    #[test]
    fn window_invariant_survives_any_interleaving() {
        bolero::check!()
            .with_type()
            .for_each(|ops: &Vec<(bool, u16)>| {
                let mut flow = RecvFlowController::new(65_535);
                // octets delivered to the application but not yet returned
                let mut outstanding: u32 = 0;

                for (consume, len) in ops {
                    let len = *len as u32;
                    if *consume {
                        if flow.consume(len).is_ok() {
                            outstanding += len;
                        }
                    } else {
                        let len = len.min(outstanding);
                        let _ = flow.return_bytes(len);
                        outstanding -= len;
                    }

                    assert!(flow.window() + outstanding as i64 <= 65_535);
                }
            });
    }
}
