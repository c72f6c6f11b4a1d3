//! Property tests for the invariants spec.md §8 calls out explicitly:
//! ring buffer ordering, telnet parser robustness and negotiation attempt
//! ceilings, rendezvous address/password determinism, ACL first-match, and
//! the timeout tracker's wait-duration algebra.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use proptest::prelude::*;

use swak::acl::{Acl, AclEntry, Decision, DefaultPolicy};
use swak::rendezvous::{derive_address, derive_password};
use swak::ring_buffer::RingBuffer;
use swak::telnet::{NegotiationState, TelnetParser};
use swak::timeout::TimeoutTracker;

proptest! {
    /// Writing and then draining an arbitrary byte sequence through the
    /// ring buffer (in chunks no larger than its capacity) reproduces the
    /// bytes in order and never reports a buffered length over capacity.
    #[test]
    fn ring_buffer_preserves_order_and_bounds(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16)) {
        let mut ring = RingBuffer::new(64);
        let mut expected = Vec::new();
        let mut drained = Vec::new();

        for chunk in &chunks {
            if chunk.len() > ring.free() {
                // Draining doesn't need to keep pace with writes; make
                // room by reading out whatever's pending first.
                let mut buf = vec![0u8; ring.len()];
                let n = ring.read_into(&mut buf);
                drained.extend_from_slice(&buf[..n]);
            }
            if chunk.len() <= ring.free() {
                ring.write_all(chunk).unwrap();
                expected.extend_from_slice(chunk);
            }
            prop_assert!(ring.len() <= ring.capacity());
        }
        let mut rest = vec![0u8; ring.len()];
        let n = ring.read_into(&mut rest);
        drained.extend_from_slice(&rest[..n]);

        prop_assert_eq!(drained, expected);
    }

    /// The telnet parser never panics on arbitrary input, whether or not
    /// it contains valid IAC sequences.
    #[test]
    fn telnet_parser_never_panics_on_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut parser = TelnetParser::new();
        let _ = parser.feed(&bytes);
    }

    /// Feeding the same bytes in two different chunkings produces the same
    /// decoded event stream — the parser carries no chunk-boundary state
    /// leakage.
    #[test]
    fn telnet_parser_is_chunk_boundary_independent(bytes in prop::collection::vec(any::<u8>(), 0..128), split in 0usize..128) {
        let split = split.min(bytes.len());
        let (a, b) = bytes.split_at(split);

        let mut whole = TelnetParser::new();
        let whole_events = whole.feed(&bytes);

        let mut chunked = TelnetParser::new();
        let mut chunked_events = Vec::new();
        if let Ok(first) = chunked.feed(a) {
            chunked_events.extend(first);
        }
        if let Ok(second) = chunked.feed(b) {
            chunked_events.extend(second);
        }

        if let Ok(whole_events) = whole_events {
            prop_assert_eq!(whole_events, chunked_events);
        }
    }

    /// Repeatedly re-offering an option the peer never answers never grows
    /// the attempt counter past the configured ceiling.
    #[test]
    fn negotiation_attempts_never_exceed_ceiling(opt in any::<u8>(), tries in 0usize..64) {
        let mut neg = NegotiationState::default();
        for _ in 0..tries {
            let _ = neg.receive_will(opt);
        }
        prop_assert!(neg.attempts_them(opt) <= 10);
    }

    /// Deriving a rendezvous address/password is a pure function of the
    /// shared secret: same input always yields the same output, and
    /// distinct secrets overwhelmingly yield distinct addresses.
    #[test]
    fn rendezvous_derivation_is_deterministic(secret in prop::collection::vec(any::<u8>(), 1..64)) {
        prop_assert_eq!(derive_address(&secret), derive_address(&secret));
        prop_assert_eq!(derive_password(&secret), derive_password(&secret));
    }

    #[test]
    fn rendezvous_derivation_differs_across_secrets(a in prop::collection::vec(any::<u8>(), 1..64), b in prop::collection::vec(any::<u8>(), 1..64)) {
        prop_assume!(a != b);
        prop_assert_ne!(derive_address(&a), derive_address(&b));
    }

    /// Whichever entry in the ACL list first contains the address decides
    /// the outcome, regardless of what later entries (even contradictory
    /// ones) say.
    #[test]
    fn acl_first_match_wins(octet in any::<u8>(), first_allow in any::<bool>(), second_allow in any::<bool>()) {
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet));
        let mut acl = Acl::new(DefaultPolicy::Deny);
        acl.push(AclEntry {
            net: "10.0.0.0/24".parse().unwrap(),
            decision: if first_allow { Decision::Allow } else { Decision::Deny },
        });
        acl.push(AclEntry {
            net: "10.0.0.0/8".parse().unwrap(),
            decision: if second_allow { Decision::Allow } else { Decision::Deny },
        });
        prop_assert_eq!(acl.allows(addr), first_allow);
    }

    /// With no budgets configured, the tracker never shortens the caller's
    /// requested poll timeout.
    #[test]
    fn timeout_tracker_no_budgets_preserves_base_wait(millis in 1u64..10_000) {
        let tracker = TimeoutTracker::new(None, None, None);
        let base = Duration::from_millis(millis);
        prop_assert_eq!(tracker.next_wait(base), base);
    }

    /// A configured budget never makes the tracker request a *longer*
    /// wait than the caller's base timeout.
    #[test]
    fn timeout_tracker_wait_never_exceeds_base(base_millis in 1u64..10_000, budget_millis in 1u64..10_000) {
        let tracker = TimeoutTracker::new(Some(Duration::from_millis(budget_millis)), None, None);
        let base = Duration::from_millis(base_millis);
        prop_assert!(tracker.next_wait(base) <= base);
    }
}
