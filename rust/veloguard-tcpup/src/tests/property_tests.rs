//! Property-based tests for the translator
//!
//! These tests cover:
//! - Wraparound sequence comparison
//! - Uniqueness of conversation ids and tuples among live flows
//! - Window renormalization to the tunnel scale
//! - Egress payload and relay destination preservation

use crate::egress::renormalize_window;
use crate::ingress::relay_destination;
use crate::packet::{build_ipv4_tcp, TcpFlags};
use crate::relay::RelayAddress;
use crate::seq::{seq_ge, seq_gt, seq_le, seq_lt};
use crate::table::{ConnectionTable, FlowKey};
use crate::translator::{Translator, Verdict};
use crate::tunnel::TunnelFrame;
use proptest::prelude::*;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

/// Strategy for generating IPv4 endpoints
fn endpoint_strategy() -> impl Strategy<Value = SocketAddrV4> {
    (any::<[u8; 4]>(), 1u16..=u16::MAX)
        .prop_map(|(ip, port)| SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Forward distances below 2^31 compare as "after", in both argument orders.
    #[test]
    fn test_seq_forward_distance(base in any::<u32>(), dist in 1u32..(1 << 31)) {
        let ahead = base.wrapping_add(dist);
        prop_assert!(seq_gt(ahead, base));
        prop_assert!(!seq_gt(base, ahead));
        prop_assert!(seq_lt(base, ahead));
        prop_assert!(seq_ge(ahead, base) && seq_le(base, ahead));
    }

    /// No value is after itself; exactly 2^31 apart is never "after".
    #[test]
    fn test_seq_reflexive_and_boundary(x in any::<u32>()) {
        prop_assert!(!seq_gt(x, x));
        prop_assert!(seq_gt(x.wrapping_add(1), x));
        prop_assert!(!seq_gt(x, x.wrapping_add(1 << 31)));
    }

    /// Live flows never share an id or a tuple.
    #[test]
    fn test_flow_identity_unique(
        keys in prop::collection::vec((endpoint_strategy(), endpoint_strategy()), 1..64),
    ) {
        let now = Instant::now();
        let mut table = ConnectionTable::new();
        let mut convs = HashSet::new();
        let distinct: HashSet<FlowKey> = keys.iter().map(|(l, r)| FlowKey::new(*l, *r)).collect();

        for key in &distinct {
            let flow = table.insert(*key, now);
            // Keep it out of the insert-time sweep.
            flow.shadow.confirmed = crate::fsm::TcpState::Established;
            prop_assert!(convs.insert(flow.conv));
        }
        prop_assert_eq!(table.len(), distinct.len());

        for key in &distinct {
            let conv = table.find_by_tuple(key).map(|f| f.conv);
            prop_assert!(conv.is_some());
            prop_assert_eq!(table.get(conv.unwrap_or_default()).map(|f| f.key), Some(*key));
        }
    }

    /// The tunnel window equals the effective local window at scale 7.
    #[test]
    fn test_renormalize_matches_formula(window in any::<u16>(), scale in 0u8..=14) {
        let expected = (((window as u32) << scale) >> 7).min(u16::MAX as u32) as u16;
        prop_assert_eq!(renormalize_window(window, scale), expected);
        if scale <= 7 {
            prop_assert!(renormalize_window(window, scale) <= window);
        }
    }

    /// A SYN opens a flow whose frame names the original destination, and
    /// later data keeps its payload byte for byte.
    #[test]
    fn test_egress_preserves_destination_and_payload(
        local in endpoint_strategy(),
        remote in endpoint_strategy(),
        isn in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..1200),
    ) {
        let mut t = Translator::new();
        let mut out = vec![0u8; 2048];

        let syn =
            build_ipv4_tcp(local, remote, isn, 0, TcpFlags::syn_only(), 1000, &[], &[]).unwrap();
        let n = t.translate_egress(&syn, &mut out).unwrap().bytes_written();
        prop_assert!(n > 0);
        prop_assert_eq!(relay_destination(&out[..n]).unwrap(), Some(RelayAddress::new(remote)));

        let next = isn.wrapping_add(1);
        let data = build_ipv4_tcp(local, remote, next, 1, TcpFlags::psh_ack(), 1000, &[], &payload)
            .unwrap();
        let verdict = t.translate_egress(&data, &mut out).unwrap();
        prop_assert!(matches!(verdict, Verdict::Forward(_)));
        let frame = TunnelFrame::new_checked(&out[..verdict.bytes_written()]).unwrap();
        prop_assert_eq!(frame.payload(), &payload[..]);
        prop_assert_eq!(t.table().len(), 1);
    }
}
