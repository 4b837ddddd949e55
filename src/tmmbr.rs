//! TMMBR bounding-set computation (RFC 5104 Section 3.5.4.2)
//!
//! Every TMMBR tuple `(bitrate, overhead)` constrains the permissible net
//! media bitrate as a function of the packet rate `pr`:
//! `net(pr) = bitrate - 8 * overhead * pr`. The bounding set is the subset of
//! tuples that are the most restrictive constraint for some packet rate
//! `pr >= 0` — the lower envelope of those lines.

use crate::packet::TmmbItem;
use crate::RtpSsrc;

/// Compute the bounding set of a TMMBR candidate set
///
/// Zero-bitrate tuples are discarded. The result is ordered by increasing
/// packet overhead, which is also the order in which the tuples govern as the
/// packet rate grows.
pub fn find_bounding_set(mut candidates: Vec<TmmbItem>) -> Vec<TmmbItem> {
    candidates.retain(|c| c.bitrate_bps > 0);
    if candidates.len() <= 1 {
        return candidates;
    }

    // Sort by increasing overhead; among equal overheads only the lowest
    // bitrate can ever bound, so collapse to it.
    candidates.sort_by(|a, b| {
        a.packet_overhead
            .cmp(&b.packet_overhead)
            .then(a.bitrate_bps.cmp(&b.bitrate_bps))
    });
    candidates.dedup_by(|next, prev| next.packet_overhead == prev.packet_overhead);

    // Stack-based lower-envelope construction. `takeover[i]` is the packet
    // rate at which `hull[i]` becomes the governing constraint.
    let mut hull: Vec<TmmbItem> = Vec::with_capacity(candidates.len());
    let mut takeover: Vec<f64> = Vec::with_capacity(candidates.len());

    for item in candidates {
        let mut item_takeover = 0.0;
        while let Some(top) = hull.last() {
            if item.bitrate_bps <= top.bitrate_bps {
                // Steeper line starting at or below the top: the top is never
                // the unique minimum at any non-negative packet rate.
                hull.pop();
                takeover.pop();
                continue;
            }
            let x = (item.bitrate_bps - top.bitrate_bps) as f64
                / (8.0 * (item.packet_overhead - top.packet_overhead) as f64);
            if x <= takeover.last().copied().unwrap_or(0.0) {
                // The top's governing interval collapsed to nothing.
                hull.pop();
                takeover.pop();
                continue;
            }
            item_takeover = x;
            break;
        }
        hull.push(item);
        takeover.push(item_takeover);
    }

    hull
}

/// Minimum bitrate across a bounding set, in bits per second
pub fn calc_min_bitrate_bps(bounding_set: &[TmmbItem]) -> Option<u64> {
    bounding_set.iter().map(|item| item.bitrate_bps).min()
}

/// Whether `ssrc` owns one of the entries in the set
pub fn is_owner(bounding_set: &[TmmbItem], ssrc: RtpSsrc) -> bool {
    bounding_set.iter().any(|item| item.ssrc == ssrc)
}
