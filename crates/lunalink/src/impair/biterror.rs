// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload bit corruption.
//!
//! For each packet on a lossy link the injector draws an effective per-bit
//! flip probability from the link's Gaussian profile and flips payload bits
//! independently. IP and recognised transport headers are never touched:
//! corrupting them would get the packet rejected upstream before the damage
//! is observable, whereas payload corruption is caught by the TCP/UDP
//! checksum the way a real noisy link's corruption is.

use crate::config::LinkParams;
use crate::impair::sampling;
use crate::packet::view::PacketError;
use rand::Rng;

/// IPv4 protocol numbers with a recognised transport header.
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Length of the protected prefix: the IPv4 header plus, when the protocol
/// is recognised and the buffer is long enough, the transport header.
///
/// Returns `None` when the buffer does not hold a plausible IPv4 header at
/// all (too short, wrong version nibble, or an IHL shorter than the fixed
/// header); such packets are left untouched by [`inject`].
#[must_use]
pub fn protected_prefix_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 20 || bytes[0] >> 4 != 4 {
        return None;
    }
    let ihl = usize::from(bytes[0] & 0x0F) * 4;
    if ihl < 20 || ihl > bytes.len() {
        return None;
    }

    let mut prefix = ihl;
    match bytes[9] {
        IPPROTO_TCP => {
            // Data-offset nibble sits 12 bytes into the TCP header.
            if let Some(&offset_byte) = bytes.get(ihl + 12) {
                prefix += usize::from(offset_byte >> 4) * 4;
            }
        }
        IPPROTO_UDP => {
            if bytes.len() - ihl >= 8 {
                prefix += 8;
            }
        }
        _ => {}
    }

    Some(prefix.min(bytes.len()))
}

/// Maybe corrupt the payload of `bytes` according to `params`.
///
/// Returns `Ok(None)` when no modification is requested: malformed header,
/// a zero bit-error rate, or a draw that clamps to zero. Otherwise returns a
/// newly allocated buffer of identical length with payload bits flipped.
/// The first `protected_prefix_len` bytes of the output always equal the
/// input, regardless of the RNG.
pub fn inject<R: Rng + ?Sized>(
    bytes: &[u8],
    params: &LinkParams,
    rng: &mut R,
) -> Result<Option<Vec<u8>>, PacketError> {
    if params.base_bit_error_rate <= 0.0 {
        return Ok(None);
    }
    let Some(prefix) = protected_prefix_len(bytes) else {
        return Ok(None);
    };

    let p = sampling::normal_clamped(
        rng,
        params.base_bit_error_rate,
        params.bit_error_rate_stddev,
    );
    if p <= 0.0 {
        return Ok(None);
    }

    let mut out = Vec::new();
    out.try_reserve_exact(bytes.len())
        .map_err(|_| PacketError::AllocationFailed)?;
    out.extend_from_slice(bytes);

    for byte in &mut out[prefix..] {
        for bit in 0..8 {
            if rng.gen::<f64>() < p {
                *byte ^= 1 << bit;
            }
        }
    }
    Ok(Some(out))
}
