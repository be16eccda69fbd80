// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logical link classification tags.
//!
//! Every intercepted datagram belongs to exactly one directed link class,
//! derived from which address population (base station vs. rover) the source
//! and destination fall into. Base-to-base traffic rides the terrestrial
//! network and is never impaired; everything unrecognised is `Other`.

use std::fmt;

/// Directed link class of a packet.
///
/// The numeric verdict mark attached to each class is the sole contract with
/// the external traffic shaper: it selects the per-class queueing discipline
/// that applies base latency, jitter and bandwidth caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Earth station to earth station (pristine terrestrial path).
    BaseToBase,
    /// Earth station to rover.
    BaseToRover,
    /// Rover to earth station.
    RoverToBase,
    /// Rover to rover on the lunar surface.
    RoverToMoon,
    /// Not IPv4, or addresses outside the configured ranges.
    Other,
}

impl LinkKind {
    /// The three link classes subject to bit errors and burst loss, in
    /// burst-flag index order.
    pub const IMPAIRABLE: [LinkKind; 3] =
        [LinkKind::BaseToRover, LinkKind::RoverToBase, LinkKind::RoverToMoon];

    /// The four link classes that carry a configuration section.
    pub const CONFIGURED: [LinkKind; 4] = [
        LinkKind::BaseToBase,
        LinkKind::BaseToRover,
        LinkKind::RoverToBase,
        LinkKind::RoverToMoon,
    ];

    /// Verdict mark consumed by the external shaper.
    #[inline]
    #[must_use]
    pub const fn mark(self) -> u32 {
        match self {
            LinkKind::BaseToBase => 1,
            LinkKind::BaseToRover => 2,
            LinkKind::RoverToBase => 3,
            LinkKind::RoverToMoon => 4,
            LinkKind::Other => 0,
        }
    }

    /// Whether this class is subject to impairment.
    #[inline]
    #[must_use]
    pub const fn is_impairable(self) -> bool {
        matches!(
            self,
            LinkKind::BaseToRover | LinkKind::RoverToBase | LinkKind::RoverToMoon
        )
    }

    /// Index of this class within [`LinkKind::IMPAIRABLE`], if impairable.
    #[inline]
    #[must_use]
    pub const fn impairable_index(self) -> Option<usize> {
        match self {
            LinkKind::BaseToRover => Some(0),
            LinkKind::RoverToBase => Some(1),
            LinkKind::RoverToMoon => Some(2),
            _ => None,
        }
    }

    /// Top-level key of this class in the configuration document.
    #[must_use]
    pub const fn section_key(self) -> Option<&'static str> {
        match self {
            LinkKind::BaseToBase => Some("earth_to_earth"),
            LinkKind::BaseToRover => Some("earth_to_moon"),
            LinkKind::RoverToBase => Some("moon_to_earth"),
            LinkKind::RoverToMoon => Some("moon_to_moon"),
            LinkKind::Other => None,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkKind::BaseToBase => "base-to-base",
            LinkKind::BaseToRover => "base-to-rover",
            LinkKind::RoverToBase => "rover-to-base",
            LinkKind::RoverToMoon => "rover-to-moon",
            LinkKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_match_shaper_contract() {
        assert_eq!(LinkKind::BaseToBase.mark(), 1);
        assert_eq!(LinkKind::BaseToRover.mark(), 2);
        assert_eq!(LinkKind::RoverToBase.mark(), 3);
        assert_eq!(LinkKind::RoverToMoon.mark(), 4);
        assert_eq!(LinkKind::Other.mark(), 0);
    }

    #[test]
    fn impairable_set_excludes_terrestrial_and_other() {
        assert!(!LinkKind::BaseToBase.is_impairable());
        assert!(!LinkKind::Other.is_impairable());
        for kind in LinkKind::IMPAIRABLE {
            assert!(kind.is_impairable());
        }
    }

    #[test]
    fn impairable_indices_are_dense_and_ordered() {
        for (i, kind) in LinkKind::IMPAIRABLE.iter().enumerate() {
            assert_eq!(kind.impairable_index(), Some(i));
        }
        assert_eq!(LinkKind::BaseToBase.impairable_index(), None);
        assert_eq!(LinkKind::Other.impairable_index(), None);
    }

    #[test]
    fn every_configured_link_has_a_section_key() {
        for kind in LinkKind::CONFIGURED {
            assert!(kind.section_key().is_some());
        }
        assert_eq!(LinkKind::Other.section_key(), None);
    }
}
