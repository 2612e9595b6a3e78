//! Resolution of textual time-zone identifiers against the bundled IANA
//! database.

use chrono_tz::Tz;

/// Outcome of a zone lookup.
#[derive(Debug, Clone)]
pub struct ResolvedZone {
    pub tz: Tz,
    /// True when the requested zone was unknown and UTC was substituted.
    pub fell_back_to_utc: bool,
    /// The identifier as requested (trimmed), for diagnostics.
    pub requested: String,
}

/// Resolves zone identifiers. Unknown zones fall back to UTC with a
/// diagnostic flag rather than failing the load; the caller decides how to
/// surface it. Passed explicitly into the catalog builder — no hidden state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneResolver;

impl ZoneResolver {
    /// Deterministic for a given input. Empty or whitespace-only input means
    /// "no zone configured" and resolves to UTC without a diagnostic.
    pub fn resolve(&self, id: &str) -> ResolvedZone {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return ResolvedZone {
                tz: Tz::UTC,
                fell_back_to_utc: false,
                requested: String::new(),
            };
        }
        match trimmed.parse::<Tz>() {
            Ok(tz) => ResolvedZone {
                tz,
                fell_back_to_utc: false,
                requested: trimmed.to_string(),
            },
            Err(_) => ResolvedZone {
                tz: Tz::UTC,
                fell_back_to_utc: true,
                requested: trimmed.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_iana_identifiers() {
        let resolver = ZoneResolver;
        let zone = resolver.resolve("America/New_York");
        assert_eq!(zone.tz, Tz::America__New_York);
        assert!(!zone.fell_back_to_utc);

        let zone = resolver.resolve("Asia/Tokyo");
        assert_eq!(zone.tz, Tz::Asia__Tokyo);
        assert!(!zone.fell_back_to_utc);
    }

    #[test]
    fn unknown_zone_falls_back_to_utc_with_diagnostic() {
        let zone = ZoneResolver.resolve("Mars/Olympus_Mons");
        assert_eq!(zone.tz, Tz::UTC);
        assert!(zone.fell_back_to_utc);
        assert_eq!(zone.requested, "Mars/Olympus_Mons");
    }

    #[test]
    fn empty_input_is_utc_without_diagnostic() {
        for id in ["", "   ", "\t"] {
            let zone = ZoneResolver.resolve(id);
            assert_eq!(zone.tz, Tz::UTC);
            assert!(!zone.fell_back_to_utc, "no diagnostic for {id:?}");
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let a = ZoneResolver.resolve("Europe/Berlin");
        let b = ZoneResolver.resolve("Europe/Berlin");
        assert_eq!(a.tz, b.tz);
        assert_eq!(a.fell_back_to_utc, b.fell_back_to_utc);
    }
}
