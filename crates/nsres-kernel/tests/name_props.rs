//! Property tests for the name grammar.

use nsres_kernel::name;
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,7}"
}

fn segments(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..max)
}

proptest! {
    #[test]
    fn anchoring_ignores_leading_separator(segs in segments(5), absolute in any::<bool>()) {
        let joined = segs.join(name::SEPARATOR);
        let input = if absolute { name::make_absolute(&joined) } else { joined };
        let (trimmed, was_absolute) = name::trim_leading(&input);

        prop_assert_eq!(was_absolute, absolute);
        prop_assert_eq!(name::make_absolute(trimmed), name::make_absolute(&input));
    }

    #[test]
    fn split_then_join_round_trips(segs in segments(6)) {
        let input = segs.join(name::SEPARATOR);
        let parts = name::split(&input);

        prop_assert_eq!(parts.tail, segs[segs.len() - 1].as_str());
        prop_assert_eq!(parts.qualifiers, segs[..segs.len() - 1].join(name::SEPARATOR));
        prop_assert_eq!(parts.flags.qualified, segs.len() > 1);
        if parts.flags.qualified {
            prop_assert_eq!(name::make_qualified(parts.qualifiers, parts.tail), input);
        }
    }

    #[test]
    fn redundant_colons_normalize_away(segs in segments(5), extra in 0usize..4) {
        let sloppy_separator = format!("{}{}", name::SEPARATOR, ":".repeat(extra * 2));
        let sloppy = format!("{}{}", sloppy_separator, segs.join(&sloppy_separator));
        let clean = name::make_absolute(&segs.join(name::SEPARATOR));

        prop_assert_eq!(name::normalize_absolute(&sloppy), clean);
        prop_assert_eq!(name::count_qualifiers(name::trim_leading(&sloppy).0), segs.len() - 1);
    }

    #[test]
    fn tail_is_last_segment(segs in segments(5)) {
        let input = name::make_absolute(&segs.join(name::SEPARATOR));
        prop_assert_eq!(name::tail_only(&input), segs[segs.len() - 1].as_str());
    }
}

#[test]
fn normalize_collapses_runs_in_both_parts() {
    assert_eq!(
        name::normalize("a::::b::", "::c"),
        ("a::b".to_string(), "c".to_string())
    );
}
