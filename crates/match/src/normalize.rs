use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_leading_qty, r"^-?\d[\d,]*(?:\.\d+)?");

/// Vendor units folded into a canonical code. Canonical codes never appear on
/// the left, so the table is a fixpoint.
const UNIT_SYNONYMS: &[(&str, &str)] = &[
    ("EACH", "EA"),
    ("PC", "EA"),
    ("PCS", "EA"),
    ("PIECE", "EA"),
    ("UNIT", "EA"),
    ("UN", "EA"),
    ("CASE", "CS"),
    ("CA", "CS"),
    ("CSE", "CS"),
    ("BOX", "BX"),
    ("BOXES", "BX"),
    ("LBS", "LB"),
    ("POUND", "LB"),
    ("POUNDS", "LB"),
    ("OUNCE", "OZ"),
    ("OUNCES", "OZ"),
    ("KGS", "KG"),
    ("KILO", "KG"),
    ("KILOS", "KG"),
    ("GRAM", "G"),
    ("GRAMS", "G"),
    ("GM", "G"),
    ("LITER", "L"),
    ("LITRE", "L"),
    ("LTR", "L"),
    ("MILLILITER", "ML"),
    ("MLS", "ML"),
    ("DOZ", "DZ"),
    ("DOZEN", "DZ"),
    ("GALLON", "GAL"),
    ("GALLONS", "GAL"),
    ("PACK", "PK"),
    ("PKG", "PK"),
    ("PKT", "PK"),
];

/// Canonical form of one raw bill line, ready for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLine {
    pub sku: String,
    pub description: String,
    pub qty: Decimal,
    pub unit: Option<String>,
    /// Quantity text did not parse; `qty` is zero and the line needs manual
    /// attention downstream.
    pub qty_parse_failed: bool,
}

/// Canonicalize one raw line. Pure and idempotent: feeding the outputs back
/// in reproduces them.
pub fn normalize(
    raw_sku: &str,
    raw_description: &str,
    raw_qty: &str,
    raw_unit: Option<&str>,
) -> NormalizedLine {
    let (qty, qty_parse_failed) = parse_qty(raw_qty);
    NormalizedLine {
        sku: normalize_sku(raw_sku),
        description: normalize_description(raw_description),
        qty,
        unit: raw_unit.map(normalize_unit).filter(|u| !u.is_empty()),
        qty_parse_failed,
    }
}

/// Uppercase, alphanumerics only, except that hyphens between alphanumerics
/// survive. Runs of hyphens collapse to one; edges lose theirs.
pub fn normalize_sku(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_uppercase());
        } else if c == '-' && !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Lowercase alphanumeric words joined by single spaces.
pub fn normalize_description(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the leading numeric token; commas are thousands separators. Fails
/// closed to (0, flagged) so a garbled quantity surfaces for review instead
/// of aborting the whole bill.
pub fn parse_qty(raw: &str) -> (Decimal, bool) {
    let trimmed = raw.trim();
    let Some(m) = re_leading_qty().find(trimmed) else {
        return (Decimal::ZERO, true);
    };
    let cleaned = m.as_str().replace(',', "");
    match Decimal::from_str(&cleaned) {
        Ok(qty) => (qty, false),
        Err(_) => (Decimal::ZERO, true),
    }
}

/// Trim and uppercase, then fold known synonyms; unknown units pass through.
pub fn normalize_unit(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    for (from, to) in UNIT_SYNONYMS {
        if upper == *from {
            return (*to).to_string();
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_keeps_internal_hyphens_only() {
        assert_eq!(normalize_sku("  abc-123 "), "ABC-123");
        assert_eq!(normalize_sku("AB.C 123"), "ABC123");
        assert_eq!(normalize_sku("--ab--12--"), "AB-12");
        assert_eq!(normalize_sku("#4511/B"), "4511B");
        assert_eq!(normalize_sku("..."), "");
    }

    #[test]
    fn description_folds_to_words() {
        assert_eq!(
            normalize_description("  Copy-Paper, A4 (Ream) "),
            "copy paper a4 ream"
        );
    }

    #[test]
    fn qty_parses_common_shapes() {
        assert_eq!(parse_qty("12"), (Decimal::from(12), false));
        assert_eq!(parse_qty(" 2.5 "), ("2.5".parse().unwrap(), false));
        assert_eq!(parse_qty("1,200"), (Decimal::from(1200), false));
        assert_eq!(parse_qty("-3"), (Decimal::from(-3), false));
        // trailing text after the number is vendor noise
        assert_eq!(parse_qty("12 EA"), (Decimal::from(12), false));
    }

    #[test]
    fn qty_fails_closed() {
        assert_eq!(parse_qty("TWO"), (Decimal::ZERO, true));
        assert_eq!(parse_qty(""), (Decimal::ZERO, true));
        assert_eq!(parse_qty(".5"), (Decimal::ZERO, true));
    }

    #[test]
    fn units_fold_to_canonical() {
        assert_eq!(normalize_unit("each"), "EA");
        assert_eq!(normalize_unit(" Case "), "CS");
        assert_eq!(normalize_unit("lbs"), "LB");
        // unknown units pass through uppercased
        assert_eq!(normalize_unit("pallet"), "PALLET");
        // canonical codes are fixpoints
        for (_, to) in UNIT_SYNONYMS {
            assert_eq!(normalize_unit(to), *to);
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let nasty = [
            ("  abc-123 ", "Copy-Paper, A4", "1,200", Some("each")),
            ("AB..9", " WIDGET large ", "TWO", Some("pallet")),
            ("--x--", "", "", None),
        ];
        for (sku, desc, qty, unit) in nasty {
            let once = normalize(sku, desc, qty, unit);
            let twice = normalize(
                &once.sku,
                &once.description,
                &once.qty.to_string(),
                once.unit.as_deref(),
            );
            assert_eq!(once.sku, twice.sku);
            assert_eq!(once.description, twice.description);
            assert_eq!(once.qty, twice.qty);
            assert_eq!(once.unit, twice.unit);
        }
    }
}
