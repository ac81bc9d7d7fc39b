use crate::models::{Certification, ChartKind};

pub const DIAMOND_UNITS: u64 = 10_000_000;
pub const PLATINUM_UNITS: u64 = 1_000_000;
pub const GOLD_UNITS: u64 = 500_000;

/// Certifications earned by `total_units`, highest tier first.
///
/// Gold is only awarded below platinum. The remainder after the platinum
/// step is discarded, so 10,500,000 units certify as one diamond and nothing
/// else.
pub fn certify(total_units: u64) -> Option<Vec<Certification>> {
    let mut remaining = total_units;

    let diamond = remaining / DIAMOND_UNITS;
    remaining %= DIAMOND_UNITS;

    let platinum = remaining / PLATINUM_UNITS;
    remaining %= PLATINUM_UNITS;

    let gold = if diamond == 0 && platinum == 0 {
        remaining / GOLD_UNITS
    } else {
        0
    };

    let certifications: Vec<_> = [
        (diamond, Certification::Diamond(diamond)),
        (platinum, Certification::Platinum(platinum)),
        (gold, Certification::Gold(gold)),
    ]
    .into_iter()
    .filter(|(count, _)| *count > 0)
    .map(|(_, certification)| certification)
    .collect();

    (!certifications.is_empty()).then_some(certifications)
}

/// Like [`certify`], but `None` for kinds that are never certified.
pub fn grade(kind: ChartKind, total_units: u64) -> Option<Vec<Certification>> {
    if kind.profile().certified {
        certify(total_units)
    } else {
        None
    }
}
