//! NAICS 2022 sectors, keyed by the first two digits of an industry code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub code: &'static str,
    pub title: &'static str,
}

const SECTORS: &[(u8, u8, Sector)] = &[
    (11, 11, sector("11", "Agriculture, Forestry, Fishing and Hunting")),
    (21, 21, sector("21", "Mining, Quarrying, and Oil and Gas Extraction")),
    (22, 22, sector("22", "Utilities")),
    (23, 23, sector("23", "Construction")),
    (31, 33, sector("31-33", "Manufacturing")),
    (42, 42, sector("42", "Wholesale Trade")),
    (44, 45, sector("44-45", "Retail Trade")),
    (48, 49, sector("48-49", "Transportation and Warehousing")),
    (51, 51, sector("51", "Information")),
    (52, 52, sector("52", "Finance and Insurance")),
    (53, 53, sector("53", "Real Estate and Rental and Leasing")),
    (54, 54, sector("54", "Professional, Scientific, and Technical Services")),
    (55, 55, sector("55", "Management of Companies and Enterprises")),
    (
        56,
        56,
        sector(
            "56",
            "Administrative and Support and Waste Management and Remediation Services",
        ),
    ),
    (61, 61, sector("61", "Educational Services")),
    (62, 62, sector("62", "Health Care and Social Assistance")),
    (71, 71, sector("71", "Arts, Entertainment, and Recreation")),
    (72, 72, sector("72", "Accommodation and Food Services")),
    (81, 81, sector("81", "Other Services (except Public Administration)")),
    (92, 92, sector("92", "Public Administration")),
];

const fn sector(code: &'static str, title: &'static str) -> Sector {
    Sector { code, title }
}

/// The sector of a NAICS code of any length from two to six digits.
pub fn sector_for(naics: &str) -> Option<Sector> {
    let naics = naics.trim();
    if naics.len() < 2 || !naics.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let prefix: u8 = naics[..2].parse().ok()?;
    SECTORS
        .iter()
        .find(|(first, last, _)| (*first..=*last).contains(&prefix))
        .map(|(_, _, sector)| *sector)
}
